//! Shared types, error model, and configuration for LearnBits.
//!
//! This crate is the foundation depended on by all other LearnBits crates.
//! It provides:
//! - [`LearnBitsError`], the unified error type
//! - Domain types ([`LearningBit`], [`Pattern`], the [`Category`] taxonomy)
//! - Configuration ([`AppConfig`], config loading and validation)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AnalysisConfig, AppConfig, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MIN_INFORMATIVENESS, IngestConfig,
    PipelineConfig, ScoringConfig, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{LearnBitsError, Result};
pub use types::{
    AnalysisScope, BitFilter, Category, ContentType, CrawlRecord, LearningBit, Pattern,
    PatternFilter, Subcategory, collapse_whitespace, content_hash,
};
