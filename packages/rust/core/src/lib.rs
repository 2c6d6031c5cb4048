//! Extraction pipeline and domain logic for LearnBits.
//!
//! This crate ties text extraction, chunking, classification and tagging
//! into learning bits, persists them through `learnbits-storage`, and mines
//! stored bits into patterns.

pub mod analyzer;
pub mod chunker;
pub mod classifier;
pub mod extractor;
pub mod fetch;
pub mod pipeline;
pub mod tags;

pub use analyzer::{AnalyzerConfig, PatternAnalyzer, mine_patterns};
pub use chunker::{Chunk, Chunker};
pub use classifier::{Classification, Classifier};
pub use extractor::{ExtractorConfig, LearningBitExtractor};
pub use fetch::{ContentFetcher, HttpFetcher};
pub use pipeline::{IngestReport, Pipeline, SourceDocument};
pub use tags::Tagger;
