//! Application configuration for LearnBits.
//!
//! User config lives at `~/.learnbits/learnbits.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LearnBitsError, Result};
use crate::types::Category;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "learnbits.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".learnbits";

/// Default maximum chunk size, in characters.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1200;

/// Default minimum classifier confidence for a chunk to become a bit.
pub const DEFAULT_MIN_INFORMATIVENESS: f64 = 0.2;

// ---------------------------------------------------------------------------
// Config structs (matching learnbits.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum characters per chunk. Must be positive.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Chunks classified below this confidence are discarded.
    #[serde(default = "default_min_informativeness")]
    pub min_informativeness: f64,

    /// Maximum tags attached to a single bit.
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,

    /// Extra keywords to spot as tags, on top of the built-in vocabulary.
    #[serde(default)]
    pub extra_keywords: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_informativeness: default_min_informativeness(),
            max_tags: default_max_tags(),
            extra_keywords: Vec::new(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}
fn default_min_informativeness() -> f64 {
    DEFAULT_MIN_INFORMATIVENESS
}
fn default_max_tags() -> usize {
    8
}

/// `[scoring]` section: importance weighting.
///
/// `importance = clamp(confidence_weight * confidence
///     + length_weight * min(len / ideal_length, 1)
///     + category_weight * category_weights[category], 0, 1)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f64,

    #[serde(default = "default_length_weight")]
    pub length_weight: f64,

    #[serde(default = "default_category_weight")]
    pub category_weight: f64,

    /// Chunk length (characters) at which the length term saturates.
    #[serde(default = "default_ideal_length")]
    pub ideal_length: usize,

    /// Per-category priority weight, keyed by category name.
    #[serde(default = "default_category_weights")]
    pub category_weights: BTreeMap<String, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            confidence_weight: default_confidence_weight(),
            length_weight: default_length_weight(),
            category_weight: default_category_weight(),
            ideal_length: default_ideal_length(),
            category_weights: default_category_weights(),
        }
    }
}

impl ScoringConfig {
    /// Priority weight for a category; unlisted categories weigh 0.
    pub fn weight_for(&self, category: Category) -> f64 {
        self.category_weights
            .get(category.as_str())
            .copied()
            .unwrap_or(0.0)
    }
}

fn default_confidence_weight() -> f64 {
    0.5
}
fn default_length_weight() -> f64 {
    0.2
}
fn default_category_weight() -> f64 {
    0.3
}
fn default_ideal_length() -> usize {
    600
}
fn default_category_weights() -> BTreeMap<String, f64> {
    [
        (Category::Code, 1.0),
        (Category::Procedure, 0.9),
        (Category::ReferenceTable, 0.8),
        (Category::Definition, 0.7),
        (Category::Concept, 0.6),
        (Category::Uncategorized, 0.1),
    ]
    .into_iter()
    .map(|(c, w)| (c.as_str().to_string(), w))
    .collect()
}

/// `[analysis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum supporting bits for a group to become a pattern (>= 2).
    #[serde(default = "default_min_support")]
    pub min_support: usize,

    /// Strength contributed by each supporting bit on top of its importance.
    #[serde(default = "default_support_weight")]
    pub support_weight: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_support: default_min_support(),
            support_weight: default_support_weight(),
        }
    }
}

fn default_min_support() -> usize {
    2
}
fn default_support_weight() -> f64 {
    0.5
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.learnbits/learnbits.db".into()
}

impl StorageConfig {
    /// Resolve `db_path`, expanding a leading `~/`.
    pub fn resolved_db_path(&self) -> Result<PathBuf> {
        match self.db_path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    LearnBitsError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.db_path)),
        }
    }
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Documents processed concurrently by batch ingestion.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// HTTP timeout for the built-in fetcher.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_fetch_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check every invariant the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.max_chunk_size == 0 {
            return Err(LearnBitsError::invalid_config(
                "pipeline.max_chunk_size must be positive",
            ));
        }
        check_unit("pipeline.min_informativeness", p.min_informativeness)?;

        let s = &self.scoring;
        for (name, w) in [
            ("scoring.confidence_weight", s.confidence_weight),
            ("scoring.length_weight", s.length_weight),
            ("scoring.category_weight", s.category_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(LearnBitsError::invalid_config(format!(
                    "{name} must be a non-negative number, got {w}"
                )));
            }
        }
        if s.ideal_length == 0 {
            return Err(LearnBitsError::invalid_config(
                "scoring.ideal_length must be positive",
            ));
        }
        for (name, w) in &s.category_weights {
            if name.parse::<Category>().is_err() {
                return Err(LearnBitsError::invalid_config(format!(
                    "scoring.category_weights: unknown category `{name}`"
                )));
            }
            check_unit(&format!("scoring.category_weights.{name}"), *w)?;
        }

        if self.analysis.min_support < 2 {
            return Err(LearnBitsError::invalid_config(
                "analysis.min_support must be at least 2",
            ));
        }
        if !self.analysis.support_weight.is_finite() || self.analysis.support_weight <= 0.0 {
            return Err(LearnBitsError::invalid_config(
                "analysis.support_weight must be positive",
            ));
        }

        if self.ingest.concurrency == 0 {
            return Err(LearnBitsError::invalid_config(
                "ingest.concurrency must be positive",
            ));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LearnBitsError::invalid_config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.learnbits/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LearnBitsError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.learnbits/learnbits.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LearnBitsError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        LearnBitsError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LearnBitsError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LearnBitsError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LearnBitsError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_chunk_size"));
        assert!(toml_str.contains("reference-table"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(parsed.analysis.min_support, 2);
        assert_eq!(parsed.scoring.weight_for(Category::Code), 1.0);
    }

    #[test]
    fn default_config_is_valid() {
        AppConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_chunk_size = 400
extra_keywords = ["tokio", "axum"]

[storage]
db_path = "/tmp/bits.db"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_chunk_size, 400);
        assert_eq!(config.pipeline.extra_keywords.len(), 2);
        assert_eq!(config.pipeline.min_informativeness, DEFAULT_MIN_INFORMATIVENESS);
        assert_eq!(
            config.storage.resolved_db_path().unwrap(),
            PathBuf::from("/tmp/bits.db")
        );
        assert_eq!(config.ingest.concurrency, 4);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.max_chunk_size = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LearnBitsError::InvalidConfiguration { .. }));
    }

    #[test]
    fn negative_chunk_size_fails_to_parse() {
        let result: std::result::Result<AppConfig, _> =
            toml::from_str("[pipeline]\nmax_chunk_size = -5\n");
        assert!(result.is_err());
    }

    #[test]
    fn min_support_below_two_is_rejected() {
        let mut config = AppConfig::default();
        config.analysis.min_support = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_category_weight_is_rejected() {
        let mut config = AppConfig::default();
        config.scoring.category_weights.insert("poetry".into(), 0.5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("poetry"));
    }

    #[test]
    fn tilde_db_path_expands() {
        let config = StorageConfig::default();
        let path = config.resolved_db_path().expect("resolve");
        assert!(path.ends_with(".learnbits/learnbits.db"));
    }
}
