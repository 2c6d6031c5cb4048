//! Error types for LearnBits.
//!
//! Library crates use [`LearnBitsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all LearnBits operations.
#[derive(Debug, thiserror::Error)]
pub enum LearnBitsError {
    /// Configuration file could not be loaded or parsed.
    #[error("config error: {message}")]
    Config { message: String },

    /// A pipeline component was constructed with invalid parameters.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The backing store could not be opened or reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Any other storage layer failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Lookup by hash or id found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Work was stopped through a cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Network/HTTP error from the content fetcher.
    #[error("network error: {0}")]
    Network(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LearnBitsError>;

impl LearnBitsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-configuration error from any displayable message.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the failed ingestion may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::Network(_) | Self::Cancelled
        )
    }
}
