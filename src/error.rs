//! Error types for episode-db
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Only dataset-level failures surface as [`Error`]. Per-artifact and
//! per-feature problems are collected into the curation, deletion and
//! aggregation reports instead of aborting the batch.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// episode-db error types
#[derive(Error, Debug)]
pub enum Error {
    /// Dataset root, metadata log or episode artifacts are absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Some but not all expected artifacts exist, or a log line is malformed
    #[error("Inconsistent dataset: {0}")]
    Inconsistent(String),

    /// Aggregated statistics would be non-finite or divide by zero
    #[error("Numeric invariant violated for feature '{feature}': {reason}\nRefusing to emit a normalization entry for it.")]
    NumericInvariant {
        /// Feature name
        feature: String,
        /// What went wrong
        reason: String,
    },

    /// Per-episode statistic arrays cannot be combined
    #[error("Shape mismatch for feature '{feature}' in episode {episode}: {detail}")]
    ShapeMismatch {
        /// Offending episode index
        episode: u64,
        /// Feature name
        feature: String,
        /// Shapes involved
        detail: String,
    },

    /// Every episode was filtered out by curation
    #[error("No good episodes found: all {total} episodes were rejected\nNothing to curate into.")]
    NoGoodEpisodes {
        /// Episodes considered
        total: u64,
    },

    /// Aggregation received nothing it could combine
    #[error("No statistics to aggregate: {0}")]
    NoStatistics(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (Parquet/Arrow data files)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
    /// Build a [`Error::NumericInvariant`]
    pub fn numeric(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NumericInvariant {
            feature: feature.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means something was absent on disk
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
