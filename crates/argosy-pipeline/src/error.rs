//! Error types for the acquisition pipeline
//!
//! Fatality is part of the contract: `CatalogUnavailable` and `Store`
//! abort a run (nothing downstream can produce correct results without the
//! index), while download, verification, and decode failures are contained
//! at their task boundary and surface through the run summary instead.

use crate::types::EntryKey;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for the acquisition pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    #[error("Catalog store unavailable: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Download failed for {key}: {reason}")]
    DownloadFailed { key: EntryKey, reason: String },

    #[error("Verification mismatch for {key}: {reason}")]
    VerificationMismatch { key: EntryKey, reason: String },

    #[error("Decode error in {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Shard error: {0}")]
    Shard(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<regex::Error> for PipelineError {
    fn from(err: regex::Error) -> Self {
        PipelineError::CatalogParse(err.to_string())
    }
}

impl From<argosy_common::ArgosyError> for PipelineError {
    fn from(err: argosy_common::ArgosyError) -> Self {
        match err {
            argosy_common::ArgosyError::Io(e) => PipelineError::Io(e),
            other => PipelineError::Validation(other.to_string()),
        }
    }
}

impl From<arrow::error::ArrowError> for PipelineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        PipelineError::Shard(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for PipelineError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        PipelineError::Shard(err.to_string())
    }
}

impl PipelineError {
    /// Whether this error must abort the whole run rather than a single task
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::CatalogUnavailable(_)
                | PipelineError::CatalogParse(_)
                | PipelineError::Store(_)
        )
    }
}
