//! Error types for the Argosy CLI
//!
//! User-facing errors with actionable messages: what went wrong and what
//! to try next. Stage-internal failures stay inside the pipeline crate;
//! everything surfacing here is printable as-is.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database operation failed (sqlx)
    #[error("Database error: {0}. Check DATABASE_URL and that PostgreSQL is reachable.")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}. The catalog schema could not be brought up to date; check the database and re-run.")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A pipeline stage failed fatally
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] argosy_pipeline::PipelineError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// The run finished but left unresolved work behind
    #[error("Run incomplete: {0}. Re-run the same selector to retry; per-archive reasons are in the logs.")]
    RunIncomplete(String),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a run-incomplete error
    pub fn run_incomplete(msg: impl Into<String>) -> Self {
        Self::RunIncomplete(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_a_next_step() {
        let err = CliError::config("DATABASE_URL is not set. Export it or pass --database-url.");
        assert!(err.to_string().contains("--database-url"));

        let err = CliError::run_incomplete("2 downloads failed");
        assert!(err.to_string().contains("Re-run"));
    }
}
