//! Database pool construction for CLI commands
//!
//! The catalog index lives in PostgreSQL. One pool is built per
//! invocation and pending migrations are applied before any command
//! touches the table, so a fresh database works on the first run.

use crate::error::{CliError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Connections held by one CLI invocation
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
/// Seconds to wait for the first connection before giving up
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connect to the catalog database and apply pending migrations
pub async fn connect(database_url: Option<&str>) -> Result<PgPool> {
    let url = database_url.filter(|url| !url.is_empty()).ok_or_else(|| {
        CliError::config(
            "DATABASE_URL is not set. Export it, pass --database-url, or use --dry-run to skip the database.",
        )
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .connect(url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("database pool ready, migrations applied");

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_url_is_a_config_error() {
        let err = connect(None).await.unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
        assert!(err.to_string().contains("--dry-run"));
    }

    #[tokio::test]
    async fn test_empty_url_is_a_config_error() {
        let err = connect(Some("")).await.unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }
}
