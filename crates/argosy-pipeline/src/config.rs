//! Pipeline configuration
//!
//! All tunables live in one struct assembled at the CLI boundary; no
//! component reads environment variables directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CATALOG_BASE_URL: &str =
    "https://www.ncei.noaa.gov/data/oceans/argo/gadr/inv/basins";
pub const DEFAULT_DATA_BASE_URL: &str = "https://www.ncei.noaa.gov/data/oceans/argo/gadr/data";
pub const DEFAULT_ARCHIVE_ROOT: &str = "data";
pub const DEFAULT_OUTPUT_ROOT: &str = "processed_data";
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 5;
pub const DEFAULT_CONVERT_WORKERS: usize = 4;
pub const DEFAULT_SHARD_MAX_ROWS: usize = 100_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

pub const USER_AGENT: &str = "Argosy-Float-Ingester/0.1";

/// Tunables for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base URL serving per-region/year inventory listings
    pub catalog_base_url: String,
    /// Base URL serving the archive files themselves
    pub data_base_url: String,
    /// Local root the downloaded archives are materialized under
    pub archive_root: PathBuf,
    /// Local root for batch shards and the merged dataset
    pub output_root: PathBuf,
    /// Simultaneous download transfers
    pub download_concurrency: usize,
    /// Simultaneous archive decodes
    pub convert_workers: usize,
    /// Rows accumulated before a batch shard is flushed
    pub shard_max_rows: usize,
    /// Download attempts per task before it is reported failed
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff
    pub retry_base_delay_ms: u64,
    /// Per-request HTTP timeout
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            data_base_url: DEFAULT_DATA_BASE_URL.to_string(),
            archive_root: PathBuf::from(DEFAULT_ARCHIVE_ROOT),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            convert_workers: DEFAULT_CONVERT_WORKERS,
            shard_max_rows: DEFAULT_SHARD_MAX_ROWS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog_base_url.is_empty() {
            return Err("catalog_base_url must not be empty".to_string());
        }
        if self.data_base_url.is_empty() {
            return Err("data_base_url must not be empty".to_string());
        }
        if self.download_concurrency == 0 {
            return Err("download_concurrency must be at least 1".to_string());
        }
        if self.convert_workers == 0 {
            return Err("convert_workers must be at least 1".to_string());
        }
        if self.shard_max_rows == 0 {
            return Err("shard_max_rows must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}
