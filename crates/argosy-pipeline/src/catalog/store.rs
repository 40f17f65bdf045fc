//! Durable catalog store
//!
//! The store is the single source of truth for what the pipeline knows
//! about each remote archive. All mutations are per-key atomic upserts;
//! nothing does a read-modify-write across the table. Connectivity loss
//! maps to `PipelineError::Store`, which aborts the run.

use crate::error::Result;
use crate::types::{CatalogRecord, DownloadStatus, EntryKey, IndexEntry, Region, Selector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

/// Per-status record totals for one selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub partial: u64,
    pub complete: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.partial + self.complete + self.failed
    }
}

/// Durable index of catalog records, keyed by (region, year, platform, cycle)
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert or refresh entries; returns the number of rows affected.
    ///
    /// Idempotent: re-upserting a known key never duplicates it. Conflicts
    /// refresh `remote_path`, fill `size_bytes`/`checksum` from non-null
    /// incoming values, and move `last_verified_at` forward only. A record
    /// already `complete` whose remote size changed is reset to `pending`.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<u64>;

    /// Records for the selector not yet `complete`, in key order
    async fn list_pending(&self, selector: Selector) -> Result<Vec<CatalogRecord>>;

    /// Records for the selector marked `complete`, in key order
    async fn list_complete(&self, selector: Selector) -> Result<Vec<CatalogRecord>>;

    /// Record a download status transition for one key
    async fn mark(&self, key: &EntryKey, status: DownloadStatus) -> Result<()>;

    /// Per-status totals for the selector
    async fn status_counts(&self, selector: Selector) -> Result<StatusCounts>;
}

/// PostgreSQL-backed catalog store
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const UPSERT_SQL: &str = r#"
INSERT INTO float_archive_index (
    region, year, platform_id, cycle_number, remote_path,
    size_bytes, checksum, first_seen_at, last_verified_at, download_status
)
VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW(), 'pending')
ON CONFLICT (region, year, platform_id, cycle_number) DO UPDATE SET
    remote_path = EXCLUDED.remote_path,
    size_bytes = COALESCE(EXCLUDED.size_bytes, float_archive_index.size_bytes),
    checksum = COALESCE(EXCLUDED.checksum, float_archive_index.checksum),
    last_verified_at = GREATEST(float_archive_index.last_verified_at, EXCLUDED.last_verified_at),
    download_status = CASE
        WHEN float_archive_index.download_status = 'complete'
             AND EXCLUDED.size_bytes IS NOT NULL
             AND float_archive_index.size_bytes IS DISTINCT FROM EXCLUDED.size_bytes
        THEN 'pending'
        ELSE float_archive_index.download_status
    END
"#;

const SELECT_COLUMNS: &str = r#"
SELECT region, year, platform_id, cycle_number, remote_path,
       size_bytes, checksum, first_seen_at, last_verified_at, download_status
FROM float_archive_index
"#;

/// Row mapping for the catalog table
#[derive(Debug, sqlx::FromRow)]
struct CatalogRow {
    region: String,
    year: i32,
    platform_id: String,
    cycle_number: i32,
    remote_path: String,
    size_bytes: Option<i64>,
    checksum: Option<String>,
    first_seen_at: DateTime<Utc>,
    last_verified_at: DateTime<Utc>,
    download_status: String,
}

impl CatalogRow {
    fn into_record(self) -> Result<CatalogRecord> {
        let region: Region = self.region.parse()?;
        Ok(CatalogRecord {
            region,
            year: self.year as u16,
            platform_id: self.platform_id,
            cycle_number: self.cycle_number,
            remote_path: self.remote_path,
            size_bytes: self.size_bytes,
            checksum: self.checksum,
            first_seen_at: self.first_seen_at,
            last_verified_at: self.last_verified_at,
            download_status: DownloadStatus::from(self.download_status),
        })
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<u64> {
        let mut affected = 0u64;

        for entry in entries {
            let result = sqlx::query(UPSERT_SQL)
                .bind(entry.region.as_str())
                .bind(entry.year as i32)
                .bind(&entry.platform_id)
                .bind(entry.cycle_number)
                .bind(&entry.remote_path)
                .bind(entry.size_bytes)
                .bind(entry.checksum.as_deref())
                .execute(&self.pool)
                .await?;
            affected += result.rows_affected();
        }

        debug!(entries = entries.len(), affected, "catalog upsert complete");
        Ok(affected)
    }

    async fn list_pending(&self, selector: Selector) -> Result<Vec<CatalogRecord>> {
        let sql = format!(
            "{} WHERE region = $1 AND year = $2 AND download_status <> 'complete' \
             ORDER BY platform_id, cycle_number",
            SELECT_COLUMNS
        );
        let rows: Vec<CatalogRow> = sqlx::query_as(&sql)
            .bind(selector.region.as_str())
            .bind(selector.year as i32)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CatalogRow::into_record).collect()
    }

    async fn list_complete(&self, selector: Selector) -> Result<Vec<CatalogRecord>> {
        let sql = format!(
            "{} WHERE region = $1 AND year = $2 AND download_status = 'complete' \
             ORDER BY platform_id, cycle_number",
            SELECT_COLUMNS
        );
        let rows: Vec<CatalogRow> = sqlx::query_as(&sql)
            .bind(selector.region.as_str())
            .bind(selector.year as i32)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CatalogRow::into_record).collect()
    }

    async fn mark(&self, key: &EntryKey, status: DownloadStatus) -> Result<()> {
        sqlx::query(
            "UPDATE float_archive_index \
             SET download_status = $5, last_verified_at = NOW() \
             WHERE region = $1 AND year = $2 AND platform_id = $3 AND cycle_number = $4",
        )
        .bind(key.region.as_str())
        .bind(key.year as i32)
        .bind(&key.platform_id)
        .bind(key.cycle_number)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn status_counts(&self, selector: Selector) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT download_status, COUNT(*) FROM float_archive_index \
             WHERE region = $1 AND year = $2 GROUP BY download_status",
        )
        .bind(selector.region.as_str())
        .bind(selector.year as i32)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match DownloadStatus::from(status) {
                DownloadStatus::Pending => counts.pending += count,
                DownloadStatus::Partial => counts.partial += count,
                DownloadStatus::Complete => counts.complete += count,
                DownloadStatus::Failed => counts.failed += count,
            }
        }

        Ok(counts)
    }
}
