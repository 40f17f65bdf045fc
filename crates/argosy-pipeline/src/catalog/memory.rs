//! In-memory catalog store
//!
//! Mirrors the PostgreSQL upsert semantics over a BTreeMap. Used by the
//! test suite and by dry runs, where durable state is not wanted.

use crate::catalog::store::{CatalogStore, StatusCounts};
use crate::error::Result;
use crate::types::{CatalogRecord, DownloadStatus, EntryKey, IndexEntry, Selector};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Volatile catalog store with the same conflict semantics as PostgreSQL
#[derive(Default)]
pub struct MemoryCatalogStore {
    records: Mutex<BTreeMap<EntryKey, CatalogRecord>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, in key order
    pub async fn snapshot(&self) -> Vec<CatalogRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<u64> {
        let mut records = self.records.lock().await;
        let now = Utc::now();
        let mut affected = 0u64;

        for entry in entries {
            let key = entry.key();
            match records.get_mut(&key) {
                Some(existing) => {
                    let size_changed = entry.size_bytes.is_some()
                        && existing.size_bytes != entry.size_bytes;
                    if existing.download_status == DownloadStatus::Complete && size_changed {
                        existing.download_status = DownloadStatus::Pending;
                    }
                    existing.remote_path = entry.remote_path.clone();
                    if entry.size_bytes.is_some() {
                        existing.size_bytes = entry.size_bytes;
                    }
                    if entry.checksum.is_some() {
                        existing.checksum = entry.checksum.clone();
                    }
                    if now > existing.last_verified_at {
                        existing.last_verified_at = now;
                    }
                }
                None => {
                    records.insert(
                        key,
                        CatalogRecord {
                            region: entry.region,
                            year: entry.year,
                            platform_id: entry.platform_id.clone(),
                            cycle_number: entry.cycle_number,
                            remote_path: entry.remote_path.clone(),
                            size_bytes: entry.size_bytes,
                            checksum: entry.checksum.clone(),
                            first_seen_at: now,
                            last_verified_at: now,
                            download_status: DownloadStatus::Pending,
                        },
                    );
                }
            }
            affected += 1;
        }

        Ok(affected)
    }

    async fn list_pending(&self, selector: Selector) -> Result<Vec<CatalogRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| {
                r.region == selector.region
                    && r.year == selector.year
                    && r.download_status != DownloadStatus::Complete
            })
            .cloned()
            .collect())
    }

    async fn list_complete(&self, selector: Selector) -> Result<Vec<CatalogRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| {
                r.region == selector.region
                    && r.year == selector.year
                    && r.download_status == DownloadStatus::Complete
            })
            .cloned()
            .collect())
    }

    async fn mark(&self, key: &EntryKey, status: DownloadStatus) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(key) {
            record.download_status = status;
            record.last_verified_at = Utc::now();
        }
        Ok(())
    }

    async fn status_counts(&self, selector: Selector) -> Result<StatusCounts> {
        let records = self.records.lock().await;
        let mut counts = StatusCounts::default();
        for record in records.values() {
            if record.region != selector.region || record.year != selector.year {
                continue;
            }
            match record.download_status {
                DownloadStatus::Pending => counts.pending += 1,
                DownloadStatus::Partial => counts.partial += 1,
                DownloadStatus::Complete => counts.complete += 1,
                DownloadStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::Region;

    fn selector() -> Selector {
        Selector::new(Region::Pacific, 2015).unwrap()
    }

    fn entry(platform: &str, cycle: i32) -> IndexEntry {
        IndexEntry {
            region: Region::Pacific,
            year: 2015,
            platform_id: platform.to_string(),
            cycle_number: cycle,
            remote_path: format!("aoml/{}/profiles/R{}_{:03}.nc", platform, platform, cycle),
            size_bytes: Some(1024),
            checksum: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates_keys() {
        let store = MemoryCatalogStore::new();
        let e = entry("5900001", 1);

        assert_eq!(store.upsert(&[e.clone()]).await.unwrap(), 1);
        assert_eq!(store.upsert(&[e.clone()]).await.unwrap(), 1);

        assert_eq!(store.snapshot().await.len(), 1);
        assert_eq!(store.status_counts(selector()).await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_upsert_moves_last_verified_forward_only() {
        let store = MemoryCatalogStore::new();
        let e = entry("5900001", 1);

        store.upsert(&[e.clone()]).await.unwrap();
        let first = store.snapshot().await[0].last_verified_at;

        store.upsert(&[e]).await.unwrap();
        let second = store.snapshot().await[0].last_verified_at;
        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_size_change_resets_complete_records() {
        let store = MemoryCatalogStore::new();
        let mut e = entry("5900001", 1);

        store.upsert(&[e.clone()]).await.unwrap();
        store.mark(&e.key(), DownloadStatus::Complete).await.unwrap();
        assert_eq!(store.list_complete(selector()).await.unwrap().len(), 1);

        // Same size: stays complete
        store.upsert(&[e.clone()]).await.unwrap();
        assert_eq!(store.list_complete(selector()).await.unwrap().len(), 1);

        // Remote republished with a different size: back to pending
        e.size_bytes = Some(2048);
        store.upsert(&[e.clone()]).await.unwrap();
        assert!(store.list_complete(selector()).await.unwrap().is_empty());
        let pending = store.list_pending(selector()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].size_bytes, Some(2048));
    }

    #[tokio::test]
    async fn test_upsert_does_not_erase_known_metadata() {
        let store = MemoryCatalogStore::new();
        let mut e = entry("5900001", 1);
        e.checksum = Some("abc123".to_string());
        store.upsert(&[e.clone()]).await.unwrap();

        // A later inventory without size/checksum keeps the known values
        e.size_bytes = None;
        e.checksum = None;
        store.upsert(&[e]).await.unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot[0].size_bytes, Some(1024));
        assert_eq!(snapshot[0].checksum.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_list_pending_excludes_complete_and_sorts() {
        let store = MemoryCatalogStore::new();
        let a = entry("5900002", 4);
        let b = entry("5900001", 9);
        let c = entry("5900001", 2);
        store.upsert(&[a.clone(), b, c]).await.unwrap();
        store.mark(&a.key(), DownloadStatus::Complete).await.unwrap();

        let pending = store.list_pending(selector()).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].platform_id, "5900001");
        assert_eq!(pending[0].cycle_number, 2);
        assert_eq!(pending[1].cycle_number, 9);
    }
}
