//! Existence audit: catalog vs. local filesystem
//!
//! Pure diff stage. For every record not yet `complete` it stats the
//! expected local path and decides between "already have it" (record is
//! marked complete and excluded), "resume from a verified prefix", and
//! "fetch from scratch". No network I/O happens here, and a file is only
//! ever fully re-read when the catalog carries a checksum for it.

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::layout::DataLayout;
use crate::types::{CatalogRecord, DownloadStatus, DownloadTask, Selector};
use argosy_common::checksum::compute_file_checksum_async;
use std::path::PathBuf;
use tracing::{debug, info};

/// Tasks plus the counters the run summary reports
#[derive(Debug, Default)]
pub struct AuditOutcome {
    pub tasks: Vec<DownloadTask>,
    /// Records whose local file passed verification during this audit
    pub verified_complete: u64,
    /// Tasks created with a non-zero resume offset
    pub resumable: u64,
    /// Tasks created because no local file existed
    pub missing: u64,
    /// Tasks created because the local file failed verification
    pub invalid: u64,
}

/// Computes the missing/incomplete set for a selector
pub struct ExistenceAuditor {
    layout: DataLayout,
}

impl ExistenceAuditor {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// Diff every non-complete catalog record against local storage
    pub async fn audit(
        &self,
        store: &dyn CatalogStore,
        selector: Selector,
    ) -> Result<AuditOutcome> {
        let records = store.list_pending(selector).await?;
        let mut outcome = AuditOutcome::default();

        for record in records {
            let dest = self.layout.archive_path(selector, &record.remote_path);
            self.audit_record(store, selector, record, dest, &mut outcome)
                .await?;
        }

        info!(
            selector = %selector,
            tasks = outcome.tasks.len(),
            verified = outcome.verified_complete,
            resumable = outcome.resumable,
            missing = outcome.missing,
            invalid = outcome.invalid,
            "existence audit complete"
        );

        Ok(outcome)
    }

    async fn audit_record(
        &self,
        store: &dyn CatalogStore,
        _selector: Selector,
        record: CatalogRecord,
        dest: PathBuf,
        outcome: &mut AuditOutcome,
    ) -> Result<()> {
        let local_len = match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => {
                // Something non-file squats on the path; let the download
                // stage surface the error for this one task.
                debug!(path = %dest.display(), "expected archive path is not a regular file");
                outcome.invalid += 1;
                outcome.tasks.push(make_task(&record, dest, 0));
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                outcome.missing += 1;
                outcome.tasks.push(make_task(&record, dest, 0));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let expected_len = record.size_bytes.map(|len| len.max(0) as u64);

        // A short file resumes from its length; the prefix is the best
        // verified state available without per-range checksums.
        if let Some(expected) = expected_len {
            if local_len < expected {
                store.mark(&record.key(), DownloadStatus::Partial).await?;
                outcome.resumable += 1;
                outcome.tasks.push(make_task(&record, dest, local_len));
                return Ok(());
            }
            if local_len > expected {
                debug!(
                    key = %record.key(),
                    local_len,
                    expected,
                    "local file longer than catalog size; discarding"
                );
                outcome.invalid += 1;
                outcome.tasks.push(make_task(&record, dest, 0));
                return Ok(());
            }
        }

        // Full-length (or unsized) file: strongest available check.
        if let Some(expected_sum) = record.checksum.as_deref() {
            match compute_file_checksum_async(&dest).await {
                Ok(actual) if actual.eq_ignore_ascii_case(expected_sum) => {
                    store.mark(&record.key(), DownloadStatus::Complete).await?;
                    outcome.verified_complete += 1;
                }
                Ok(actual) => {
                    debug!(
                        key = %record.key(),
                        expected = expected_sum,
                        actual = %actual,
                        "checksum mismatch during audit"
                    );
                    outcome.invalid += 1;
                    outcome.tasks.push(make_task(&record, dest, 0));
                }
                Err(e) => {
                    debug!(key = %record.key(), error = %e, "failed to hash local file");
                    outcome.invalid += 1;
                    outcome.tasks.push(make_task(&record, dest, 0));
                }
            }
            return Ok(());
        }

        if expected_len.is_some() {
            // Length already matched above
            store.mark(&record.key(), DownloadStatus::Complete).await?;
            outcome.verified_complete += 1;
        } else if local_len > 0 {
            // No verification metadata at all; a non-empty file is accepted
            debug!(key = %record.key(), "accepting local file without verification metadata");
            store.mark(&record.key(), DownloadStatus::Complete).await?;
            outcome.verified_complete += 1;
        } else {
            outcome.invalid += 1;
            outcome.tasks.push(make_task(&record, dest, 0));
        }

        Ok(())
    }
}

fn make_task(record: &CatalogRecord, dest: PathBuf, resume_offset: u64) -> DownloadTask {
    DownloadTask {
        key: record.key(),
        remote_path: record.remote_path.clone(),
        dest,
        resume_offset,
        attempt: 0,
        size_bytes: record.size_bytes,
        checksum: record.checksum.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalogStore;
    use crate::types::{IndexEntry, Region};
    use argosy_common::checksum::compute_checksum;

    fn selector() -> Selector {
        Selector::new(Region::Indian, 2010).unwrap()
    }

    fn entry(platform: &str, size: Option<i64>, checksum: Option<String>) -> IndexEntry {
        IndexEntry {
            region: Region::Indian,
            year: 2010,
            platform_id: platform.to_string(),
            cycle_number: 1,
            remote_path: format!("incois/{}/profiles/R{}_001.nc", platform, platform),
            size_bytes: size,
            checksum,
        }
    }

    async fn seed(store: &MemoryCatalogStore, entries: &[IndexEntry]) {
        store.upsert(entries).await.unwrap();
    }

    fn write_local(layout: &DataLayout, entry: &IndexEntry, bytes: &[u8]) {
        let path = layout.archive_path(selector(), &entry.remote_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn test_layout(dir: &tempfile::TempDir) -> DataLayout {
        DataLayout::new(dir.path().join("archives"), dir.path().join("out"))
    }

    #[tokio::test]
    async fn test_audit_returns_n_minus_m_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = test_layout(&dir);
        let store = MemoryCatalogStore::new();

        let entries: Vec<_> = (0..5)
            .map(|i| entry(&format!("290000{}", i), Some(8), None))
            .collect();
        seed(&store, &entries).await;

        // Two of five already have full-length local files
        write_local(&layout, &entries[1], b"8bytes!!");
        write_local(&layout, &entries[3], b"8bytes!!");

        let auditor = ExistenceAuditor::new(layout);
        let outcome = auditor.audit(&store, selector()).await.unwrap();

        assert_eq!(outcome.tasks.len(), 3);
        assert_eq!(outcome.verified_complete, 2);
        assert_eq!(outcome.missing, 3);
        assert_eq!(store.list_complete(selector()).await.unwrap().len(), 2);
        assert!(outcome.tasks.iter().all(|t| t.resume_offset == 0));
    }

    #[tokio::test]
    async fn test_audit_short_file_resumes_from_length() {
        let dir = tempfile::tempdir().unwrap();
        let layout = test_layout(&dir);
        let store = MemoryCatalogStore::new();

        let e = entry("2900100", Some(100), None);
        seed(&store, &[e.clone()]).await;
        write_local(&layout, &e, &[0u8; 40]);

        let auditor = ExistenceAuditor::new(layout);
        let outcome = auditor.audit(&store, selector()).await.unwrap();

        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].resume_offset, 40);
        assert_eq!(outcome.resumable, 1);

        let pending = store.list_pending(selector()).await.unwrap();
        assert_eq!(pending[0].download_status, DownloadStatus::Partial);
    }

    #[tokio::test]
    async fn test_audit_oversized_file_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let layout = test_layout(&dir);
        let store = MemoryCatalogStore::new();

        let e = entry("2900101", Some(10), None);
        seed(&store, &[e.clone()]).await;
        write_local(&layout, &e, &[0u8; 25]);

        let auditor = ExistenceAuditor::new(layout);
        let outcome = auditor.audit(&store, selector()).await.unwrap();

        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].resume_offset, 0);
        assert_eq!(outcome.invalid, 1);
    }

    #[tokio::test]
    async fn test_audit_checksum_decides_for_full_length_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = test_layout(&dir);
        let store = MemoryCatalogStore::new();

        let payload = b"netcdf-archive-bytes";
        let good_sum = compute_checksum(&mut &payload[..]).unwrap();

        let good = entry("2900102", Some(payload.len() as i64), Some(good_sum));
        let bad = entry(
            "2900103",
            Some(payload.len() as i64),
            Some("0".repeat(64)),
        );
        seed(&store, &[good.clone(), bad.clone()]).await;
        write_local(&layout, &good, payload);
        write_local(&layout, &bad, payload);

        let auditor = ExistenceAuditor::new(layout);
        let outcome = auditor.audit(&store, selector()).await.unwrap();

        assert_eq!(outcome.verified_complete, 1);
        assert_eq!(outcome.invalid, 1);
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].key, bad.key());
        assert_eq!(outcome.tasks[0].resume_offset, 0);
    }

    #[tokio::test]
    async fn test_audit_without_metadata_accepts_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = test_layout(&dir);
        let store = MemoryCatalogStore::new();

        let nonempty = entry("2900104", None, None);
        let empty = entry("2900105", None, None);
        seed(&store, &[nonempty.clone(), empty.clone()]).await;
        write_local(&layout, &nonempty, b"something");
        write_local(&layout, &empty, b"");

        let auditor = ExistenceAuditor::new(layout);
        let outcome = auditor.audit(&store, selector()).await.unwrap();

        assert_eq!(outcome.verified_complete, 1);
        assert_eq!(outcome.tasks.len(), 1);
        assert_eq!(outcome.tasks[0].key, empty.key());
    }
}
