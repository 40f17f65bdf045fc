//! Pipeline runner
//!
//! Owns the stage order and the failure policy: catalog and store errors
//! abort the run, per-archive failures are contained and counted, and
//! cancellation is honored between stages (downloads checkpoint inside
//! their stage). Every run gets a fresh id that ends up in shard and
//! dataset provenance.
//!
//! Conversion never reprocesses only this run's downloads: it reads the
//! full complete set from the store, so a run interrupted anywhere still
//! converges on the next invocation.

use crate::audit::ExistenceAuditor;
use crate::catalog::{CatalogClient, CatalogStore};
use crate::config::PipelineConfig;
use crate::convert::{ArchiveDecoder, ConversionWorker, NetcdfDecoder};
use crate::download::Downloader;
use crate::error::{PipelineError, Result};
use crate::layout::DataLayout;
use crate::merge::{MergeAssembler, MergedDataset};
use crate::progress::{NullObserver, ProgressObserver, Stage};
use crate::types::{LocalFileDescriptor, Selector, VerifyToken};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything one run did, stage by stage
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub selector: Selector,
    pub catalog_entries: u64,
    pub catalog_rejected: u64,
    pub upserted: u64,
    pub audit_verified: u64,
    pub audit_resumable: u64,
    pub audit_missing: u64,
    pub audit_invalid: u64,
    pub download_tasks: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub downloads_cancelled: u64,
    pub downloads_unstarted: u64,
    pub peak_in_flight: usize,
    pub archives_decoded: u64,
    pub archives_skipped: u64,
    pub archives_missing_salinity: u64,
    pub shards_written: u64,
    pub rows_written: u64,
    pub merged: Option<MergedDataset>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(run_id: String, selector: Selector) -> Self {
        Self {
            run_id,
            selector,
            catalog_entries: 0,
            catalog_rejected: 0,
            upserted: 0,
            audit_verified: 0,
            audit_resumable: 0,
            audit_missing: 0,
            audit_invalid: 0,
            download_tasks: 0,
            downloads_completed: 0,
            downloads_failed: 0,
            downloads_cancelled: 0,
            downloads_unstarted: 0,
            peak_in_flight: 0,
            archives_decoded: 0,
            archives_skipped: 0,
            archives_missing_salinity: 0,
            shards_written: 0,
            rows_written: 0,
            merged: None,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    /// True when every archive reached the merged dataset
    ///
    /// Rejected inventory rows do not count against success: they are
    /// upstream junk a re-run cannot repair. Everything else unresolved
    /// (failed downloads, skipped decodes, cancellation, a missing merge)
    /// leaves work behind and the run is not a success.
    pub fn success(&self) -> bool {
        !self.cancelled
            && self.downloads_failed == 0
            && self.downloads_cancelled == 0
            && self.downloads_unstarted == 0
            && self.archives_skipped == 0
            && self.merged.is_some()
    }
}

/// Wires the six stages together for one selector at a time
pub struct Pipeline {
    layout: DataLayout,
    store: Arc<dyn CatalogStore>,
    catalog: CatalogClient,
    downloader: Downloader,
    converter: ConversionWorker,
    merger: MergeAssembler,
    observer: Arc<dyn ProgressObserver>,
}

impl Pipeline {
    /// Pipeline with the production NetCDF decoder
    pub fn new(config: PipelineConfig, store: Arc<dyn CatalogStore>) -> Result<Self> {
        Self::with_decoder(config, store, Arc::new(NetcdfDecoder::new()))
    }

    /// Pipeline with a caller-supplied archive decoder
    pub fn with_decoder(
        config: PipelineConfig,
        store: Arc<dyn CatalogStore>,
        decoder: Arc<dyn ArchiveDecoder>,
    ) -> Result<Self> {
        config.validate().map_err(PipelineError::Validation)?;

        let layout = DataLayout::new(&config.archive_root, &config.output_root);
        let catalog = CatalogClient::new(&config)?;
        let downloader = Downloader::new(&config)?;
        let converter = ConversionWorker::new(&config, layout.clone(), decoder);
        let merger = MergeAssembler::new(layout.clone());

        Ok(Self {
            layout,
            store,
            catalog,
            downloader,
            converter,
            merger,
            observer: Arc::new(NullObserver),
        })
    }

    /// Attach a progress observer; every stage reports through it
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.downloader = self.downloader.with_observer(Arc::clone(&observer));
        self.converter = self.converter.with_observer(Arc::clone(&observer));
        self.observer = observer;
        self
    }

    /// Run the full stage chain for one selector
    ///
    /// Fatal errors (catalog retrieval/parse, store connectivity)
    /// propagate as `Err`. Contained failures end up as counters in the
    /// summary. Cancellation stops the run at the next stage boundary
    /// and returns the summary of what completed.
    pub async fn run(&self, selector: Selector, cancel: &CancellationToken) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut summary = RunSummary::new(run_id.clone(), selector);
        info!(run_id = %run_id, selector = %selector, "pipeline run starting");

        // Fetch the remote catalog and make it durable
        self.observer.stage_started(Stage::Catalog, 0);
        let fetch = self.catalog.fetch(selector).await?;
        summary.catalog_entries = fetch.entries.len() as u64;
        summary.catalog_rejected = fetch.rejected_rows as u64;
        summary.upserted = self.store.upsert(&fetch.entries).await?;
        self.observer
            .stage_finished(Stage::Catalog, summary.catalog_entries);

        if cancel.is_cancelled() {
            return Ok(self.finish(summary, started, true));
        }

        // Diff the catalog against local storage
        self.observer.stage_started(Stage::Audit, 0);
        let auditor = ExistenceAuditor::new(self.layout.clone());
        let audit = auditor.audit(self.store.as_ref(), selector).await?;
        summary.audit_verified = audit.verified_complete;
        summary.audit_resumable = audit.resumable;
        summary.audit_missing = audit.missing;
        summary.audit_invalid = audit.invalid;
        summary.download_tasks = audit.tasks.len() as u64;
        self.observer
            .stage_finished(Stage::Audit, summary.download_tasks);

        if cancel.is_cancelled() {
            return Ok(self.finish(summary, started, true));
        }

        // Transfer whatever the audit asked for
        let report = self
            .downloader
            .run(audit.tasks, Arc::clone(&self.store), cancel)
            .await?;
        summary.downloads_completed = report.completed.len() as u64;
        summary.downloads_failed = report.failure_count();
        summary.downloads_cancelled = report.cancelled;
        summary.downloads_unstarted = report.unstarted;
        summary.peak_in_flight = report.peak_in_flight;

        if cancel.is_cancelled() {
            info!(run_id = %run_id, "run cancelled; download state checkpointed");
            return Ok(self.finish(summary, started, true));
        }

        if summary.downloads_failed > 0 {
            warn!(
                run_id = %run_id,
                failed = summary.downloads_failed,
                "continuing past failed downloads; their records stay failed"
            );
        }

        // Convert the full complete set, not just this run's downloads
        let archives = self.conversion_inputs(selector).await?;
        let conversion = self.converter.run(selector, archives, &run_id).await?;
        summary.archives_decoded = conversion.archives_decoded;
        summary.archives_skipped = conversion.archives_skipped;
        summary.archives_missing_salinity = conversion.archives_missing_salinity;
        summary.shards_written = conversion.shards.len() as u64;
        summary.rows_written = conversion.rows_written;

        if cancel.is_cancelled() {
            return Ok(self.finish(summary, started, true));
        }

        // Merge every shard into the final dataset
        self.observer.stage_started(Stage::Merge, 0);
        let merged = self.merger.merge(selector, &run_id).await?;
        self.observer.stage_finished(Stage::Merge, merged.rows);
        summary.merged = Some(merged);

        Ok(self.finish(summary, started, false))
    }

    /// Complete catalog records resolved to their local archive files
    async fn conversion_inputs(&self, selector: Selector) -> Result<Vec<LocalFileDescriptor>> {
        let records = self.store.list_complete(selector).await?;
        let mut archives = Vec::with_capacity(records.len());
        for record in records {
            let path = self.layout.archive_path(selector, &record.remote_path);
            // A vanished file surfaces as a decode failure, which the
            // conversion stage contains and counts.
            let len = tokio::fs::metadata(&path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0);
            archives.push(LocalFileDescriptor {
                key: record.key(),
                token: VerifyToken::from_metadata(record.size_bytes, record.checksum.as_deref()),
                path,
                len,
            });
        }
        Ok(archives)
    }

    fn finish(&self, mut summary: RunSummary, started: Instant, cancelled: bool) -> RunSummary {
        summary.cancelled = cancelled;
        summary.elapsed = started.elapsed();
        info!(
            run_id = %summary.run_id,
            selector = %summary.selector,
            cancelled,
            success = summary.success(),
            downloads_completed = summary.downloads_completed,
            downloads_failed = summary.downloads_failed,
            rows_written = summary.rows_written,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline run finished"
        );
        summary
    }
}
