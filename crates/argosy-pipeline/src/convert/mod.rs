//! Conversion stage: verified archives into parquet batch shards
//!
//! Decoding runs on blocking threads with at most `convert_workers`
//! archives in flight, and results are consumed in submission order, so
//! shard contents never depend on scheduling. Input archives are sorted
//! by catalog key first; the same complete set always yields the same
//! shard sequence.
//!
//! A conversion pass is a full rebuild: stale shards for the selector
//! are swept before any new shard is written. A decode failure skips
//! that archive and is counted; it never aborts the stage.

pub mod decode;
pub mod netcdf;
pub mod shard;

pub use decode::{juld_to_datetime, ArchiveDecoder, DecodedArchive, ObservationRow};
pub use netcdf::NetcdfDecoder;
pub use shard::{
    observation_schema, read_shard_rows, rows_to_batch, sweep_stale_shards, write_shard,
    BatchShard,
};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::layout::DataLayout;
use crate::progress::{NullObserver, ProgressObserver, Stage};
use crate::types::{LocalFileDescriptor, Selector};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Counters and shards produced by one conversion pass
#[derive(Debug, Default)]
pub struct ConversionOutcome {
    pub shards: Vec<BatchShard>,
    pub archives_decoded: u64,
    /// Archives dropped because their decode failed
    pub archives_skipped: u64,
    pub rows_written: u64,
    /// Archives carrying no salinity variable
    pub archives_missing_salinity: u64,
}

/// Converts complete archives into batch shards
pub struct ConversionWorker {
    layout: DataLayout,
    decoder: Arc<dyn ArchiveDecoder>,
    workers: usize,
    shard_max_rows: usize,
    observer: Arc<dyn ProgressObserver>,
}

impl ConversionWorker {
    pub fn new(
        config: &PipelineConfig,
        layout: DataLayout,
        decoder: Arc<dyn ArchiveDecoder>,
    ) -> Self {
        Self {
            layout,
            decoder,
            workers: config.convert_workers.max(1),
            shard_max_rows: config.shard_max_rows.max(1),
            observer: Arc::new(NullObserver),
        }
    }

    /// Replace the progress observer (silent by default)
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Rebuild the selector's shard set from the given archives
    pub async fn run(
        &self,
        selector: Selector,
        mut archives: Vec<LocalFileDescriptor>,
        run_id: &str,
    ) -> Result<ConversionOutcome> {
        archives.sort_by(|a, b| a.key.cmp(&b.key));

        let swept = {
            let layout = self.layout.clone();
            tokio::task::spawn_blocking(move || sweep_stale_shards(&layout, selector))
                .await
                .map_err(blocking_failure)??
        };

        let mut outcome = ConversionOutcome::default();
        if archives.is_empty() {
            info!(selector = %selector, swept, "no archives to convert");
            return Ok(outcome);
        }

        info!(
            selector = %selector,
            archives = archives.len(),
            workers = self.workers,
            swept,
            "starting conversion stage"
        );
        self.observer
            .stage_started(Stage::Convert, archives.len() as u64);

        // Buffered keeps completion order equal to submission order even
        // when decodes finish out of order.
        let mut decodes = stream::iter(archives)
            .map(|archive| {
                let decoder = Arc::clone(&self.decoder);
                async move {
                    let key = archive.key.clone();
                    let decoded =
                        tokio::task::spawn_blocking(move || decoder.decode(&archive)).await;
                    (key, decoded)
                }
            })
            .buffered(self.workers);

        let mut buffer: Vec<ObservationRow> = Vec::new();
        let mut batch_index = 0u32;

        while let Some((key, decoded)) = decodes.next().await {
            match decoded {
                Ok(Ok(archive)) => {
                    outcome.archives_decoded += 1;
                    if archive.missing_salinity {
                        outcome.archives_missing_salinity += 1;
                    }
                    buffer.extend(archive.rows);
                    // Shards only flush at archive boundaries; a shard may
                    // exceed the threshold by at most one archive's rows.
                    if buffer.len() >= self.shard_max_rows {
                        self.flush(selector, run_id, &mut buffer, &mut batch_index, &mut outcome)
                            .await?;
                    }
                }
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "archive decode failed; skipped");
                    outcome.archives_skipped += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "decode task aborted; archive skipped");
                    outcome.archives_skipped += 1;
                }
            }
            self.observer.item_finished(Stage::Convert);
        }

        if !buffer.is_empty() {
            self.flush(selector, run_id, &mut buffer, &mut batch_index, &mut outcome)
                .await?;
        }

        info!(
            selector = %selector,
            decoded = outcome.archives_decoded,
            skipped = outcome.archives_skipped,
            shards = outcome.shards.len(),
            rows = outcome.rows_written,
            missing_salinity = outcome.archives_missing_salinity,
            "conversion stage complete"
        );
        self.observer
            .stage_finished(Stage::Convert, outcome.archives_decoded);

        Ok(outcome)
    }

    async fn flush(
        &self,
        selector: Selector,
        run_id: &str,
        buffer: &mut Vec<ObservationRow>,
        batch_index: &mut u32,
        outcome: &mut ConversionOutcome,
    ) -> Result<()> {
        let rows = std::mem::take(buffer);
        let layout = self.layout.clone();
        let index = *batch_index;
        let run_id = run_id.to_string();

        let shard =
            tokio::task::spawn_blocking(move || write_shard(&layout, selector, index, &run_id, &rows))
                .await
                .map_err(blocking_failure)??;

        outcome.rows_written += shard.rows;
        outcome.shards.push(shard);
        *batch_index += 1;
        Ok(())
    }
}

/// A panicked shard write leaves the shard set incomplete; that is fatal
/// to the stage, unlike a per-archive decode failure.
fn blocking_failure(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Shard(format!("blocking task failed: {}", e))
}
