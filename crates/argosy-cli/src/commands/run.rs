//! `argosy run` command implementation
//!
//! Drives the full pipeline for one selector: catalog fetch, audit,
//! downloads, conversion, merge. Ctrl+C or SIGTERM requests cancellation;
//! in-flight work checkpoints and the next run with the same selector
//! resumes from the store.

use crate::db;
use crate::error::{CliError, Result};
use crate::progress::{format_bytes, ConsoleProgress};
use argosy_pipeline::{
    CatalogStore, MemoryCatalogStore, PgCatalogStore, Pipeline, PipelineConfig, RunSummary,
    Selector,
};
use colored::Colorize;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the acquisition pipeline for one region and year
pub async fn run(
    selector: Selector,
    config: PipelineConfig,
    database_url: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let store: Arc<dyn CatalogStore> = if dry_run {
        println!("{} Dry run: using an in-memory catalog store", "→".cyan());
        Arc::new(MemoryCatalogStore::new())
    } else {
        let pool = db::connect(database_url.as_deref()).await?;
        Arc::new(PgCatalogStore::new(pool))
    };

    let pipeline = Pipeline::new(config, store)?.with_observer(Arc::new(ConsoleProgress::new()));

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    println!(
        "{} Starting pipeline for {}",
        "→".cyan(),
        selector.to_string().bold()
    );

    let summary = pipeline.run(selector, &cancel).await?;
    print_summary(&summary);

    if !summary.success() {
        return Err(CliError::run_incomplete(describe_failures(&summary)));
    }

    Ok(())
}

/// Cancel the pipeline when the process receives Ctrl+C or SIGTERM
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("shutdown signal received, cancelling pipeline");
        println!(
            "\n{} Interrupt received: finishing in-flight work, progress is checkpointed...",
            "!".yellow().bold()
        );
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, requesting pipeline cancellation");
        },
        _ = terminate => {
            info!("Received terminate signal, requesting pipeline cancellation");
        },
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{}",
        format!("Run summary for {}:", summary.selector).cyan().bold()
    );
    println!("  Run id:     {}", summary.run_id);

    if summary.catalog_rejected > 0 {
        println!(
            "  Catalog:    {} entries indexed ({} rows rejected)",
            summary.catalog_entries, summary.catalog_rejected
        );
    } else {
        println!("  Catalog:    {} entries indexed", summary.catalog_entries);
    }

    println!(
        "  Audit:      {} already complete, {} to download ({} resumable)",
        summary.audit_verified, summary.download_tasks, summary.audit_resumable
    );

    let failed = if summary.downloads_failed > 0 {
        format!("{} failed", summary.downloads_failed).red().to_string()
    } else {
        "0 failed".to_string()
    };
    println!(
        "  Downloads:  {} completed, {}, {} cancelled, {} unstarted",
        summary.downloads_completed, failed, summary.downloads_cancelled,
        summary.downloads_unstarted
    );

    println!(
        "  Converted:  {} archives, {} skipped ({} without salinity)",
        summary.archives_decoded, summary.archives_skipped, summary.archives_missing_salinity
    );
    println!(
        "  Shards:     {} written, {} rows",
        summary.shards_written, summary.rows_written
    );

    if let Some(merged) = &summary.merged {
        println!(
            "  Merged:     {} rows, {} profiles, {} duplicates removed",
            merged.rows, merged.profiles, merged.duplicates_removed
        );
        println!(
            "              {} ({})",
            merged.path.display(),
            format_bytes(merged.size_bytes)
        );
    }

    println!("  Elapsed:    {:.1?}", summary.elapsed);

    if summary.cancelled {
        println!(
            "\n{} Run cancelled: progress is checkpointed, re-run the same selector to resume",
            "!".yellow().bold()
        );
    } else if summary.success() {
        println!("\n{} Dataset is complete and verified", "✓".green().bold());
    } else {
        println!(
            "\n{} Run finished with unresolved failures",
            "✗".red().bold()
        );
    }
}

/// One-line reason the run did not fully succeed
fn describe_failures(summary: &RunSummary) -> String {
    if summary.cancelled {
        return "cancelled before completion; re-run to resume from the checkpoint".to_string();
    }

    let mut parts = Vec::new();
    if summary.downloads_failed > 0 {
        parts.push(format!("{} downloads failed", summary.downloads_failed));
    }
    let interrupted = summary.downloads_cancelled + summary.downloads_unstarted;
    if interrupted > 0 {
        parts.push(format!("{} downloads did not finish", interrupted));
    }
    if summary.archives_skipped > 0 {
        parts.push(format!(
            "{} archives failed to decode",
            summary.archives_skipped
        ));
    }
    if summary.merged.is_none() {
        parts.push("no merged dataset was produced".to_string());
    }

    if parts.is_empty() {
        "unknown failure".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argosy_pipeline::{MergedDataset, Region};
    use std::path::PathBuf;
    use std::time::Duration;

    fn complete_summary() -> RunSummary {
        let selector = Selector::new(Region::Atlantic, 2020).unwrap();
        RunSummary {
            run_id: "run-1".to_string(),
            selector,
            catalog_entries: 10,
            catalog_rejected: 0,
            upserted: 10,
            audit_verified: 7,
            audit_resumable: 1,
            audit_missing: 2,
            audit_invalid: 0,
            download_tasks: 3,
            downloads_completed: 3,
            downloads_failed: 0,
            downloads_cancelled: 0,
            downloads_unstarted: 0,
            peak_in_flight: 3,
            archives_decoded: 10,
            archives_skipped: 0,
            archives_missing_salinity: 1,
            shards_written: 2,
            rows_written: 500,
            merged: Some(MergedDataset {
                selector,
                path: PathBuf::from("atlantic_2020.parquet"),
                rows: 480,
                profiles: 10,
                duplicates_removed: 20,
                shards_read: 2,
                shards_skipped: 0,
                size_bytes: 4096,
            }),
            cancelled: false,
            elapsed: Duration::from_secs(3),
        }
    }

    #[test]
    fn test_describe_failures_prefers_cancellation() {
        let mut summary = complete_summary();
        summary.cancelled = true;
        summary.downloads_failed = 5;
        assert!(describe_failures(&summary).contains("re-run to resume"));
    }

    #[test]
    fn test_describe_failures_joins_counts() {
        let mut summary = complete_summary();
        summary.downloads_failed = 2;
        summary.archives_skipped = 1;
        summary.merged = None;

        let reason = describe_failures(&summary);
        assert!(reason.contains("2 downloads failed"));
        assert!(reason.contains("1 archives failed to decode"));
        assert!(reason.contains("no merged dataset was produced"));
    }

    #[test]
    fn test_describe_failures_counts_interrupted_downloads_together() {
        let mut summary = complete_summary();
        summary.downloads_cancelled = 1;
        summary.downloads_unstarted = 2;
        assert!(describe_failures(&summary).contains("3 downloads did not finish"));
    }

    #[test]
    fn test_print_summary_handles_every_shape() {
        // Smoke test: all three closing lines and the no-merge branch
        print_summary(&complete_summary());

        let mut failed = complete_summary();
        failed.downloads_failed = 1;
        failed.merged = None;
        print_summary(&failed);

        let mut cancelled = complete_summary();
        cancelled.cancelled = true;
        print_summary(&cancelled);
    }
}
