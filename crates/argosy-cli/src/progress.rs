//! Progress rendering for pipeline runs
//!
//! Implements the pipeline's `ProgressObserver` with `indicatif`: counted
//! bars for downloads and conversion, spinners for the stages whose size
//! is unknown up front. Bars draw to stderr and indicatif hides them when
//! stderr is not a terminal, so piped output stays clean. Stages run one
//! at a time, so a single active bar is enough.

use argosy_pipeline::progress::{ProgressObserver, Stage};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Renders one bar or spinner per stage as the run advances
pub struct ConsoleProgress {
    active: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    fn replace(&self, bar: Option<ProgressBar>) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.take() {
                previous.finish_and_clear();
            }
            *active = bar;
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleProgress {
    fn stage_started(&self, stage: Stage, total: u64) {
        let (glyph, message) = match stage {
            Stage::Catalog => ("→", "Fetching catalog inventories...".to_string()),
            Stage::Audit => ("→", "Auditing local archives...".to_string()),
            Stage::Download => ("↓", format!("Downloading {} archives...", total)),
            Stage::Convert => ("→", format!("Converting {} archives...", total)),
            Stage::Merge => ("→", "Merging shards...".to_string()),
        };
        println!("{} {}", glyph.cyan(), message);

        let bar = if total > 0 {
            create_progress_bar(total, stage.as_str())
        } else {
            create_spinner(stage.as_str())
        };
        self.replace(Some(bar));
    }

    fn item_finished(&self, _stage: Stage) {
        if let Ok(active) = self.active.lock() {
            if let Some(bar) = active.as_ref() {
                bar.inc(1);
            }
        }
    }

    fn stage_finished(&self, stage: Stage, completed: u64) {
        self.replace(None);
        let message = match stage {
            Stage::Catalog => format!("{} catalog entries indexed", completed),
            Stage::Audit => format!("{} transfers queued", completed),
            Stage::Download => format!("{} downloads completed", completed),
            Stage::Convert => format!("{} archives converted", completed),
            Stage::Merge => format!("{} rows merged", completed),
        };
        println!("  {} {}", "✓".green(), message);
    }
}

/// Create a counted progress bar with a short stage label
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
            .expect("Invalid progress bar template")
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
        assert_eq!(format_bytes(1073741824), "1.00 GB");
        assert_eq!(format_bytes(1099511627776), "1.00 TB");
    }

    #[test]
    fn test_create_progress_bar() {
        let pb = create_progress_bar(42, "download");
        assert_eq!(pb.length(), Some(42));
    }

    #[test]
    fn test_create_spinner() {
        let pb = create_spinner("Processing...");
        assert!(!pb.is_finished());
        pb.finish();
    }

    #[test]
    fn test_observer_survives_a_full_stage_sequence() {
        let progress = ConsoleProgress::new();
        progress.stage_started(Stage::Download, 3);
        progress.item_finished(Stage::Download);
        progress.item_finished(Stage::Download);
        progress.item_finished(Stage::Download);
        progress.stage_finished(Stage::Download, 3);

        // Spinner path (unknown total)
        progress.stage_started(Stage::Merge, 0);
        progress.stage_finished(Stage::Merge, 100);
    }
}
