//! Merge stage: batch shards into the final per-selector dataset
//!
//! Reads every shard in batch order, deduplicates whole profiles by
//! (platform, cycle) with the later occurrence winning, and publishes the
//! merged file atomically. The merge is a full recompute over the shard
//! set on disk; the previous merged file never feeds back into the
//! result. Unreadable or empty shards are skipped and counted.

use crate::convert::shard::{provenance_properties, read_shard_rows, write_rows};
use crate::convert::ObservationRow;
use crate::error::{PipelineError, Result};
use crate::layout::DataLayout;
use crate::types::Selector;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Deduplication key: one profile is one (platform, cycle) pair
type ProfileKey = (String, i32);

/// Inspection summary of a published merged dataset
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDataset {
    pub selector: Selector,
    pub path: PathBuf,
    pub rows: u64,
    pub profiles: u64,
    /// Profiles replaced by a later occurrence during deduplication
    pub duplicates_removed: u64,
    pub shards_read: u64,
    pub shards_skipped: u64,
    pub size_bytes: u64,
}

/// Builds the merged dataset for a selector
pub struct MergeAssembler {
    layout: DataLayout,
}

impl MergeAssembler {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// Merge every shard of the selector into the final dataset
    pub async fn merge(&self, selector: Selector, run_id: &str) -> Result<MergedDataset> {
        let layout = self.layout.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || merge_shards(&layout, selector, &run_id))
            .await
            .map_err(|e| PipelineError::Shard(format!("merge task failed: {}", e)))?
    }
}

fn merge_shards(layout: &DataLayout, selector: Selector, run_id: &str) -> Result<MergedDataset> {
    let shards = list_shards(layout, selector)?;
    if shards.is_empty() {
        return Err(PipelineError::Shard(format!(
            "no batch shards found for {}",
            selector
        )));
    }

    let mut merged: BTreeMap<ProfileKey, Vec<ObservationRow>> = BTreeMap::new();
    let mut duplicates_removed = 0u64;
    let mut shards_read = 0u64;
    let mut shards_skipped = 0u64;

    for (batch_index, path) in &shards {
        let rows = match read_shard_rows(path) {
            Ok(rows) if rows.is_empty() => {
                warn!(shard = %path.display(), batch_index, "empty shard; skipped");
                shards_skipped += 1;
                continue;
            }
            Ok(rows) => rows,
            Err(e) => {
                warn!(shard = %path.display(), batch_index, error = %e, "unreadable shard; skipped");
                shards_skipped += 1;
                continue;
            }
        };
        shards_read += 1;

        // Each contiguous run of one key is one profile occurrence; a
        // later occurrence replaces the earlier one wholesale.
        for (key, profile) in profile_runs(rows) {
            if merged.insert(key, profile).is_some() {
                duplicates_removed += 1;
            }
        }
    }

    if merged.is_empty() {
        return Err(PipelineError::Shard(format!(
            "no rows to merge for {} ({} shards skipped)",
            selector, shards_skipped
        )));
    }

    let profiles = merged.len() as u64;
    let total_rows: usize = merged.values().map(Vec::len).sum();
    let mut rows = Vec::with_capacity(total_rows);
    for mut profile in merged.into_values() {
        profile.sort_by_key(|row| row.level);
        rows.extend(profile);
    }

    let path = layout.merged_path(selector);
    let props = provenance_properties(run_id, selector, "merged", None);
    write_rows(&path, &rows, props)?;
    let size_bytes = std::fs::metadata(&path)?.len();

    let dataset = MergedDataset {
        selector,
        path,
        rows: rows.len() as u64,
        profiles,
        duplicates_removed,
        shards_read,
        shards_skipped,
        size_bytes,
    };

    info!(
        selector = %selector,
        path = %dataset.path.display(),
        rows = dataset.rows,
        profiles = dataset.profiles,
        duplicates_removed = dataset.duplicates_removed,
        shards_read = dataset.shards_read,
        shards_skipped = dataset.shards_skipped,
        size_bytes = dataset.size_bytes,
        "merged dataset published"
    );

    Ok(dataset)
}

/// Shard files for the selector, ordered by batch index
fn list_shards(layout: &DataLayout, selector: Selector) -> Result<Vec<(u32, PathBuf)>> {
    let dir = layout.shard_dir(selector);
    let prefix = layout.shard_prefix(selector);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(batch_index) = parse_batch_index(name, &prefix) else {
            continue;
        };
        shards.push((batch_index, entry.path()));
    }
    shards.sort_by_key(|(batch_index, _)| *batch_index);
    Ok(shards)
}

fn parse_batch_index(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

/// Split rows into contiguous per-key runs, preserving order
fn profile_runs(rows: Vec<ObservationRow>) -> Vec<(ProfileKey, Vec<ObservationRow>)> {
    let mut runs: Vec<(ProfileKey, Vec<ObservationRow>)> = Vec::new();
    for row in rows {
        match runs.last_mut() {
            Some((key, profile))
                if key.0 == row.platform_id && key.1 == row.cycle_number =>
            {
                profile.push(row);
            }
            _ => {
                let key = (row.platform_id.clone(), row.cycle_number);
                runs.push((key, vec![row]));
            }
        }
    }
    runs
}
