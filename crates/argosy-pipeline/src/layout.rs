//! Local filesystem layout
//!
//! Paths are partitioned by region and year so concurrent workers never
//! write the same file. Shard and merged names are stable across runs;
//! re-runs overwrite by rename only.

use crate::types::Selector;
use std::path::{Path, PathBuf};

/// Resolves every local path the pipeline reads or writes
#[derive(Debug, Clone)]
pub struct DataLayout {
    archive_root: PathBuf,
    output_root: PathBuf,
}

impl DataLayout {
    pub fn new(archive_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            output_root: output_root.into(),
        }
    }

    /// Where a remote archive is materialized locally
    pub fn archive_path(&self, selector: Selector, remote_path: &str) -> PathBuf {
        self.archive_root
            .join(selector.region.as_str())
            .join(selector.year.to_string())
            .join(remote_path)
    }

    /// Directory holding the batch shards for a region
    pub fn shard_dir(&self, selector: Selector) -> PathBuf {
        self.output_root.join(selector.region.as_str())
    }

    /// Filename prefix shared by every shard of a selector
    pub fn shard_prefix(&self, selector: Selector) -> String {
        format!("{}_{}_batch", selector.region, selector.year)
    }

    /// `{output_root}/{region}/{region}_{year}_batch{N}.parquet`
    pub fn shard_path(&self, selector: Selector, batch_index: u32) -> PathBuf {
        self.shard_dir(selector)
            .join(format!("{}{}.parquet", self.shard_prefix(selector), batch_index))
    }

    /// `{output_root}/merged/{region}/{region}_{year}_full.parquet`
    pub fn merged_path(&self, selector: Selector) -> PathBuf {
        self.output_root
            .join("merged")
            .join(selector.region.as_str())
            .join(format!("{}_{}_full.parquet", selector.region, selector.year))
    }

    /// Hidden sibling used for atomic publishes; never matches shard globs
    pub fn temp_sibling(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        path.with_file_name(format!(".tmp-{}", name))
    }
}
