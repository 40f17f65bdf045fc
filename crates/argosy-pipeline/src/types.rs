//! Core types for the acquisition pipeline

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Earliest catalog year served by the archive
pub const MIN_YEAR: u16 = 2000;
/// Latest catalog year served by the archive
pub const MAX_YEAR: u16 = 2024;

/// Ocean basin the catalog is partitioned by
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Atlantic,
    Pacific,
    Indian,
    Arctic,
    Southern,
}

impl Region {
    /// All regions, in catalog order
    pub const ALL: [Region; 5] = [
        Region::Atlantic,
        Region::Pacific,
        Region::Indian,
        Region::Arctic,
        Region::Southern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Atlantic => "atlantic",
            Region::Pacific => "pacific",
            Region::Indian => "indian",
            Region::Arctic => "arctic",
            Region::Southern => "southern",
        }
    }
}

impl std::str::FromStr for Region {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "atlantic" => Ok(Region::Atlantic),
            "pacific" => Ok(Region::Pacific),
            "indian" => Ok(Region::Indian),
            "arctic" => Ok(Region::Arctic),
            "southern" => Ok(Region::Southern),
            other => Err(PipelineError::Validation(format!(
                "unknown region '{}' (expected one of: atlantic, pacific, indian, arctic, southern)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated (region, year) pair every pipeline run is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selector {
    pub region: Region,
    pub year: u16,
}

impl Selector {
    pub fn new(region: Region, year: u16) -> Result<Self, PipelineError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(PipelineError::Validation(format!(
                "year {} out of range ({}..={})",
                year, MIN_YEAR, MAX_YEAR
            )));
        }
        Ok(Self { region, year })
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.region, self.year)
    }
}

/// Unique key for one remote archive within the catalog
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub region: Region,
    pub year: u16,
    pub platform_id: String,
    pub cycle_number: i32,
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.region, self.year, self.platform_id, self.cycle_number
        )
    }
}

/// One parsed inventory line: a remote archive known to the catalog source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub region: Region,
    pub year: u16,
    pub platform_id: String,
    pub cycle_number: i32,
    /// Path relative to the archive data root, normalized
    pub remote_path: String,
    pub size_bytes: Option<i64>,
    /// Lowercase hex SHA-256, when the inventory publishes one
    pub checksum: Option<String>,
}

impl IndexEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            region: self.region,
            year: self.year,
            platform_id: self.platform_id.clone(),
            cycle_number: self.cycle_number,
        }
    }
}

/// Download lifecycle of a catalog record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Partial,
    Complete,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Partial => "partial",
            DownloadStatus::Complete => "complete",
            DownloadStatus::Failed => "failed",
        }
    }
}

impl From<String> for DownloadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => DownloadStatus::Pending,
            "partial" => DownloadStatus::Partial,
            "complete" => DownloadStatus::Complete,
            "failed" => DownloadStatus::Failed,
            _ => DownloadStatus::Pending,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable form of an IndexEntry plus bookkeeping, owned by the catalog store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub region: Region,
    pub year: u16,
    pub platform_id: String,
    pub cycle_number: i32,
    pub remote_path: String,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub download_status: DownloadStatus,
}

impl CatalogRecord {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            region: self.region,
            year: self.year,
            platform_id: self.platform_id.clone(),
            cycle_number: self.cycle_number,
        }
    }
}

/// How a locally stored archive can be checked against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyToken {
    /// Lowercase hex SHA-256 published by the inventory
    Checksum(String),
    /// Expected byte length published by the inventory
    Length(u64),
    /// No verification metadata; existence and non-emptiness is the best
    /// available signal
    Unverified,
}

impl VerifyToken {
    /// Build the strongest token the catalog metadata supports
    pub fn from_metadata(size_bytes: Option<i64>, checksum: Option<&str>) -> Self {
        if let Some(sum) = checksum {
            VerifyToken::Checksum(sum.to_string())
        } else if let Some(len) = size_bytes {
            VerifyToken::Length(len.max(0) as u64)
        } else {
            VerifyToken::Unverified
        }
    }
}

/// A locally materialized archive that passed (or awaits) verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFileDescriptor {
    pub key: EntryKey,
    pub path: PathBuf,
    pub len: u64,
    pub token: VerifyToken,
}

/// One unit of download work: a catalog record bound to its target path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub key: EntryKey,
    pub remote_path: String,
    pub dest: PathBuf,
    /// Byte offset downloads resume from; 0 means fetch from scratch
    pub resume_offset: u64,
    /// Attempts already spent on this task
    pub attempt: u32,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
}

impl DownloadTask {
    pub fn verify_token(&self) -> VerifyToken {
        VerifyToken::from_metadata(self.size_bytes, self.checksum.as_deref())
    }
}
