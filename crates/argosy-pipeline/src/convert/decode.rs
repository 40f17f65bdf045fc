//! Decode boundary between downloaded archives and columnar rows
//!
//! `ArchiveDecoder` keeps the archive format out of the conversion stage.
//! Decoders are synchronous and run on blocking threads; a failed decode
//! is contained to its archive. Identity columns (platform, cycle, region)
//! come from the catalog key, never from the archive payload.

use crate::error::Result;
use crate::types::{LocalFileDescriptor, Region};
use chrono::{DateTime, Utc};

/// Observation timestamps count days since 1950-01-01T00:00:00Z; this is
/// that epoch in Unix milliseconds.
const JULD_EPOCH_UNIX_MS: i64 = -631_152_000_000;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// One measurement level of one profile, in output schema order
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRow {
    pub platform_id: String,
    pub cycle_number: i32,
    /// Zero-based level index within the profile
    pub level: i32,
    pub juld: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub pressure_dbar: f32,
    pub temperature_c: f32,
    /// Salinity is the one optional measurement; absent stays absent
    pub salinity_psu: Option<f32>,
    pub region: Region,
}

/// Rows decoded from one archive plus per-archive findings
#[derive(Debug, Default)]
pub struct DecodedArchive {
    pub rows: Vec<ObservationRow>,
    /// The archive carries no salinity variable at all
    pub missing_salinity: bool,
}

/// Format-specific archive reader
///
/// Implementations run under `spawn_blocking` and must not touch the
/// async runtime.
pub trait ArchiveDecoder: Send + Sync + 'static {
    fn decode(&self, archive: &LocalFileDescriptor) -> Result<DecodedArchive>;
}

/// Convert a JULD value (days since 1950-01-01) to a UTC timestamp
///
/// Returns `None` for non-finite inputs and values outside the
/// representable timestamp range.
pub fn juld_to_datetime(days: f64) -> Option<DateTime<Utc>> {
    if !days.is_finite() {
        return None;
    }
    let millis = (days * MILLIS_PER_DAY).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis((millis as i64).checked_add(JULD_EPOCH_UNIX_MS)?)
}
