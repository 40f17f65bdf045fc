//! Parquet batch shards
//!
//! One shard is one flushed row buffer. Every file is published
//! atomically: written to a hidden temp sibling, then renamed into place,
//! so readers only ever see complete parquet files. Shards carry run
//! provenance in the parquet key-value metadata.

use crate::convert::decode::ObservationRow;
use crate::error::{PipelineError, Result};
use crate::layout::DataLayout;
use crate::types::{Region, Selector};
use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Int32Array, StringArray,
    TimestampMillisecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Rows per record batch when writing large row sets
const WRITE_CHUNK_ROWS: usize = 65_536;

/// One published batch shard
#[derive(Debug, Clone, PartialEq)]
pub struct BatchShard {
    pub selector: Selector,
    pub batch_index: u32,
    pub path: PathBuf,
    pub rows: u64,
}

/// Arrow schema every shard and merged dataset conforms to
pub fn observation_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("platform_id", DataType::Utf8, false),
        Field::new("cycle_number", DataType::Int32, false),
        Field::new("level", DataType::Int32, false),
        Field::new(
            "juld",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("latitude", DataType::Float64, false),
        Field::new("longitude", DataType::Float64, false),
        Field::new("pressure_dbar", DataType::Float32, false),
        Field::new("temperature_c", DataType::Float32, false),
        Field::new("salinity_psu", DataType::Float32, true),
        Field::new("region", DataType::Utf8, false),
    ]))
}

/// Build one record batch from rows
pub fn rows_to_batch(rows: &[ObservationRow]) -> Result<RecordBatch> {
    let platform_id: StringArray = rows.iter().map(|r| Some(r.platform_id.as_str())).collect();
    let cycle_number = Int32Array::from_iter_values(rows.iter().map(|r| r.cycle_number));
    let level = Int32Array::from_iter_values(rows.iter().map(|r| r.level));
    let juld =
        TimestampMillisecondArray::from_iter_values(rows.iter().map(|r| r.juld.timestamp_millis()))
            .with_timezone("UTC");
    let latitude = Float64Array::from_iter_values(rows.iter().map(|r| r.latitude));
    let longitude = Float64Array::from_iter_values(rows.iter().map(|r| r.longitude));
    let pressure_dbar = Float32Array::from_iter_values(rows.iter().map(|r| r.pressure_dbar));
    let temperature_c = Float32Array::from_iter_values(rows.iter().map(|r| r.temperature_c));
    let salinity_psu: Float32Array = rows.iter().map(|r| r.salinity_psu).collect();
    let region: StringArray = rows.iter().map(|r| Some(r.region.as_str())).collect();

    RecordBatch::try_new(
        observation_schema(),
        vec![
            Arc::new(platform_id) as ArrayRef,
            Arc::new(cycle_number),
            Arc::new(level),
            Arc::new(juld),
            Arc::new(latitude),
            Arc::new(longitude),
            Arc::new(pressure_dbar),
            Arc::new(temperature_c),
            Arc::new(salinity_psu),
            Arc::new(region),
        ],
    )
    .map_err(PipelineError::from)
}

/// Writer properties stamping run provenance into the file footer
pub fn provenance_properties(
    run_id: &str,
    selector: Selector,
    kind: &str,
    batch_index: Option<u32>,
) -> WriterProperties {
    let mut metadata = vec![
        KeyValue {
            key: "argosy:run_id".to_string(),
            value: Some(run_id.to_string()),
        },
        KeyValue {
            key: "argosy:selector".to_string(),
            value: Some(selector.to_string()),
        },
        KeyValue {
            key: "argosy:kind".to_string(),
            value: Some(kind.to_string()),
        },
    ];
    if let Some(index) = batch_index {
        metadata.push(KeyValue {
            key: "argosy:batch_index".to_string(),
            value: Some(index.to_string()),
        });
    }
    WriterProperties::builder()
        .set_created_by(format!("argosy {}", env!("CARGO_PKG_VERSION")))
        .set_key_value_metadata(Some(metadata))
        .build()
}

/// Write rows to a parquet file, atomically
pub fn write_rows(path: &Path, rows: &[ObservationRow], props: WriterProperties) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp = DataLayout::temp_sibling(path);
    let file = std::fs::File::create(&temp)?;
    let mut writer = ArrowWriter::try_new(file, observation_schema(), Some(props))?;
    for chunk in rows.chunks(WRITE_CHUNK_ROWS) {
        writer.write(&rows_to_batch(chunk)?)?;
    }
    writer.close()?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

/// Publish one batch shard
pub fn write_shard(
    layout: &DataLayout,
    selector: Selector,
    batch_index: u32,
    run_id: &str,
    rows: &[ObservationRow],
) -> Result<BatchShard> {
    let path = layout.shard_path(selector, batch_index);
    let props = provenance_properties(run_id, selector, "batch", Some(batch_index));
    write_rows(&path, rows, props)?;
    debug!(path = %path.display(), rows = rows.len(), "published batch shard");
    Ok(BatchShard {
        selector,
        batch_index,
        path,
        rows: rows.len() as u64,
    })
}

/// Read every row of a shard or merged file
pub fn read_shard_rows(path: &Path) -> Result<Vec<ObservationRow>> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        append_batch_rows(&batch?, &mut rows)?;
    }
    Ok(rows)
}

fn append_batch_rows(batch: &RecordBatch, out: &mut Vec<ObservationRow>) -> Result<()> {
    let platform_id = column_as::<StringArray>(batch, "platform_id")?;
    let cycle_number = column_as::<Int32Array>(batch, "cycle_number")?;
    let level = column_as::<Int32Array>(batch, "level")?;
    let juld = column_as::<TimestampMillisecondArray>(batch, "juld")?;
    let latitude = column_as::<Float64Array>(batch, "latitude")?;
    let longitude = column_as::<Float64Array>(batch, "longitude")?;
    let pressure_dbar = column_as::<Float32Array>(batch, "pressure_dbar")?;
    let temperature_c = column_as::<Float32Array>(batch, "temperature_c")?;
    let salinity_psu = column_as::<Float32Array>(batch, "salinity_psu")?;
    let region = column_as::<StringArray>(batch, "region")?;

    out.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        let ts = DateTime::from_timestamp_millis(juld.value(i))
            .ok_or_else(|| PipelineError::Shard(format!("row {} timestamp out of range", i)))?;
        out.push(ObservationRow {
            platform_id: platform_id.value(i).to_string(),
            cycle_number: cycle_number.value(i),
            level: level.value(i),
            juld: ts,
            latitude: latitude.value(i),
            longitude: longitude.value(i),
            pressure_dbar: pressure_dbar.value(i),
            temperature_c: temperature_c.value(i),
            salinity_psu: if salinity_psu.is_null(i) {
                None
            } else {
                Some(salinity_psu.value(i))
            },
            region: Region::from_str(region.value(i))?,
        });
    }
    Ok(())
}

fn column_as<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| PipelineError::Shard(format!("column {} missing or mistyped", name)))
}

/// Remove every shard (and orphaned temp file) for the selector
///
/// A conversion pass rebuilds the full shard set; leftovers from an
/// earlier run with a different batch layout must not survive it.
pub fn sweep_stale_shards(layout: &DataLayout, selector: Selector) -> Result<u64> {
    let dir = layout.shard_dir(selector);
    let prefix = layout.shard_prefix(selector);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0u64;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let stale = (name.starts_with(prefix.as_str()) && name.ends_with(".parquet"))
            || (name.starts_with(".tmp-") && name.contains(prefix.as_str()));
        if stale {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "swept stale batch shards");
    }
    Ok(removed)
}
