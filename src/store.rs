//! Parquet artifact storage.
//!
//! Every persisted table embeds the grid resolution and display timezone as
//! file-level key-value metadata, so a stage reading an artifact produced
//! under a different resolution fails loudly instead of joining mismatched
//! grids. Writes go to a temporary file and are published with a rename.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray, TimestampSecondArray,
    UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::config::PipelineConfig;
use crate::enrich::EnrichedRow;
use crate::features::FeatureRow;
use crate::grid;
use crate::panel::{Panel, PanelRow};

const META_RESOLUTION: &str = "grid_resolution";
const META_TIMEZONE: &str = "display_timezone";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Second, Some("UTC".into()))
}

fn writer_properties(config: &PipelineConfig) -> WriterProperties {
    let resolution = KeyValue {
        key: META_RESOLUTION.to_string(),
        value: Some(config.grid.resolution.to_string()),
    };
    let timezone = KeyValue {
        key: META_TIMEZONE.to_string(),
        value: Some(config.time.display_timezone.clone()),
    };
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .set_key_value_metadata(Some(vec![resolution, timezone]))
        .build()
}

/// Writes a record batch to `path` atomically (temp file, then rename).
fn write_batch(path: &Path, batch: &RecordBatch, config: &PipelineConfig) -> Result<()> {
    let temp_path = path.with_extension("parquet.tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let file = File::create(&temp_path)
        .with_context(|| format!("Failed to create {}", temp_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties(config)))
        .context("Failed to create Parquet writer")?;
    writer.write(batch).context("Failed to write batch")?;
    writer.close().context("Failed to close Parquet writer")?;

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to publish {}", path.display()))?;
    Ok(())
}

fn open_reader(
    path: &Path,
    config: &PipelineConfig,
) -> Result<parquet::arrow::arrow_reader::ParquetRecordBatchReader> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Failed to read Parquet file {}", path.display()))?;

    let key_values = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .cloned()
        .unwrap_or_default();
    check_run_metadata(&key_values, config, path)?;

    builder.build().context("Failed to build Parquet reader")
}

fn check_run_metadata(
    key_values: &[KeyValue],
    config: &PipelineConfig,
    path: &Path,
) -> Result<()> {
    let embedded_resolution = key_values
        .iter()
        .find(|kv| kv.key == META_RESOLUTION)
        .and_then(|kv| kv.value.as_deref());
    match embedded_resolution {
        Some(value) if value == config.grid.resolution.to_string() => {}
        Some(value) => anyhow::bail!(
            "{} was written at grid resolution {} but this run is configured for {}",
            path.display(),
            value,
            config.grid.resolution
        ),
        None => anyhow::bail!(
            "{} carries no grid resolution metadata; refusing to join against it",
            path.display()
        ),
    }

    if let Some(embedded_tz) = key_values
        .iter()
        .find(|kv| kv.key == META_TIMEZONE)
        .and_then(|kv| kv.value.as_deref())
    {
        if embedded_tz != config.time.display_timezone {
            tracing::warn!(
                "{} was written with display timezone {} (configured: {})",
                path.display(),
                embedded_tz,
                config.time.display_timezone
            );
        }
    }
    Ok(())
}

// ==================== Panel Artifact ====================

fn panel_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("cell_id", DataType::Utf8, false),
        Field::new("hour_bucket", timestamp_type(), false),
        Field::new("calls", DataType::UInt32, false),
    ]))
}

pub fn write_panel(path: &Path, panel: &Panel, config: &PipelineConfig) -> Result<()> {
    let cell_ids = StringArray::from(
        panel
            .rows
            .iter()
            .map(|r| r.cell.to_string())
            .collect::<Vec<_>>(),
    );
    let buckets = TimestampSecondArray::from(
        panel
            .rows
            .iter()
            .map(|r| r.bucket.timestamp())
            .collect::<Vec<_>>(),
    )
    .with_timezone("UTC");
    let calls = UInt32Array::from(panel.rows.iter().map(|r| r.calls).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        panel_schema(),
        vec![
            Arc::new(cell_ids) as ArrayRef,
            Arc::new(buckets),
            Arc::new(calls),
        ],
    )
    .context("Failed to assemble panel batch")?;
    write_batch(path, &batch, config)
}

pub fn read_panel(path: &Path, config: &PipelineConfig) -> Result<Panel> {
    let reader = open_reader(path, config)?;
    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch.context("Failed to read panel batch")?;
        let cell_ids = downcast::<StringArray>(&batch, 0, "cell_id")?;
        let buckets = downcast::<TimestampSecondArray>(&batch, 1, "hour_bucket")?;
        let calls = downcast::<UInt32Array>(&batch, 2, "calls")?;

        for i in 0..batch.num_rows() {
            rows.push(PanelRow {
                cell: grid::parse_cell(cell_ids.value(i))?,
                bucket: epoch_seconds(buckets.value(i))?,
                calls: calls.value(i),
            });
        }
    }

    let source_events = rows.iter().map(|r| r.calls as usize).sum();
    Ok(Panel {
        rows,
        source_events,
    })
}

// ==================== Enriched Artifact ====================

fn enriched_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("cell_id", DataType::Utf8, false),
        Field::new("hour_bucket", timestamp_type(), false),
        Field::new("calls", DataType::UInt32, false),
        Field::new("center_lat", DataType::Float64, true),
        Field::new("center_lng", DataType::Float64, true),
    ]))
}

pub fn write_enriched(path: &Path, rows: &[EnrichedRow], config: &PipelineConfig) -> Result<()> {
    let cell_ids = StringArray::from(rows.iter().map(|r| r.cell.to_string()).collect::<Vec<_>>());
    let buckets =
        TimestampSecondArray::from(rows.iter().map(|r| r.bucket.timestamp()).collect::<Vec<_>>())
            .with_timezone("UTC");
    let calls = UInt32Array::from(rows.iter().map(|r| r.calls).collect::<Vec<_>>());
    let center_lat = Float64Array::from(rows.iter().map(|r| r.center_lat).collect::<Vec<_>>());
    let center_lng = Float64Array::from(rows.iter().map(|r| r.center_lng).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        enriched_schema(),
        vec![
            Arc::new(cell_ids) as ArrayRef,
            Arc::new(buckets),
            Arc::new(calls),
            Arc::new(center_lat),
            Arc::new(center_lng),
        ],
    )
    .context("Failed to assemble enriched batch")?;
    write_batch(path, &batch, config)
}

pub fn read_enriched(path: &Path, config: &PipelineConfig) -> Result<Vec<EnrichedRow>> {
    let reader = open_reader(path, config)?;
    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch.context("Failed to read enriched batch")?;
        let cell_ids = downcast::<StringArray>(&batch, 0, "cell_id")?;
        let buckets = downcast::<TimestampSecondArray>(&batch, 1, "hour_bucket")?;
        let calls = downcast::<UInt32Array>(&batch, 2, "calls")?;
        let center_lat = downcast::<Float64Array>(&batch, 3, "center_lat")?;
        let center_lng = downcast::<Float64Array>(&batch, 4, "center_lng")?;

        for i in 0..batch.num_rows() {
            rows.push(EnrichedRow {
                cell: grid::parse_cell(cell_ids.value(i))?,
                bucket: epoch_seconds(buckets.value(i))?,
                calls: calls.value(i),
                center_lat: optional_f64(center_lat, i),
                center_lng: optional_f64(center_lng, i),
            });
        }
    }
    Ok(rows)
}

// ==================== Model-Ready Artifact ====================

fn features_schema(config: &PipelineConfig) -> Arc<Schema> {
    let mut fields = vec![
        Field::new("cell_id", DataType::Utf8, false),
        Field::new("hour_bucket", timestamp_type(), false),
        Field::new("calls", DataType::UInt32, false),
        Field::new("center_lat", DataType::Float64, true),
        Field::new("center_lng", DataType::Float64, true),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::UInt32, false),
        Field::new("day", DataType::UInt32, false),
        Field::new("hour", DataType::UInt32, false),
        Field::new("day_of_week", DataType::UInt32, false),
        Field::new("is_weekend", DataType::Boolean, false),
    ];
    for &k in &config.features.lags {
        fields.push(Field::new(
            format!("calls_lag_{k}h"),
            DataType::UInt32,
            true,
        ));
    }
    for &w in &config.features.rolling_windows {
        fields.push(Field::new(
            format!("calls_rollmean_{w}h"),
            DataType::Float64,
            true,
        ));
        fields.push(Field::new(
            format!("calls_rollstd_{w}h"),
            DataType::Float64,
            true,
        ));
    }
    Arc::new(Schema::new(fields))
}

pub fn write_features(path: &Path, rows: &[FeatureRow], config: &PipelineConfig) -> Result<()> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.cell.to_string()).collect::<Vec<_>>(),
        )),
        Arc::new(
            TimestampSecondArray::from(
                rows.iter().map(|r| r.bucket.timestamp()).collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.calls).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter().map(|r| r.center_lat).collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            rows.iter().map(|r| r.center_lng).collect::<Vec<_>>(),
        )),
        Arc::new(Int32Array::from(
            rows.iter().map(|r| r.year).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.month).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.day).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.hour).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.day_of_week).collect::<Vec<_>>(),
        )),
        Arc::new(BooleanArray::from(
            rows.iter().map(|r| r.is_weekend).collect::<Vec<_>>(),
        )),
    ];

    for (idx, _) in config.features.lags.iter().enumerate() {
        columns.push(Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.lags[idx]).collect::<Vec<_>>(),
        )));
    }
    for (idx, _) in config.features.rolling_windows.iter().enumerate() {
        columns.push(Arc::new(Float64Array::from(
            rows.iter().map(|r| r.roll_means[idx]).collect::<Vec<_>>(),
        )));
        columns.push(Arc::new(Float64Array::from(
            rows.iter().map(|r| r.roll_stds[idx]).collect::<Vec<_>>(),
        )));
    }

    let batch = RecordBatch::try_new(features_schema(config), columns)
        .context("Failed to assemble feature batch")?;
    write_batch(path, &batch, config)
}

// ==================== Helpers ====================

fn downcast<'a, T: 'static>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> Result<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("Column '{}' has an unexpected type", name))
}

fn optional_f64(array: &Float64Array, index: usize) -> Option<f64> {
    if array.is_null(index) {
        None
    } else {
        Some(array.value(index))
    }
}

fn epoch_seconds(secs: i64) -> Result<chrono::DateTime<chrono::Utc>> {
    DateTime::from_timestamp(secs, 0)
        .with_context(|| format!("Timestamp {} out of range", secs))
}
