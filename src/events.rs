//! Event input and hour bucketing.
//!
//! Reads the cleaned event CSV and floors timestamps to the start of their
//! UTC hour. Flooring happens in UTC *before* any conversion to the display
//! timezone: flooring in a zone with DST transitions can duplicate buckets
//! during fall-back or skip them during spring-forward.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

/// One raw input record, as it appears in the CSV.
#[derive(Debug, Deserialize)]
struct RawEvent {
    timestamp: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    call_type: Option<String>,
    borough: Option<String>,
}

/// One validated event with a parsed timestamp.
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub call_type: Option<String>,
    pub borough: Option<String>,
}

/// Result of reading the event table: surviving events plus drop counts.
#[derive(Debug)]
pub struct EventBatch {
    pub events: Vec<Event>,
    pub dropped_timestamp: usize,
    pub dropped_location: usize,
}

const REQUIRED_COLUMNS: [&str; 3] = ["timestamp", "latitude", "longitude"];

/// Reads and validates the event CSV.
///
/// Missing required columns or an unreadable file are fatal. Rows whose
/// timestamp fails to parse or whose coordinates are absent are dropped
/// and excluded from every downstream count.
pub fn read_events(path: &Path) -> Result<EventBatch> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open event table {}", path.display()))?;

    let headers = reader
        .headers()
        .context("Failed to read event table headers")?
        .clone();
    for column in REQUIRED_COLUMNS {
        anyhow::ensure!(
            headers.iter().any(|h| h == column),
            "Event table {} is missing required column '{}'",
            path.display(),
            column
        );
    }

    let mut events = Vec::new();
    let mut dropped_timestamp = 0usize;
    let mut dropped_location = 0usize;

    for record in reader.deserialize::<RawEvent>() {
        let raw = match record {
            Ok(raw) => raw,
            Err(_) => {
                // Malformed numeric field; treated like a missing location
                dropped_location += 1;
                continue;
            }
        };
        let Some(timestamp) = parse_timestamp(&raw.timestamp) else {
            dropped_timestamp += 1;
            continue;
        };
        let (Some(latitude), Some(longitude)) = (raw.latitude, raw.longitude) else {
            dropped_location += 1;
            continue;
        };
        events.push(Event {
            timestamp,
            latitude,
            longitude,
            call_type: raw.call_type,
            borough: raw.borough,
        });
    }

    tracing::info!(
        "Read {} events from {} ({} dropped for timestamp, {} for location)",
        events.len(),
        path.display(),
        dropped_timestamp,
        dropped_location
    );

    Ok(EventBatch {
        events,
        dropped_timestamp,
        dropped_location,
    })
}

/// Parses an event timestamp. Accepts RFC 3339 with offset, or a naive
/// `YYYY-MM-DD[ T]HH:MM:SS` interpreted as UTC (the cleaning step emits UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Floors a timestamp to the start of its containing hour, in UTC.
///
/// Idempotent: flooring an already-floored value is a no-op.
pub fn bucket_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    Utc.timestamp_opt(floored, 0)
        .single()
        .expect("hour-floored epoch seconds are always representable")
}

/// Reinterprets a floored UTC bucket in the display timezone. Used for
/// presentation and calendar-feature extraction only.
pub fn display_bucket(bucket: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    bucket.with_timezone(&tz)
}
