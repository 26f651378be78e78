//! Lag, rolling-window, and calendar features over the enriched panel.
//!
//! Each cell's rows form an independent, chronologically sorted sequence.
//! Every lag and rolling value is computed from `calls` values strictly
//! before the current bucket of the same cell: the rolling window runs over
//! the one-step-shifted series, so the current row's own count can never
//! leak into its features.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use h3o::CellIndex;

use crate::config::PipelineConfig;
use crate::enrich::EnrichedRow;

/// One model-ready record. Lag and rolling vectors run parallel to the
/// configured offsets and window widths respectively.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub cell: CellIndex,
    pub bucket: DateTime<Utc>,
    pub calls: u32,
    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,

    // Calendar fields, derived from the bucket in the display timezone
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    /// Monday = 0, Sunday = 6
    pub day_of_week: u32,
    pub is_weekend: bool,

    pub lags: Vec<Option<u32>>,
    pub roll_means: Vec<Option<f64>>,
    pub roll_stds: Vec<Option<f64>>,
}

/// Derives features for the whole panel.
///
/// Output rows are ordered by (cell, bucket); cells are independent of one
/// another, so cell order carries no information.
pub fn derive_features(rows: &[EnrichedRow], config: &PipelineConfig) -> Result<Vec<FeatureRow>> {
    let tz = config.time.timezone()?;

    let mut by_cell: BTreeMap<CellIndex, Vec<EnrichedRow>> = BTreeMap::new();
    for row in rows {
        by_cell.entry(row.cell).or_default().push(row.clone());
    }

    let mut out = Vec::with_capacity(rows.len());
    for (_, mut series) in by_cell {
        series.sort_by_key(|r| r.bucket);
        let series = if config.features.zero_fill {
            zero_fill_series(series)
        } else {
            series
        };
        derive_for_cell(&series, config, tz, &mut out);
    }

    tracing::info!("Derived features for {} rows", out.len());
    Ok(out)
}

/// Materializes zero-call rows for every unobserved hour between a cell's
/// first and last observed bucket. With this on, a lag of k steps is a lag
/// of exactly k clock-hours.
fn zero_fill_series(series: Vec<EnrichedRow>) -> Vec<EnrichedRow> {
    let Some(first) = series.first().cloned() else {
        return series;
    };

    let mut filled = Vec::new();
    let mut expected = first.bucket;
    for row in series {
        while expected < row.bucket {
            filled.push(EnrichedRow {
                cell: first.cell,
                bucket: expected,
                calls: 0,
                center_lat: first.center_lat,
                center_lng: first.center_lng,
            });
            expected += TimeDelta::hours(1);
        }
        expected = row.bucket + TimeDelta::hours(1);
        filled.push(row);
    }
    filled
}

fn derive_for_cell(
    series: &[EnrichedRow],
    config: &PipelineConfig,
    tz: Tz,
    out: &mut Vec<FeatureRow>,
) {
    let calls: Vec<u32> = series.iter().map(|r| r.calls).collect();

    for (i, row) in series.iter().enumerate() {
        let local = row.bucket.with_timezone(&tz);
        let day_of_week = local.weekday().num_days_from_monday();

        let lags = config
            .features
            .lags
            .iter()
            .map(|&k| if i >= k { Some(calls[i - k]) } else { None })
            .collect();

        let mut roll_means = Vec::with_capacity(config.features.rolling_windows.len());
        let mut roll_stds = Vec::with_capacity(config.features.rolling_windows.len());
        for &w in &config.features.rolling_windows {
            // Window over the shifted series: the w values ending at
            // calls[i - 1], clipped to the start of the sequence.
            let start = i.saturating_sub(w);
            let window = &calls[start..i];
            roll_means.push(rolling_mean(window));
            roll_stds.push(rolling_std(window));
        }

        out.push(FeatureRow {
            cell: row.cell,
            bucket: row.bucket,
            calls: row.calls,
            center_lat: row.center_lat,
            center_lng: row.center_lng,
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            day_of_week,
            is_weekend: day_of_week >= 5,
            lags,
            roll_means,
            roll_stds,
        });
    }
}

/// Mean with a minimum-period of one: any history at all yields a value.
fn rolling_mean(window: &[u32]) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    Some(window.iter().map(|&v| f64::from(v)).sum::<f64>() / window.len() as f64)
}

/// Sample standard deviation; undefined (not zero) below two observations.
fn rolling_std(window: &[u32]) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let variance = window
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    Some(variance.sqrt())
}
