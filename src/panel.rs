//! Aggregation of events into the (cell, hour) panel.
//!
//! Counting is associative and commutative, so event order is irrelevant;
//! the output is sorted by (cell, bucket) to make runs byte-reproducible.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use h3o::CellIndex;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::events::{bucket_hour, Event};
use crate::grid;

/// One aggregated record: the call count for a (cell, hour bucket) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRow {
    pub cell: CellIndex,
    pub bucket: DateTime<Utc>,
    pub calls: u32,
}

/// The aggregated panel, sorted by (cell, bucket) with unique keys.
#[derive(Debug, Clone)]
pub struct Panel {
    pub rows: Vec<PanelRow>,
    /// Number of events that survived row-level validation and were counted.
    pub source_events: usize,
}

/// A violated integrity invariant. Always fatal: it indicates a logic
/// defect in indexing or bucketing, not a data quality issue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("aggregated call count {aggregated} does not match source event count {expected}")]
    CountMismatch { expected: u64, aggregated: u64 },
}

impl Panel {
    pub fn total_calls(&self) -> u64 {
        self.rows.iter().map(|r| u64::from(r.calls)).sum()
    }

    pub fn distinct_cells(&self) -> Vec<CellIndex> {
        // Rows are sorted by cell, so consecutive duplicates collapse
        let mut cells: Vec<CellIndex> = self.rows.iter().map(|r| r.cell).collect();
        cells.dedup();
        cells
    }
}

/// Aggregates events into one row per observed (cell, hour bucket) pair.
///
/// Events whose coordinates fall outside the valid range are dropped here
/// and excluded from the conservation denominator. The conservation check
/// runs before the panel is returned; a mismatch aborts the run.
pub fn aggregate(events: &[Event], config: &PipelineConfig) -> Result<Panel> {
    let resolution = config.grid.resolution()?;

    let mut counts: BTreeMap<(CellIndex, DateTime<Utc>), u32> = BTreeMap::new();
    let mut dropped_location = 0usize;
    let mut counted = 0usize;

    for event in events {
        let cell = match grid::cell_of(event.latitude, event.longitude, resolution) {
            Ok(cell) => cell,
            Err(_) => {
                dropped_location += 1;
                continue;
            }
        };
        let bucket = bucket_hour(event.timestamp);
        *counts.entry((cell, bucket)).or_insert(0) += 1;
        counted += 1;
    }

    if dropped_location > 0 {
        tracing::info!(
            "Dropped {} events with out-of-range coordinates",
            dropped_location
        );
    }

    let rows: Vec<PanelRow> = counts
        .into_iter()
        .map(|((cell, bucket), calls)| PanelRow { cell, bucket, calls })
        .collect();

    let panel = Panel {
        rows,
        source_events: counted,
    };

    let aggregated = panel.total_calls();
    if aggregated != counted as u64 {
        return Err(IntegrityError::CountMismatch {
            expected: counted as u64,
            aggregated,
        }
        .into());
    }

    tracing::info!(
        "Aggregated {} events into {} (cell, hour) rows",
        counted,
        panel.rows.len()
    );

    Ok(panel)
}
