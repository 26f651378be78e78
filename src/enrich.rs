//! Left join of the aggregated panel with cell metadata.
//!
//! The aggregate `calls` value is the primary signal: a metadata gap yields
//! null centroid fields, never a dropped row.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use h3o::CellIndex;

use crate::meta::CellMeta;
use crate::panel::Panel;

/// A panel row extended with the matching cell centroid, when present.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    pub cell: CellIndex,
    pub bucket: DateTime<Utc>,
    pub calls: u32,
    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,
}

/// Joins panel rows with metadata on cell id, preserving every panel row.
pub fn enrich(panel: &Panel, meta: &[CellMeta]) -> Vec<EnrichedRow> {
    let by_cell: HashMap<CellIndex, &CellMeta> = meta.iter().map(|m| (m.cell, m)).collect();

    let rows: Vec<EnrichedRow> = panel
        .rows
        .iter()
        .map(|row| {
            let matched = by_cell.get(&row.cell);
            EnrichedRow {
                cell: row.cell,
                bucket: row.bucket,
                calls: row.calls,
                center_lat: matched.map(|m| m.center_lat),
                center_lng: matched.map(|m| m.center_lng),
            }
        })
        .collect();

    let unmatched = rows.iter().filter(|r| r.center_lat.is_none()).count();
    if unmatched > 0 {
        tracing::warn!("{} panel rows have no matching cell metadata", unmatched);
    }
    tracing::info!("Enriched {} panel rows", rows.len());

    rows
}

#[cfg(test)]
mod tests {
    use h3o::Resolution;

    use super::*;
    use crate::grid;
    use crate::panel::PanelRow;

    fn cell(lat: f64, lng: f64) -> CellIndex {
        grid::cell_of(lat, lng, Resolution::try_from(8).unwrap()).unwrap()
    }

    fn bucket(hour: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(hour * 3600, 0).unwrap()
    }

    fn panel_of(rows: Vec<PanelRow>) -> Panel {
        let source_events = rows.iter().map(|r| r.calls as usize).sum();
        Panel {
            rows,
            source_events,
        }
    }

    #[test]
    fn test_enrich_attaches_centroids() {
        let c = cell(40.70, -74.00);
        let panel = panel_of(vec![PanelRow {
            cell: c,
            bucket: bucket(0),
            calls: 3,
        }]);
        let meta = crate::meta::build_meta(&panel);

        let enriched = enrich(&panel, &meta);
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].center_lat.is_some());
        assert!(enriched[0].center_lng.is_some());
        assert_eq!(enriched[0].calls, 3);
    }

    #[test]
    fn test_enrich_preserves_row_count_without_metadata() {
        let c = cell(40.70, -74.00);
        let panel = panel_of(vec![
            PanelRow {
                cell: c,
                bucket: bucket(0),
                calls: 2,
            },
            PanelRow {
                cell: c,
                bucket: bucket(1),
                calls: 1,
            },
        ]);

        // Empty metadata table: rows survive with null centroid fields
        let enriched = enrich(&panel, &[]);
        assert_eq!(enriched.len(), panel.rows.len());
        assert!(enriched.iter().all(|r| r.center_lat.is_none()));
    }

    #[test]
    fn test_enrich_partial_metadata() {
        let a = cell(40.70, -74.00);
        let b = cell(40.80, -73.90);
        let panel = panel_of(vec![
            PanelRow {
                cell: a,
                bucket: bucket(0),
                calls: 1,
            },
            PanelRow {
                cell: b,
                bucket: bucket(0),
                calls: 1,
            },
        ]);
        let (lat, lng) = grid::centroid_of(a);
        let meta = vec![CellMeta {
            cell: a,
            center_lat: lat,
            center_lng: lng,
        }];

        let enriched = enrich(&panel, &meta);
        assert_eq!(enriched.len(), 2);
        let matched = enriched.iter().find(|r| r.cell == a).unwrap();
        let unmatched = enriched.iter().find(|r| r.cell == b).unwrap();
        assert!(matched.center_lat.is_some());
        assert!(unmatched.center_lat.is_none());
        assert_eq!(unmatched.calls, 1, "calls survive a metadata gap");
    }
}
