//! Per-cell metadata: centroid table and optional GeoJSON export.
//!
//! Metadata is a pure function of which cells appear in the panel, never of
//! how many events they hold. The table is fully regenerated on every run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use h3o::CellIndex;
use serde::{Deserialize, Serialize};

use crate::grid;
use crate::panel::Panel;

/// Centroid metadata for one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellMeta {
    pub cell: CellIndex,
    pub center_lat: f64,
    pub center_lng: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CellMetaRecord {
    cell_id: String,
    center_lat: f64,
    center_lng: f64,
}

/// Builds one metadata row per distinct cell in the panel.
pub fn build_meta(panel: &Panel) -> Vec<CellMeta> {
    let meta: Vec<CellMeta> = panel
        .distinct_cells()
        .into_iter()
        .map(|cell| {
            let (center_lat, center_lng) = grid::centroid_of(cell);
            CellMeta {
                cell,
                center_lat,
                center_lng,
            }
        })
        .collect();
    tracing::info!("Built metadata for {} cells", meta.len());
    meta
}

/// Writes the metadata table as delimited text, via a temporary file so a
/// crash never leaves a partial artifact behind.
pub fn write_meta_csv(path: &Path, meta: &[CellMeta]) -> Result<()> {
    let temp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&temp_path)
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        for row in meta {
            writer.serialize(CellMetaRecord {
                cell_id: row.cell.to_string(),
                center_lat: row.center_lat,
                center_lng: row.center_lng,
            })?;
        }
        writer.flush().context("Failed to flush cell metadata")?;
    }
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to publish {}", path.display()))?;
    Ok(())
}

/// Reads a metadata table previously written by `write_meta_csv`.
pub fn read_meta_csv(path: &Path) -> Result<Vec<CellMeta>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open cell metadata {}", path.display()))?;
    let mut meta = Vec::new();
    for record in reader.deserialize::<CellMetaRecord>() {
        let record = record.context("Malformed cell metadata row")?;
        meta.push(CellMeta {
            cell: grid::parse_cell(&record.cell_id)?,
            center_lat: record.center_lat,
            center_lng: record.center_lng,
        });
    }
    Ok(meta)
}

/// Exports cell boundaries as a GeoJSON feature collection for mapping.
///
/// Each feature is a closed polygon ring in (lng, lat) vertex order with the
/// cell id as its only property. The pipeline treats failures here as
/// non-fatal: the export is a presentation convenience.
pub fn export_geojson(path: &Path, meta: &[CellMeta]) -> Result<()> {
    let features: Vec<Feature> = meta
        .iter()
        .map(|row| {
            let ring: Vec<Vec<f64>> = grid::boundary_of(row.cell)
                .into_iter()
                .map(|(lng, lat)| vec![lng, lat])
                .collect();
            let mut properties = JsonObject::new();
            properties.insert("cell_id".to_string(), row.cell.to_string().into());
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    let temp_path = path.with_extension("geojson.tmp");
    let json = serde_json::to_string(&collection).context("Failed to serialize GeoJSON")?;
    fs::write(&temp_path, json)
        .with_context(|| format!("Failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to publish {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use h3o::Resolution;

    use super::*;
    use crate::panel::PanelRow;

    fn cell(lat: f64, lng: f64) -> CellIndex {
        grid::cell_of(lat, lng, Resolution::try_from(8).unwrap()).unwrap()
    }

    fn panel_with_cells(cells: &[CellIndex]) -> Panel {
        let rows = cells
            .iter()
            .enumerate()
            .map(|(i, &c)| PanelRow {
                cell: c,
                bucket: chrono::DateTime::from_timestamp(3600 * i as i64, 0).unwrap(),
                calls: 1,
            })
            .collect();
        Panel {
            rows,
            source_events: cells.len(),
        }
    }

    #[test]
    fn test_build_meta_one_row_per_cell() {
        let a = cell(40.70, -74.00);
        let b = cell(40.80, -73.90);
        let panel = panel_with_cells(&[a, a, b]);
        let meta = build_meta(&panel);
        assert_eq!(meta.len(), 2);
    }

    #[test]
    fn test_build_meta_centroid_matches_grid() {
        let c = cell(40.70, -74.00);
        let panel = panel_with_cells(&[c]);
        let meta = build_meta(&panel);
        let (lat, lng) = grid::centroid_of(c);
        assert_relative_eq!(meta[0].center_lat, lat);
        assert_relative_eq!(meta[0].center_lng, lng);
    }

    #[test]
    fn test_meta_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell_meta.csv");
        let meta = build_meta(&panel_with_cells(&[cell(40.70, -74.00), cell(40.80, -73.90)]));

        write_meta_csv(&path, &meta).unwrap();
        let read_back = read_meta_csv(&path).unwrap();
        assert_eq!(meta, read_back);
    }

    #[test]
    fn test_meta_csv_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell_meta.csv");
        write_meta_csv(&path, &build_meta(&panel_with_cells(&[cell(40.70, -74.00)]))).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_geojson_polygons_are_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.geojson");
        let meta = build_meta(&panel_with_cells(&[cell(40.70, -74.00)]));
        export_geojson(&path, &meta).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: FeatureCollection = raw.parse().unwrap();
        assert_eq!(parsed.features.len(), 1);

        let geometry = parsed.features[0].geometry.as_ref().unwrap();
        let Value::Polygon(rings) = &geometry.value else {
            panic!("expected polygon geometry");
        };
        let ring = &rings[0];
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_geojson_carries_cell_id_property() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.geojson");
        let c = cell(40.70, -74.00);
        export_geojson(&path, &build_meta(&panel_with_cells(&[c]))).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: FeatureCollection = raw.parse().unwrap();
        let properties = parsed.features[0].properties.as_ref().unwrap();
        assert_eq!(
            properties.get("cell_id").and_then(|v| v.as_str()),
            Some(c.to_string().as_str())
        );
    }
}
