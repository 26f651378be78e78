//! Deterministic spatial indexing on the H3 hexagonal grid.
//!
//! All three operations are pure: `cell_of` depends only on the coordinate
//! pair and the resolution, and `centroid_of`/`boundary_of` depend only on
//! the cell index. Events never influence cell geometry.

use std::str::FromStr;

use anyhow::{Context, Result};
use h3o::{CellIndex, LatLng, Resolution};

/// Maps a coordinate pair to its H3 cell at the given resolution.
///
/// Coordinates outside the valid latitude/longitude ranges are an error;
/// callers treat those rows as row-level defects and drop them.
pub fn cell_of(lat: f64, lng: f64, resolution: Resolution) -> Result<CellIndex> {
    anyhow::ensure!(
        (-90.0..=90.0).contains(&lat),
        "latitude {} out of range [-90, 90]",
        lat
    );
    anyhow::ensure!(
        (-180.0..=180.0).contains(&lng),
        "longitude {} out of range [-180, 180]",
        lng
    );
    let coord = LatLng::new(lat, lng)
        .with_context(|| format!("Invalid coordinate ({}, {})", lat, lng))?;
    Ok(coord.to_cell(resolution))
}

/// Returns the cell centroid as (lat, lng) degrees.
pub fn centroid_of(cell: CellIndex) -> (f64, f64) {
    let center = LatLng::from(cell);
    (center.lat(), center.lng())
}

/// Returns the cell boundary as a closed ring in (lng, lat) vertex order.
///
/// The coordinate order is reversed from the internal (lat, lng) convention
/// on purpose: geospatial consumers (GeoJSON) expect longitude first. The
/// first vertex is repeated as the last to close the ring.
pub fn boundary_of(cell: CellIndex) -> Vec<(f64, f64)> {
    let mut ring: Vec<(f64, f64)> = cell
        .boundary()
        .iter()
        .map(|v| (v.lng(), v.lat()))
        .collect();
    if let Some(&first) = ring.first() {
        ring.push(first);
    }
    ring
}

/// Parses a cell id previously produced by `CellIndex::to_string`.
pub fn parse_cell(s: &str) -> Result<CellIndex> {
    CellIndex::from_str(s).with_context(|| format!("Invalid H3 cell id: {}", s))
}
