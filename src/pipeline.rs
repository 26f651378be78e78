//! Stage orchestration.
//!
//! Each stage reads its complete input, computes its complete output, and
//! persists it before the next stage begins. The individual stage entry
//! points mirror the artifact handoff, so a stage can also be rerun on its
//! own against the previous run's files.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::PipelineConfig;
use crate::enrich::enrich;
use crate::events::read_events;
use crate::features::derive_features;
use crate::meta::{build_meta, export_geojson, read_meta_csv, write_meta_csv};
use crate::panel::{aggregate, Panel};
use crate::store;

/// Artifact paths for one run, all under the configured output directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub panel: PathBuf,
    pub cell_meta: PathBuf,
    pub geojson: PathBuf,
    pub enriched: PathBuf,
    pub model_ready: PathBuf,
}

impl ArtifactPaths {
    pub fn new(config: &PipelineConfig) -> Self {
        let dir = &config.paths.output_dir;
        Self {
            panel: dir.join("panel.parquet"),
            cell_meta: dir.join("cell_meta.csv"),
            geojson: dir.join("cells.geojson"),
            enriched: dir.join("panel_enriched.parquet"),
            model_ready: dir.join("model_ready.parquet"),
        }
    }
}

/// Runs the full pipeline: events -> panel -> metadata -> enriched -> features.
pub fn run(config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    let paths = ArtifactPaths::new(config);
    fs::create_dir_all(&config.paths.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.paths.output_dir.display()
        )
    })?;

    let panel = aggregate_stage(config, &paths)?;
    let enriched_rows = enrich_panel(config, &paths, &panel)?;
    features_from_rows(config, &paths, &enriched_rows)?;

    tracing::info!("Pipeline complete; artifacts in {}", config.paths.output_dir.display());
    Ok(())
}

/// Stage 1+2: read events, aggregate, persist the panel and cell metadata,
/// and attempt the optional GeoJSON export.
pub fn aggregate_stage(config: &PipelineConfig, paths: &ArtifactPaths) -> Result<Panel> {
    let batch = read_events(&config.paths.input)?;
    let panel = aggregate(&batch.events, config)?;
    store::write_panel(&paths.panel, &panel, config)?;
    tracing::info!("Saved panel: {}", paths.panel.display());

    let meta = build_meta(&panel);
    write_meta_csv(&paths.cell_meta, &meta)?;
    tracing::info!("Saved cell metadata: {}", paths.cell_meta.display());

    // Presentation convenience only; a failure must not fail the run
    match export_geojson(&paths.geojson, &meta) {
        Ok(()) => tracing::info!("Saved GeoJSON: {}", paths.geojson.display()),
        Err(e) => tracing::warn!("Skipping GeoJSON export: {:#}", e),
    }

    Ok(panel)
}

/// Stage 3: left-join the panel with cell metadata and persist it.
pub fn enrich_stage(config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    let paths = ArtifactPaths::new(config);
    let panel = store::read_panel(&paths.panel, config)?;
    enrich_panel(config, &paths, &panel)?;
    Ok(())
}

fn enrich_panel(
    config: &PipelineConfig,
    paths: &ArtifactPaths,
    panel: &Panel,
) -> Result<Vec<crate::enrich::EnrichedRow>> {
    let meta = read_meta_csv(&paths.cell_meta)?;
    let rows = enrich(panel, &meta);
    store::write_enriched(&paths.enriched, &rows, config)?;
    tracing::info!("Saved enriched panel: {}", paths.enriched.display());
    Ok(rows)
}

/// Stage 4: derive lag/rolling/calendar features and persist the
/// model-ready table.
pub fn features_stage(config: &PipelineConfig) -> Result<()> {
    config.validate()?;
    let paths = ArtifactPaths::new(config);
    let rows = store::read_enriched(&paths.enriched, config)?;
    features_from_rows(config, &paths, &rows)?;
    Ok(())
}

fn features_from_rows(
    config: &PipelineConfig,
    paths: &ArtifactPaths,
    rows: &[crate::enrich::EnrichedRow],
) -> Result<()> {
    let features = derive_features(rows, config)?;
    store::write_features(&paths.model_ready, &features, config)?;
    tracing::info!("Saved model-ready panel: {}", paths.model_ready.display());
    Ok(())
}
