//! End-to-end pipeline tests over real artifact files.
//!
//! Each test writes an event CSV into a temp directory, runs the pipeline,
//! and inspects the persisted artifacts the way an external consumer would.

use std::fs;
use std::io::Write;
use std::path::Path;

use call_panel::config::{FeaturesConfig, GridConfig, PathsConfig, PipelineConfig, TimeConfig};
use call_panel::{pipeline, store, ArtifactPaths};

fn config_for(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        paths: PathsConfig {
            input: dir.join("events.csv"),
            output_dir: dir.join("out"),
        },
        grid: GridConfig::default(),
        time: TimeConfig::default(),
        features: FeaturesConfig::default(),
    }
}

fn write_events(path: &Path, rows: &[&str]) {
    let mut file = fs::File::create(path).unwrap();
    writeln!(file, "timestamp,latitude,longitude,call_type,borough").unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
}

#[test]
fn test_full_run_produces_all_mandatory_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &[
            "2021-01-01T00:10:00Z,40.70,-74.00,Medical,Manhattan",
            "2021-01-01T00:50:00Z,40.70,-74.00,Fire,Manhattan",
            "2021-01-01T01:05:00Z,40.71,-74.00,Medical,Manhattan",
        ],
    );

    pipeline::run(&config).unwrap();

    let paths = ArtifactPaths::new(&config);
    assert!(paths.panel.exists());
    assert!(paths.cell_meta.exists());
    assert!(paths.geojson.exists());
    assert!(paths.enriched.exists());
    assert!(paths.model_ready.exists());
}

#[test]
fn test_conservation_over_valid_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &[
            // Three valid events, one bad timestamp, one bad latitude
            "2021-01-01T00:10:00Z,40.70,-74.00,,",
            "2021-01-01T00:50:00Z,40.70,-74.00,,",
            "2021-01-01T01:05:00Z,40.71,-74.00,,",
            "garbage,40.70,-74.00,,",
            "2021-01-01T02:00:00Z,95.00,-74.00,,",
        ],
    );

    pipeline::run(&config).unwrap();

    let paths = ArtifactPaths::new(&config);
    let panel = store::read_panel(&paths.panel, &config).unwrap();
    assert_eq!(panel.total_calls(), 3);
}

#[test]
fn test_adjacent_cells_split_into_two_rows() {
    // Two events in one (cell, hour), one in a neighbouring cell an hour
    // later: exactly two panel rows, calls 2 and 1.
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &[
            "2021-01-01T00:10:00Z,40.70,-74.00,,",
            "2021-01-01T00:50:00Z,40.70,-74.00,,",
            "2021-01-01T01:05:00Z,40.71,-74.00,,",
        ],
    );

    pipeline::run(&config).unwrap();

    let paths = ArtifactPaths::new(&config);
    let panel = store::read_panel(&paths.panel, &config).unwrap();
    assert_eq!(panel.rows.len(), 2);
    let mut calls: Vec<u32> = panel.rows.iter().map(|r| r.calls).collect();
    calls.sort_unstable();
    assert_eq!(calls, vec![1, 2]);
}

#[test]
fn test_enriched_row_count_matches_panel() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &[
            "2021-01-01T00:10:00Z,40.70,-74.00,,",
            "2021-01-01T03:00:00Z,40.70,-74.00,,",
            "2021-01-01T05:00:00Z,40.80,-73.90,,",
        ],
    );

    pipeline::run(&config).unwrap();

    let paths = ArtifactPaths::new(&config);
    let panel = store::read_panel(&paths.panel, &config).unwrap();
    let enriched = store::read_enriched(&paths.enriched, &config).unwrap();
    assert_eq!(enriched.len(), panel.rows.len());
    assert!(enriched.iter().all(|r| r.center_lat.is_some()));
}

#[test]
fn test_rerun_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &[
            "2021-01-01T00:10:00Z,40.70,-74.00,,",
            "2021-01-01T00:50:00Z,40.70,-74.00,,",
            "2021-01-01T01:05:00Z,40.71,-74.00,,",
            "2021-01-02T13:00:00Z,40.75,-73.95,,",
        ],
    );

    pipeline::run(&config).unwrap();
    let paths = ArtifactPaths::new(&config);
    let first_panel = fs::read(&paths.panel).unwrap();
    let first_meta = fs::read_to_string(&paths.cell_meta).unwrap();
    let first_features = store::read_enriched(&paths.enriched, &config).unwrap();

    pipeline::run(&config).unwrap();
    let second_panel = fs::read(&paths.panel).unwrap();
    let second_meta = fs::read_to_string(&paths.cell_meta).unwrap();
    let second_features = store::read_enriched(&paths.enriched, &config).unwrap();

    assert_eq!(first_panel, second_panel);
    assert_eq!(first_meta, second_meta);
    assert_eq!(first_features, second_features);
}

#[test]
fn test_later_run_replaces_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &["2021-01-01T00:10:00Z,40.70,-74.00,,"],
    );
    pipeline::run(&config).unwrap();

    // A second run with different input fully regenerates the artifacts
    write_events(
        &config.paths.input,
        &[
            "2021-06-01T12:10:00Z,40.80,-73.90,,",
            "2021-06-01T12:20:00Z,40.80,-73.90,,",
        ],
    );
    pipeline::run(&config).unwrap();

    let paths = ArtifactPaths::new(&config);
    let panel = store::read_panel(&paths.panel, &config).unwrap();
    assert_eq!(panel.rows.len(), 1);
    assert_eq!(panel.total_calls(), 2);
}

#[test]
fn test_stagewise_run_matches_full_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_events(
        &config.paths.input,
        &[
            "2021-01-01T00:10:00Z,40.70,-74.00,,",
            "2021-01-01T01:50:00Z,40.70,-74.00,,",
            "2021-01-01T02:05:00Z,40.71,-74.00,,",
        ],
    );

    // Stage by stage, reading each predecessor from disk
    fs::create_dir_all(&config.paths.output_dir).unwrap();
    let paths = ArtifactPaths::new(&config);
    pipeline::aggregate_stage(&config, &paths).unwrap();
    pipeline::enrich_stage(&config).unwrap();
    pipeline::features_stage(&config).unwrap();
    let staged = fs::read(&paths.model_ready).unwrap();

    // Full run into a second directory
    let dir2 = tempfile::tempdir().unwrap();
    let mut config2 = config_for(dir2.path());
    fs::copy(&config.paths.input, &config2.paths.input).unwrap();
    config2.paths.output_dir = dir2.path().join("out");
    pipeline::run(&config2).unwrap();
    let full = fs::read(ArtifactPaths::new(&config2).model_ready).unwrap();

    assert_eq!(staged, full);
}

#[test]
fn test_missing_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    assert!(pipeline::run(&config).is_err());
}

#[test]
fn test_missing_column_is_fatal_before_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let mut file = fs::File::create(&config.paths.input).unwrap();
    writeln!(file, "timestamp,latitude").unwrap();
    writeln!(file, "2021-01-01T00:10:00Z,40.70").unwrap();

    assert!(pipeline::run(&config).is_err());
    assert!(!ArtifactPaths::new(&config).panel.exists());
}
