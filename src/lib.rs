//! Call Panel Library
//!
//! Converts a stream of geolocated, timestamped emergency-call events into
//! an hourly spatio-temporal panel on the H3 grid, then augments it with
//! leakage-free lag and rolling-window features for forecasting.

pub mod config;
pub mod enrich;
pub mod events;
pub mod features;
pub mod grid;
pub mod meta;
pub mod panel;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use enrich::{enrich, EnrichedRow};
pub use events::{bucket_hour, display_bucket, parse_timestamp, read_events, Event, EventBatch};
pub use features::{derive_features, FeatureRow};
pub use grid::{boundary_of, cell_of, centroid_of, parse_cell};
pub use meta::{build_meta, export_geojson, read_meta_csv, write_meta_csv, CellMeta};
pub use panel::{aggregate, IntegrityError, Panel, PanelRow};
pub use pipeline::ArtifactPaths;
