use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use h3o::Resolution;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub grid: GridConfig,
    pub time: TimeConfig,
    pub features: FeaturesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Cleaned event table (CSV) produced by the upstream cleaning step.
    pub input: PathBuf,
    /// Directory where all pipeline artifacts are written.
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GridConfig {
    /// H3 resolution (0-15). Coarser values merge more area per cell.
    pub resolution: u8,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { resolution: 8 }
    }
}

impl GridConfig {
    pub fn resolution(&self) -> Result<Resolution> {
        Resolution::try_from(self.resolution)
            .with_context(|| format!("Invalid H3 resolution: {}", self.resolution))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeConfig {
    /// IANA timezone name used to present hour buckets and derive
    /// calendar features. Bucketing itself always happens in UTC.
    pub display_timezone: String,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            display_timezone: "America/New_York".to_string(),
        }
    }
}

impl TimeConfig {
    pub fn timezone(&self) -> Result<Tz> {
        Tz::from_str(&self.display_timezone)
            .map_err(|e| anyhow::anyhow!("Invalid display timezone: {}", e))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    /// Lag offsets, in observed steps of each cell's series.
    pub lags: Vec<usize>,
    /// Rolling window widths for mean/std over the shifted series.
    pub rolling_windows: Vec<usize>,
    /// Materialize zero-call hours between each cell's first and last
    /// observed bucket before deriving lag/rolling features.
    pub zero_fill: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3, 6, 12, 24],
            rolling_windows: vec![3, 6, 12, 24],
            zero_fill: false,
        }
    }
}

impl PipelineConfig {
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("call-panel");

        let builder = Config::builder()
            // 1. Load default values
            // Paths
            .set_default("paths.input", "data/events.csv")?
            .set_default("paths.output_dir", "data")?
            // Grid
            .set_default("grid.resolution", 8)?
            // Time
            .set_default("time.display_timezone", "America/New_York")?
            // Features
            .set_default("features.lags", vec![1i64, 2, 3, 6, 12, 24])?
            .set_default("features.rolling_windows", vec![3i64, 6, 12, 24])?
            .set_default("features.zero_fill", false)?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // 4. Load from environment variables (CALLPANEL_GRID__RESOLUTION=...)
            .add_source(Environment::with_prefix("CALLPANEL").separator("__"));

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }

    /// Validates the derived configuration values (resolution and timezone
    /// parse) before any stage runs.
    pub fn validate(&self) -> Result<()> {
        self.grid.resolution()?;
        self.time.timezone()?;
        anyhow::ensure!(!self.features.lags.is_empty(), "features.lags is empty");
        anyhow::ensure!(
            !self.features.rolling_windows.is_empty(),
            "features.rolling_windows is empty"
        );
        anyhow::ensure!(
            self.features.lags.iter().all(|&k| k > 0),
            "lag offsets must be positive"
        );
        anyhow::ensure!(
            self.features.rolling_windows.iter().all(|&w| w > 0),
            "rolling windows must be positive"
        );
        Ok(())
    }
}
