use std::path::PathBuf;

use anyhow::{Context, Result};
use call_panel::{config::PipelineConfig, pipeline};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "call-panel")]
#[command(about = "Aggregate emergency-call events into a model-ready hourly panel")]
struct Args {
    /// Override the input event CSV path
    #[arg(long)]
    input: Option<PathBuf>,

    /// Override the artifact output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: aggregate, enrich, derive features
    Run,
    /// Aggregate events into the (cell, hour) panel and cell metadata
    Aggregate,
    /// Join the persisted panel with cell metadata
    Enrich,
    /// Derive lag/rolling/calendar features from the enriched panel
    Features,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("call_panel=debug");

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let mut config = PipelineConfig::load().context("Failed to load configuration")?;
    if let Some(input) = args.input {
        config.paths.input = input;
    }
    if let Some(output_dir) = args.output_dir {
        config.paths.output_dir = output_dir;
    }
    config.validate().context("Invalid configuration")?;

    match args.command {
        Command::Run => pipeline::run(&config),
        Command::Aggregate => {
            let paths = pipeline::ArtifactPaths::new(&config);
            std::fs::create_dir_all(&config.paths.output_dir).with_context(|| {
                format!(
                    "Failed to create output directory {}",
                    config.paths.output_dir.display()
                )
            })?;
            pipeline::aggregate_stage(&config, &paths).map(|_| ())
        }
        Command::Enrich => pipeline::enrich_stage(&config),
        Command::Features => pipeline::features_stage(&config),
    }
}
