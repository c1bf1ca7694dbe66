//! restore-split: split and scatter regions for a set of backup key ranges

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use br_core::{sort_ranges, span, KeyRange};
use restore::{Config, OnlineRestore, RegionClient, RegionSplitter, SplitClient};

/// Split regions at backup range boundaries and scatter them
#[derive(Parser, Debug)]
#[command(name = "restore-split")]
#[command(about = "Prepare cluster regions for a restore")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Metadata service address (repeatable)
    #[arg(long = "pd")]
    pd: Vec<String>,

    /// JSON file with the key ranges to prepare
    #[arg(long)]
    ranges: PathBuf,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Wait for scatter operators to finish
    #[arg(long)]
    wait_scatter: bool,

    /// Pin restored regions to the configured restore stores
    #[arg(long)]
    online: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {:?}", path))?,
        None => Config::default(),
    };

    // Command line overrides
    if !args.pd.is_empty() {
        config.pd.endpoints = args.pd.clone();
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if args.wait_scatter {
        config.split.wait_for_scatter = true;
    }
    if args.online {
        config.online.enabled = true;
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log.level())
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let content = std::fs::read_to_string(&args.ranges)
        .with_context(|| format!("failed to read ranges {:?}", args.ranges))?;
    let ranges: Vec<KeyRange> = serde_json::from_str(&content).context("invalid ranges file")?;
    info!("Loaded {} range(s) from {:?}", ranges.len(), args.ranges);

    let client: Arc<dyn SplitClient> = Arc::new(RegionClient::connect(&config).await?);

    let restored_span = span(&sort_ranges(ranges.clone())?);
    let online = match restored_span {
        Some(restored) if config.online.enabled => Some(
            OnlineRestore::begin(client.clone(), config.online.clone(), restored).await?,
        ),
        _ => None,
    };

    let splitter = RegionSplitter::new(client.clone(), config.split.clone());
    let result = splitter.split(ranges).await;

    if let Some(online) = online {
        if let Err(e) = online.finish().await {
            warn!("Failed to finish online restore: {}", e);
        }
    }

    let summary = result?;
    info!(
        "Prepared {} range(s): {} split point(s), {} region(s) split, {} new region(s), {} scattered",
        summary.ranges,
        summary.split_points,
        summary.split_regions,
        summary.new_regions,
        summary.scattered
    );

    Ok(())
}
