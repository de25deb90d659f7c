//! Speech Fragment Player (sfp-play) - Main entry point
//!
//! Replays a recorded delivery timeline through the fragment engine and
//! prints the resulting metrics as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sfp_common::events::EngineEvent;
use sfp_engine::audio::{RenderSink, SimulatedSink};
use sfp_engine::config::FileConfig;
use sfp_engine::{replay, FragmentEngine};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for sfp-play
#[derive(Parser, Debug)]
#[command(name = "sfp-play")]
#[command(about = "Replay speech fragment deliveries through the playback engine")]
#[command(version)]
struct Args {
    /// JSON Lines timeline of deliveries
    #[arg(short, long)]
    input: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long, env = "SFP_CONFIG")]
    config: Option<PathBuf>,

    /// Issue a hard stop this many milliseconds into the replay
    #[arg(long)]
    interrupt_at_ms: Option<u64>,

    /// How long to wait for playback to finish after the last delivery
    #[arg(long, default_value = "30000")]
    settle_ms: u64,

    /// Print every engine event as a JSON line
    #[arg(long)]
    events: bool,

    /// Sample rate of the simulated output
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Play through an audio device instead of simulating output
    #[cfg(feature = "device-output")]
    #[arg(long)]
    device_output: bool,

    /// Output device name (default device if omitted)
    #[cfg(feature = "device-output")]
    #[arg(long, env = "SFP_AUDIO_DEVICE")]
    device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = FileConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the config file
    let default_filter = format!(
        "sfp_engine={level},sfp_common={level},sfp_play={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read timeline {}", args.input.display()))?;
    let steps = replay::parse_timeline(&content, args.interrupt_at_ms)
        .context("Failed to parse timeline")?;
    info!(
        "Replaying {} step(s) from {}",
        steps.len(),
        args.input.display()
    );

    let mut builder = FragmentEngine::builder()
        .config(config.engine.clone())
        .sink(make_sink(&args)?);
    if args.events {
        builder = builder.observer(Arc::new(|event: &EngineEvent| {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{}", line);
            }
        }));
    }
    let engine = builder.build().context("Failed to initialize fragment engine")?;

    let scheduler = engine.spawn_scheduler();
    let metrics = replay::run(&engine, &steps, Duration::from_millis(args.settle_ms)).await;
    scheduler.abort();

    println!(
        "{}",
        serde_json::to_string_pretty(&metrics).context("Failed to serialize metrics")?
    );
    Ok(())
}

#[cfg(feature = "device-output")]
fn make_sink(args: &Args) -> Result<Arc<dyn RenderSink>> {
    if args.device_output {
        let sink = sfp_engine::audio::output::CpalSink::new(args.device.clone())
            .context("Failed to open audio device")?;
        return Ok(Arc::new(sink));
    }
    Ok(Arc::new(SimulatedSink::new(args.sample_rate)))
}

#[cfg(not(feature = "device-output"))]
fn make_sink(args: &Args) -> Result<Arc<dyn RenderSink>> {
    Ok(Arc::new(SimulatedSink::new(args.sample_rate)))
}
