use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use harmonic_tessellations_core::{
    AnimationDriver, AppConfig, FrameRecorder, ManualTicker, OfflineDevice, TickOutcome,
    TransformKind, Viewport, MAX_COMPLEXITY,
};
use tracing_subscriber::EnvFilter;

fn main() -> harmonic_tessellations_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            interval_ms,
            complexity,
            transform,
            muted,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(complexity) = complexity {
                config.session.complexity = complexity;
            }
            if let Some(transform) = transform {
                config.session.transform = transform;
            }
            config.session.muted |= muted;
            run_session(&config, frames, interval_ms)
        }
    }
}

fn load_config(path: Option<&Path>) -> harmonic_tessellations_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_session(
    config: &AppConfig,
    frames: u32,
    interval_ms: f64,
) -> harmonic_tessellations_core::Result<()> {
    tracing::info!(frames, interval_ms, "starting headless session");

    let device = OfflineDevice::new(config.audio.sample_rate);
    let probe = device.probe();
    let mut driver = AnimationDriver::new(
        config,
        Box::new(device),
        FrameRecorder::new(Viewport::default()),
        ManualTicker::new(),
    );

    if let Err(err) = driver.initialize() {
        tracing::warn!(%err, "continuing without audio");
    }
    driver.start();

    let mut timestamp = 0.0;
    let mut rendered = 0u32;
    for frame in 0..frames {
        let Some(token) = driver.ticker_mut().take_pending() else {
            break;
        };
        match driver.tick(token, timestamp) {
            TickOutcome::Rendered { vertices, tones } => {
                rendered += 1;
                tracing::debug!(frame, vertices, tones, "frame rendered");
            }
            TickOutcome::Throttled => tracing::debug!(frame, "frame throttled"),
            TickOutcome::Ignored => break,
        }
        probe.advance(interval_ms / 1000.0);
        timestamp += interval_ms;
    }

    if let Some(bounds) = driver.renderer().last_bounds() {
        tracing::info!(
            rendered,
            width = bounds.width(),
            height = bounds.height(),
            "session finished"
        );
    }
    let status = driver.status();
    driver.shutdown();

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-visual fractal triangle engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a headless session for a fixed number of ticks.
    Run {
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of ticks to deliver.
        #[arg(short, long, default_value_t = 120)]
        frames: u32,
        /// Milliseconds between ticks.
        #[arg(short, long, default_value_t = 16.0)]
        interval_ms: f64,
        /// Subdivision depth, from 1 to 8.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_COMPLEXITY)))]
        complexity: Option<u32>,
        /// Transformation kind (rotation, reflection, identity).
        #[arg(short, long, value_parser = parse_transform)]
        transform: Option<TransformKind>,
        /// Run without scheduling tones.
        #[arg(short, long)]
        muted: bool,
    },
}

fn parse_transform(value: &str) -> Result<TransformKind, String> {
    value.parse().map_err(|err| format!("{err}"))
}
