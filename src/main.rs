//! # feedvisor
//!
//! Runs the SOS-to-RSS feeder pipeline described by a TOML file.
//!
//! ```bash
//! # Run until SIGINT/SIGTERM (or the configured run_duration)
//! feedvisor --config feedvisor.toml
//!
//! # Poll every 30 seconds for one hour
//! feedvisor --sampling-interval 30s --run-duration 1h
//!
//! # More detail
//! RUST_LOG=feedvisor=debug feedvisor
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use feedvisor::{LogWriter, Pipeline, PipelineConfig, Subscribe, ThresholdEngine};

/// Supervised SOS-to-RSS feeder.
#[derive(Parser, Debug)]
#[command(name = "feedvisor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "feedvisor.toml", env = "FEEDVISOR_CONFIG")]
    config: PathBuf,

    /// Override the sampling interval (e.g. "10m")
    #[arg(long, value_parser = parse_duration)]
    sampling_interval: Option<Duration>,

    /// Override the run duration (e.g. "1h"; "0s" runs until stopped)
    #[arg(long, value_parser = parse_duration)]
    run_duration: Option<Duration>,

    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let mut cfg = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(interval) = args.sampling_interval {
        cfg.sampling_interval = interval;
    }
    if let Some(duration) = args.run_duration {
        cfg.run_duration = Some(duration);
    }
    cfg.validate().context("invalid overrides")?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let cfg = load_config(&args)?;
    if args.validate {
        println!("Configuration is valid");
        return Ok(());
    }
    info!(
        sampling_interval = ?cfg.sampling_interval,
        run = ?cfg.run_policy(),
        endpoint = %cfg.notification.endpoint,
        "starting feeder"
    );

    let engine = Arc::new(ThresholdEngine::new());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let pipeline = Pipeline::from_config(cfg, engine)?.with_subscribers(subs);

    match pipeline.run_until_signal().await {
        Ok(endpoint) => {
            info!(%endpoint, "feeder stopped");
            Ok(())
        }
        Err(e) => {
            error!(err = %e, label = e.as_label(), "feeder failed");
            Err(e.into())
        }
    }
}
