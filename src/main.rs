//! CLI entry point for flume-scan.
//!
//! Loads the run configuration from `config/<name>.toml`, opens both
//! instruments, and runs timed scan cycles until the configured duration
//! elapses or Ctrl-C fires the cancellation token.
//!
//! # Usage
//!
//! ```bash
//! flume-scan            # uses config/default.toml
//! flume-scan night-run  # uses config/night-run.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use flume_scan::config::RunConfig;
use flume_scan::experiment::Experiment;
use flume_scan::flash::{Flash, FlashOptions};
use flume_scan::motor::{Motor, MotorOptions};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "flume-scan")]
#[command(about = "Timed flume-cart scans with camera-flash markers", long_about = None)]
struct Cli {
    /// Config name under config/ (without extension)
    config: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = RunConfig::new(cli.config.as_deref()).context("Failed to load run config")?;

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();
    info!(
        "Run: {:?} scan cycles on {} (flash on {})",
        config.duration, config.motor_port, config.flash_port
    );

    let motor = Motor::open(&config.motor_port, MotorOptions::default())
        .with_context(|| format!("Failed to open motor port {}", config.motor_port))?;
    let flash = Flash::open(&config.flash_port, FlashOptions::default())
        .with_context(|| format!("Failed to open flash port {}", config.flash_port))?;

    let mut experiment = Experiment::new(motor, flash, config.experiment_options());

    let token = experiment.cancel_token();
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received; finishing the current leg and stopping");
        token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    experiment.prepare().context("Startup failed")?;
    let report = experiment.run(config.duration)?;
    experiment.close();

    info!(
        "Done: {} scans, {} stalls recovered{}",
        report.scans,
        report.stalls,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    Ok(())
}
