//! # Warden
//!
//! Entry point for the reconciliation engine.
//!
//! ## Startup
//!
//! 1. **Tracing** - `RUST_LOG` filter, `info` by default
//! 2. **Configuration** - defaults, optional TOML file, `WARDEN_*` overrides
//! 3. **Command** - print the configuration, simulate a fleet, or run the
//!    scheduler until Ctrl+C
//!
//! Device storage, the container runtime and the distributed lock are
//! in-memory here; the engine itself only sees the collaborator traits.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod fleet;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warden_core::WardenConfig;

use crate::cli::{Cli, Commands};
use crate::fleet::SimulatedFleet;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = WardenConfig::load(cli.config.as_deref()).context(
        "Configuration could not be loaded. Check the config file and WARDEN_* variables",
    )?;

    match cli.command {
        Commands::Config => print_json(&config),
        Commands::Simulate { devices, cycles } => {
            let fleet = SimulatedFleet::new(&config).await?;
            fleet.seed(devices).await;
            let summary = fleet.simulate(cycles).await;
            print_json(&summary)
        }
        Commands::Run { devices } => run(&config, devices).await,
    }
}

async fn run(config: &WardenConfig, devices: usize) -> Result<()> {
    let start_time = Instant::now();

    let fleet = SimulatedFleet::new(config).await?;
    fleet.seed(devices).await;
    let handle = fleet.scheduler().start().await;

    info!(
        "Warden started in {:?}. Press Ctrl+C to stop.",
        start_time.elapsed()
    );
    wait_for_shutdown().await;

    handle.stop();
    handle.join().await;

    let summary = fleet.summary(Vec::new()).await;
    info!(
        migrations = summary.failover.total_migrations,
        inconsistencies = summary.consistency.total_inconsistencies,
        events = summary.events_published,
        "Warden stopped"
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{json}");
    Ok(())
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
