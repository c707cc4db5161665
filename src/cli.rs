//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Warden - device state reconciliation and failover
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Keeps containerized cloud-phone fleets in line with their records")]
#[command(
    long_about = "Warden detects failed devices and divergence between device records and the container runtime, recovers or heals them, and journals every correction so it can be rolled back."
)]
pub struct Cli {
    /// TOML configuration file; WARDEN_* environment variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration as JSON
    Config,

    /// Run a fixed number of cycles against a simulated in-memory fleet
    Simulate {
        /// Number of simulated devices
        #[arg(short, long, default_value_t = 8)]
        devices: usize,

        /// Number of consistency + failover cycle pairs to run
        #[arg(long, default_value_t = 2)]
        cycles: usize,
    },

    /// Run the scheduler against a simulated fleet until Ctrl+C
    Run {
        /// Number of simulated devices
        #[arg(short, long, default_value_t = 8)]
        devices: usize,
    },
}
