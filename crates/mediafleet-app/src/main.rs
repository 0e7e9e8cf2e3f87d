#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Binary entrypoint that loads the manager configuration and runs the
//! control plane until interrupted.

use std::path::PathBuf;

use clap::Parser;
use mediafleet_app::{AppResult, run_app};
use mediafleet_config::DEFAULT_CONFIG_PATH;

/// Mediafleet manager.
#[derive(Debug, Parser)]
#[command(name = "mediafleet", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "MEDIAFLEET_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

/// Bootstraps the manager and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    let args = Args::parse();
    run_app(&args.config).await
}
