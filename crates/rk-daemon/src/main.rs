//! routerkeep daemon: scheduled commands, device backups and retention.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rk_core::config::{Config, LogFormat, CONFIG_ENV};
use rk_daemon::daemon::Daemon;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "rk-daemon", version, about = "routerkeep automation daemon")]
struct Args {
    /// Path to config.toml (defaults to ~/.routerkeep/config.toml).
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path.clone())
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    let format = match config.general.log_format {
        LogFormat::Json => "json",
        LogFormat::Pretty => "pretty",
    };
    rk_telemetry::logging::init_logging_with_format("rk-daemon", &config.general.log_level, format);
    info!(version = env!("CARGO_PKG_VERSION"), "routerkeep daemon starting");

    let daemon = Daemon::new(config).await?;

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                shutdown.trigger();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    daemon.run().await
}
