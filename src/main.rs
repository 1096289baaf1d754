//! Microscope simulation server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use smlm_sim::config::ServerConfig;
use smlm_sim::server::{RpcServer, RpcService};

#[derive(Debug, Parser)]
#[command(name = "smlm_sim_server", about = "PALM/STORM microscope simulation server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration file.
    #[arg(short, long)]
    listen: Option<String>,

    /// Base RNG seed, overriding the configuration file.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let mut config = ServerConfig::load(cli.config.as_deref())
        .context("failed to load server configuration")?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let service = Arc::new(RpcService::new(&config));
    let server = RpcServer::bind(&config.listen, service)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(addr = %server.local_addr(), seed = config.seed, "simulation server started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    server.stop().await.context("server shutdown failed")?;
    Ok(())
}
