//! volplaned: storage control-plane server

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use volplane::config::DEFAULT_CONFIG_FILE;
use volplane::{DriverRegistry, Orchestrator, ServerConfig};

/// Storage control-plane server
#[derive(Parser)]
#[command(name = "volplaned")]
#[command(about = "Serve storage volumes and snapshots from many backends", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./volplane.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(long)]
    listen: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    volplane::logging::init_logging(&cli.log)?;

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::load().with_context(|| format!("loading {DEFAULT_CONFIG_FILE}"))?,
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if config.services.is_empty() {
        tracing::warn!("no storage services configured");
    }

    let orchestrator = Orchestrator::from_config(&config, &DriverRegistry::with_builtin())?;
    volplane::http::serve(orchestrator, &config).await
}
