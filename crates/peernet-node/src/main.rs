//! Peernet node entry point.
//!
//! Starts a Peernet node with configuration from a TOML file or defaults.

// Node accessors are exercised by tests only.
#![allow(dead_code)]

mod config;
mod node;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::PeernetConfig;
use node::PeernetNode;

/// Peernet Node
#[derive(Parser, Debug)]
#[command(name = "peernet-node", version, about = "Peernet peer-to-peer node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "peernet.toml")]
    config: PathBuf,

    /// Listen on this multiaddress instead of the configured ones. Repeatable.
    #[arg(short, long)]
    listen: Vec<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        let config = PeernetConfig::default();
        config.save(&args.config)?;
        println!("wrote default config to {}", args.config.display());
        return Ok(());
    }

    // Load configuration and apply CLI overrides
    let mut config = PeernetConfig::load(&args.config)?;
    if !args.listen.is_empty() {
        config.network.listen_addrs = args.listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging.level, &config.logging.format);
    tracing::info!("Peernet node v{}", env!("CARGO_PKG_VERSION"));

    let mut node = PeernetNode::new(config)?;
    node.start().await?;
    tracing::info!(peer_id = %node.peer_id(), "node started");

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node event loop error");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Peernet node exited cleanly");
    Ok(())
}
