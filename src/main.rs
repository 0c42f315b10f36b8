//! RespVault Server Binary
//!
//! Main entry point for the RespVault TCP server

use clap::Parser;
use respvault::{RespVaultServer, Result, ServerConfig, SyncPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// RespVault Server
#[derive(Parser, Debug)]
#[command(name = "respvault-server")]
#[command(about = "Redis-compatible key-value server with an append-only file")]
#[command(version)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long)]
    bind: Option<String>,

    /// Append-only file path
    #[arg(short, long)]
    aof: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// When the append-only file is synced to disk
    #[arg(short, long, value_enum)]
    sync: Option<SyncPolicy>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(aof) = self.aof {
            config.aof_path = aof;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(sync) = self.sync {
            config.sync_policy = sync;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,respvault=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    if let Err(e) = run(Args::parse()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.into_config()?;
    info!(
        bind = %config.bind_addr,
        aof = %config.aof_path.display(),
        sync = ?config.sync_policy,
        "starting RespVault server"
    );

    let server = Arc::new(RespVaultServer::new(config).await?);

    // Setup graceful shutdown on SIGINT (Ctrl+C)
    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }

        info!("Received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = server_clone.shutdown() {
            error!("Failed to initiate shutdown: {}", e);
        }
    });

    server.run().await
}
