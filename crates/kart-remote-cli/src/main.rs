//! kart-remote - drive every local player of a running game
//!
//! Waits for the game to accept connections, waits for a race to start, then
//! takes over each local player.
//!
//! Usage:
//!   kart-remote --host 127.0.0.1 --port 42069
//!
//! Environment variables:
//!   KART_HOST - Game host (default: 127.0.0.1)
//!   KART_PORT - Game RPC port (default: 42069)
//!   KART_WORKERS - Call bridge pool size (default: 4)
//!   KART_CONFIG - JSON connection config, overridden by the flags above

use anyhow::{Context, Result};
use clap::Parser;
use kart_remote_cli::driver;
use kart_remote_client::{ConnectionConfig, KartConnection};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kart-remote")]
#[command(about = "Remote-control every local player of a running kart game")]
#[command(version)]
struct Args {
    /// Game host
    #[arg(long, env = "KART_HOST")]
    host: Option<String>,

    /// Game RPC port
    #[arg(long, env = "KART_PORT")]
    port: Option<u16>,

    /// Concurrent result waits on the call bridge
    #[arg(long, env = "KART_WORKERS")]
    workers: Option<usize>,

    /// Connection config file (JSON)
    #[arg(long, env = "KART_CONFIG")]
    config: Option<PathBuf>,
}

impl Args {
    fn connection_config(&self) -> Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config in {}", path.display()))?
            }
            None => ConnectionConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.connection_config()?;
    let connection = KartConnection::new(config);

    info!("Connecting to game at {}", connection.address());
    let driven = connection.session(driver::run).await?;
    info!(players = driven, "Done");

    Ok(())
}
