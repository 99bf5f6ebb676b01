//! kart-stub-game - stand-in game for trying the driver locally

use anyhow::Result;
use clap::Parser;
use kart_remote_cli::stub::StubGame;
use kart_remote_core::{DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kart-stub-game")]
#[command(about = "Serve the kart game's RPC surface from in-memory state")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "KART_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, env = "KART_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Local players in the race
    #[arg(long, default_value_t = 2)]
    players: u32,

    /// Delay before the race starts, in milliseconds
    #[arg(long, default_value_t = 3000)]
    start_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let game = StubGame::new(args.players, Duration::from_millis(args.start_delay_ms));
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;

    info!(
        players = args.players,
        start_delay_ms = args.start_delay_ms,
        "Stub game ready"
    );
    game.server().serve(listener).await?;
    Ok(())
}
