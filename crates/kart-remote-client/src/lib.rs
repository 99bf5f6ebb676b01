//! Remote-control client for a running kart-racing game
//!
//! Connect with [`KartConnection`], then drive the game through the
//! [`Controller`] and the [`Player`] handles it discovers:
//!
//! ```no_run
//! use futures::StreamExt;
//! use kart_remote_client::{DriftDirection, KartConnection, RpcError};
//!
//! # async fn run() -> Result<(), RpcError> {
//! KartConnection::localhost()
//!     .session(|controller| async move {
//!         controller.wait_until_game_started().await?;
//!         let mut players = controller.players();
//!         while let Some(player) = players.next().await {
//!             player?.start_drifting(DriftDirection::Left).await?;
//!         }
//!         Ok(())
//!     })
//!     .await
//! # }
//! ```

pub mod connection;
pub mod controller;
pub mod player;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionState, HELLO_SENTINEL, KartConnection, Session};
pub use controller::{Controller, FrameStream, PlayerStream};
pub use player::Player;

pub use kart_remote_core::{
    Address, ConnectionConfig, DriftDirection, PlayerId, PollConfig, Result, RpcError,
};
