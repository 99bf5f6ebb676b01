//! Example driver: takes over every local player once a race starts

use anyhow::{Context, Result};
use futures::StreamExt;
use kart_remote_client::{Controller, DriftDirection, Player};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Drive one player: take its controls, drift left with nitrous, then read
/// the first frame.
pub async fn player_ai(controller: Controller, player: Player) -> Result<()> {
    info!(pid = player.pid(), "Player added");

    player.set_controls_disabled(true).await?;
    player.start_drifting(DriftDirection::Left).await?;
    player.set_nitrous(true).await?;

    let mut frames = controller.frames();
    if let Some(frame) = frames.next().await {
        debug!(pid = player.pid(), frame, "First frame");
    }
    Ok(())
}

/// Wait for the race, spawn an agent per discovered player and wait for all
/// of them. Returns the number of players driven.
pub async fn run(controller: Controller) -> Result<usize> {
    controller.wait_until_game_started().await?;
    info!("Game started");

    let mut agents = JoinSet::new();
    let mut players = controller.players();
    while let Some(player) = players.next().await {
        agents.spawn(player_ai(controller.clone(), player?));
    }

    let mut driven = 0;
    while let Some(joined) = agents.join_next().await {
        joined.context("Player agent panicked")??;
        driven += 1;
    }

    info!(players = driven, "All player agents finished");
    Ok(driven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{PlayerInputs, StubGame};
    use kart_remote_client::{ConnectionConfig, KartConnection};
    use kart_remote_rpc::LoopbackConnector;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_drives_every_player() {
        let game = StubGame::new(3, Duration::from_millis(600));
        let conn = KartConnection::with_connector(
            ConnectionConfig::default(),
            LoopbackConnector::new(game.server()),
        );

        let driven = conn
            .session(|controller| async move {
                let driven = run(controller.clone()).await?;
                // Requests are served in order, so this flushes the commands
                controller.player_count().await?;
                Ok::<_, anyhow::Error>(driven)
            })
            .await
            .unwrap();

        assert_eq!(driven, 3);
        let expected = PlayerInputs {
            controls_disabled: true,
            nitrous: true,
            firing: false,
            drift: Some(DriftDirection::Left),
        };
        for pid in 0..3 {
            assert_eq!(game.inputs(pid), Some(expected.clone()));
        }
    }
}
