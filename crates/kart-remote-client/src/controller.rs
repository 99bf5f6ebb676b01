//! Game-state queries and polling streams

use crate::player::Player;
use futures::stream::{self, BoxStream, StreamExt};
use kart_remote_core::{PollConfig, Result, method};
use kart_remote_rpc::{CallBridge, RpcClient, WeakRpcClient};
use rmpv::Value;
use std::collections::VecDeque;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Stream of newly discovered players
pub type PlayerStream = BoxStream<'static, Result<Player>>;

/// Stream of frame numbers
pub type FrameStream = BoxStream<'static, u32>;

/// Number of placeholder frames yielded by [`Controller::frames`]
const PLACEHOLDER_FRAMES: u32 = 10;

/// Entry point for querying the game and discovering players.
///
/// A controller does not keep the connection alive: once its session is
/// closed every call fails with `ConnectionClosed`.
#[derive(Clone)]
pub struct Controller {
    client: WeakRpcClient,
    bridge: CallBridge,
    poll: PollConfig,
}

impl Controller {
    pub(crate) fn new(client: WeakRpcClient, bridge: CallBridge, poll: PollConfig) -> Self {
        Self {
            client,
            bridge,
            poll,
        }
    }

    pub(crate) fn client(&self) -> Result<RpcClient> {
        self.client.upgrade()
    }

    pub(crate) fn poll(&self) -> &PollConfig {
        &self.poll
    }

    /// Whether a race is in progress
    pub async fn is_game_running(&self) -> Result<bool> {
        let client = self.client()?;
        self.bridge
            .invoke_as(&client, method::GAME_RUNNING, Vec::new())
            .await
    }

    /// Number of local players currently in the game
    pub async fn player_count(&self) -> Result<u32> {
        let client = self.client()?;
        self.bridge
            .invoke_as(&client, method::PLAYER_COUNT, Vec::new())
            .await
    }

    /// Poll until the game reports it is running. There is no timeout.
    pub async fn wait_until_game_started(&self) -> Result<()> {
        loop {
            if self.is_game_running().await? {
                return Ok(());
            }
            sleep(self.poll.game_start_poll()).await;
        }
    }

    /// Players as they join.
    ///
    /// The roster is polled while the game runs. The stream ends once the
    /// player count stays the same across two polls with at least one player
    /// present, when the game stops, or right after yielding an error.
    pub fn players(&self) -> PlayerStream {
        stream::unfold(RosterPoll::new(self.clone()), RosterPoll::advance).boxed()
    }

    /// Frame numbers `0..10`.
    ///
    /// Placeholder only: these are not tied to frames rendered by the game.
    pub fn frames(&self) -> FrameStream {
        stream::iter(0..PLACEHOLDER_FRAMES).boxed()
    }

    pub(crate) async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.client()?.notify(method, params).await
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.bridge.workers())
            .field("poll", &self.poll)
            .finish()
    }
}

/// State carried between polls of one `players()` stream
struct RosterPoll {
    controller: Controller,
    last_count: u32,
    /// Every pid below this has been yielded
    high_water: u32,
    queued: VecDeque<Player>,
    /// Count from the latest poll, applied after the roster interval
    observed: Option<u32>,
    done: bool,
}

impl RosterPoll {
    fn new(controller: Controller) -> Self {
        Self {
            controller,
            last_count: 0,
            high_water: 0,
            queued: VecDeque::new(),
            observed: None,
            done: false,
        }
    }

    async fn advance(mut self) -> Option<(Result<Player>, Self)> {
        loop {
            if let Some(player) = self.queued.pop_front() {
                return Some((Ok(player), self));
            }
            if self.done {
                return None;
            }
            if let Some(count) = self.observed.take() {
                sleep(self.controller.poll.roster_poll()).await;
                self.last_count = count;
            }

            match self.poll_roster().await {
                Ok(Some(count)) => self.observed = Some(count),
                Ok(None) => return None,
                Err(e) => {
                    self.done = true;
                    return Some((Err(e), self));
                }
            }
        }
    }

    /// Queue newly seen players. `None` means the stream is finished.
    async fn poll_roster(&mut self) -> Result<Option<u32>> {
        if !self.controller.is_game_running().await? {
            debug!("Game not running, roster poll finished");
            return Ok(None);
        }

        let count = self.controller.player_count().await?;
        if count == self.last_count && count > 0 {
            debug!(count, "Roster settled");
            return Ok(None);
        }
        if count < self.last_count {
            warn!(
                previous = self.last_count,
                count, "Player count dropped; departed players are not reported"
            );
        }

        for pid in self.high_water..count {
            debug!(pid, "Discovered player");
            self.queued.push_back(Player::new(pid, self.controller.clone()));
        }
        self.high_water = self.high_water.max(count);
        Ok(Some(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGame, open};
    use kart_remote_core::{PlayerId, RpcError};
    use kart_remote_rpc::{LoopbackConnector, RpcServer};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    async fn pids(controller: &Controller) -> Vec<PlayerId> {
        controller
            .players()
            .map(|player| player.unwrap().pid())
            .collect()
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_players_waits_for_first_join() {
        let game = FakeGame::new().counts([0, 0, 2, 2]);
        let (session, _log) = game.session().await;

        assert_eq!(pids(&session.controller()).await, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_players_empty_when_game_not_running() {
        let game = FakeGame::new().running([false]).counts([3]);
        let (session, _log) = game.session().await;

        assert!(pids(&session.controller()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_players_ends_when_game_stops() {
        let game = FakeGame::new().running([true, true, false]).counts([1, 2]);
        let (session, _log) = game.session().await;

        assert_eq!(pids(&session.controller()).await, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_roster_yields_no_duplicates() {
        let game = FakeGame::new().counts([3, 1, 2, 2]);
        let (session, _log) = game.session().await;

        assert_eq!(pids(&session.controller()).await, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_players_is_restartable() {
        let game = FakeGame::new().counts([2]);
        let (session, _log) = game.session().await;
        let controller = session.controller();

        assert_eq!(pids(&controller).await, vec![0, 1]);
        assert_eq!(pids(&controller).await, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_poll_interval() {
        let game = FakeGame::new().counts([1, 1]);
        let (session, _log) = game.session().await;

        let start = Instant::now();
        assert_eq!(pids(&session.controller()).await, vec![0]);
        // Yield, one roster interval, then the settling poll
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_players_yields_error_then_ends() {
        let server = RpcServer::new()
            .bind(method::HELLO, |mut params| {
                params.pop().ok_or_else(|| "missing argument".to_string())
            })
            .bind(method::GAME_RUNNING, |_| Ok(Value::from(true)))
            .bind(method::PLAYER_COUNT, |_| Err("roster unavailable".to_string()));
        let session = open(LoopbackConnector::new(server)).await;

        let items: Vec<Result<Player>> = session.controller().players().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(e) if e.is_remote()));
    }

    #[tokio::test]
    async fn test_frames_are_placeholder_sequence() {
        let (session, _log) = FakeGame::new().running([false]).session().await;
        let controller = session.controller();

        let frames: Vec<u32> = controller.frames().collect().await;
        assert_eq!(frames, (0..10).collect::<Vec<_>>());
        assert_eq!(controller.frames().count().await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_game_started() {
        let game = FakeGame::new().running([false, false, false, true]);
        let (session, _log) = game.session().await;

        let start = Instant::now();
        assert_ok!(session.controller().wait_until_game_started().await);
        assert!(start.elapsed() >= Duration::from_millis(750));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_queries() {
        let (session, _log) = FakeGame::new().counts([4]).session().await;
        let controller = session.controller();

        assert!(assert_ok!(controller.is_game_running().await));
        assert_eq!(assert_ok!(controller.player_count().await), 4);
    }

    #[tokio::test]
    async fn test_closed_session_fails_queries() {
        let (session, _log) = FakeGame::new().session().await;
        let controller = session.controller();
        session.close().await;

        assert!(matches!(
            assert_err!(controller.is_game_running().await),
            RpcError::ConnectionClosed
        ));
        let items: Vec<Result<Player>> = controller.players().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RpcError::ConnectionClosed)));
    }
}
