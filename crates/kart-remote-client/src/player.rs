//! Per-player command handle

use crate::controller::Controller;
use kart_remote_core::{DriftDirection, PlayerId, Result, method};
use rmpv::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Commands for one local player.
///
/// Every command is a one-way notification carrying the player id first.
/// The game decides whether a command is valid; nothing is acknowledged.
#[derive(Clone)]
pub struct Player {
    pid: PlayerId,
    controller: Controller,
}

impl Player {
    pub(crate) fn new(pid: PlayerId, controller: Controller) -> Self {
        Self { pid, controller }
    }

    pub fn pid(&self) -> PlayerId {
        self.pid
    }

    /// Controller this player was discovered through
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Take control away from (or give it back to) the local input device
    pub async fn set_controls_disabled(&self, disabled: bool) -> Result<()> {
        self.notify(method::DISABLE_PLAYER_CONTROLS, vec![Value::from(disabled)]).await
    }

    pub async fn set_nitrous(&self, enabled: bool) -> Result<()> {
        self.notify(method::USE_NITROUS, vec![Value::from(enabled)]).await
    }

    pub async fn set_firing(&self, firing: bool) -> Result<()> {
        self.notify(method::SET_FIRING, vec![Value::from(firing)]).await
    }

    /// Press and release fire.
    ///
    /// The pulse runs on its own task; the handle may be dropped.
    pub fn fire(&self) -> JoinHandle<Result<()>> {
        let player = self.clone();
        let pulse = self.controller.poll().fire_pulse();

        tokio::spawn(async move {
            player.set_firing(true).await?;
            sleep(pulse).await;
            player.set_firing(false).await
        })
    }

    pub async fn start_drifting(&self, direction: DriftDirection) -> Result<()> {
        self.notify(method::START_DRIFTING, vec![Value::from(direction.as_i32())]).await
    }

    pub async fn stop_drifting(&self) -> Result<()> {
        self.notify(method::STOP_DRIFTING, Vec::new()).await
    }

    async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(Value::from(self.pid));
        params.extend(args);
        self.controller.notify(method, params).await
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player").field("pid", &self.pid).finish()
    }
}
