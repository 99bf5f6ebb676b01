//! Stand-in game process
//!
//! Serves the game's RPC surface from in-memory state so the driver can be
//! run without the real game. Players appear once the start delay elapses.

use kart_remote_core::{DriftDirection, PlayerId, method};
use kart_remote_rpc::RpcServer;
use rmpv::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

type HandlerResult = std::result::Result<Value, String>;

/// Inputs currently applied to one player's kart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerInputs {
    pub controls_disabled: bool,
    pub nitrous: bool,
    pub firing: bool,
    pub drift: Option<DriftDirection>,
}

struct GameState {
    started: Instant,
    start_delay: Duration,
    players: Vec<PlayerInputs>,
}

impl GameState {
    fn joined(&self) -> usize {
        if self.started.elapsed() >= self.start_delay {
            self.players.len()
        } else {
            0
        }
    }
}

/// Shared game state behind the stub's RPC methods
#[derive(Clone)]
pub struct StubGame {
    state: Arc<Mutex<GameState>>,
}

impl StubGame {
    /// A game that reports `players` local players once `start_delay` has passed
    pub fn new(players: u32, start_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(GameState {
                started: Instant::now(),
                start_delay,
                players: vec![PlayerInputs::default(); players as usize],
            })),
        }
    }

    pub fn player_count(&self) -> u32 {
        self.with_state(|state| state.joined() as u32)
    }

    /// Running while at least one player controller exists
    pub fn game_running(&self) -> bool {
        self.player_count() > 0
    }

    /// Inputs of a joined player
    pub fn inputs(&self, pid: PlayerId) -> Option<PlayerInputs> {
        self.with_state(|state| {
            let joined = state.joined();
            state.players.get(pid as usize).filter(|_| (pid as usize) < joined).cloned()
        })
    }

    /// Method table for this game
    pub fn server(&self) -> RpcServer {
        let running = self.clone();
        let count = self.clone();
        let controls = self.clone();
        let nitrous = self.clone();
        let firing = self.clone();
        let drift = self.clone();
        let stop = self.clone();

        RpcServer::new()
            .bind(method::HELLO, |params| {
                let echo = arg(&params, 0)?;
                if !echo.is_str() && !echo.is_bin() {
                    return Err("hello expects a string".to_string());
                }
                Ok(echo.clone())
            })
            .bind(method::GAME_RUNNING, move |_| {
                Ok(Value::from(running.game_running()))
            })
            .bind(method::PLAYER_COUNT, move |_| {
                Ok(Value::from(count.player_count()))
            })
            .bind(method::DISABLE_PLAYER_CONTROLS, move |params| {
                let disable = bool_arg(&params, 1)?;
                controls.update(&params, method::DISABLE_PLAYER_CONTROLS, |inputs| {
                    inputs.controls_disabled = disable;
                })
            })
            .bind(method::USE_NITROUS, move |params| {
                let enable = bool_arg(&params, 1)?;
                nitrous.update(&params, method::USE_NITROUS, |inputs| {
                    inputs.nitrous = enable;
                })
            })
            .bind(method::SET_FIRING, move |params| {
                let fire = bool_arg(&params, 1)?;
                firing.update(&params, method::SET_FIRING, |inputs| {
                    inputs.firing = fire;
                })
            })
            .bind(method::START_DRIFTING, move |params| {
                let raw = arg(&params, 1)?
                    .as_i64()
                    .ok_or_else(|| "drift direction must be an integer".to_string())?;
                let direction = i32::try_from(raw)
                    .ok()
                    .and_then(DriftDirection::from_i32)
                    .ok_or_else(|| format!("Invalid drift direction: {}", raw))?;
                drift.update(&params, method::START_DRIFTING, |inputs| {
                    inputs.drift = Some(direction);
                })
            })
            .bind(method::STOP_DRIFTING, move |params| {
                stop.update(&params, method::STOP_DRIFTING, |inputs| {
                    inputs.drift = None;
                })
            })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut GameState) -> T) -> T {
        // A panicking handler leaves plain data behind; keep serving it
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Apply `change` to the player named by the first argument
    fn update(
        &self,
        params: &[Value],
        command: &str,
        change: impl FnOnce(&mut PlayerInputs),
    ) -> HandlerResult {
        let pid = pid_arg(params)?;
        self.with_state(|state| {
            let joined = state.joined();
            let inputs = state
                .players
                .get_mut(pid as usize)
                .filter(|_| (pid as usize) < joined)
                .ok_or_else(|| format!("No player with id {}", pid))?;
            change(inputs);
            info!(pid, command, inputs = ?inputs, "Player input changed");
            Ok(Value::Nil)
        })
    }
}

fn arg(params: &[Value], index: usize) -> std::result::Result<&Value, String> {
    params
        .get(index)
        .ok_or_else(|| format!("Missing argument {}", index))
}

fn pid_arg(params: &[Value]) -> std::result::Result<PlayerId, String> {
    arg(params, 0)?
        .as_u64()
        .and_then(|pid| PlayerId::try_from(pid).ok())
        .ok_or_else(|| "player id must be an unsigned integer".to_string())
}

fn bool_arg(params: &[Value], index: usize) -> std::result::Result<bool, String> {
    arg(params, index)?
        .as_bool()
        .ok_or_else(|| format!("Argument {} must be a boolean", index))
}
