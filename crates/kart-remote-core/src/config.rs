//! Connection and polling configuration

use crate::address::{Address, DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a connection to the game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Host to connect to (default: 127.0.0.1)
    pub host: String,
    /// RPC port (default: 42069)
    pub port: u16,
    /// Per-attempt connect timeout
    pub connect_timeout_ms: u64,
    /// Extra connect attempts made inside one handshake attempt
    pub reconnect_limit: u32,
    /// Delay between failed handshake attempts
    pub retry_delay_ms: u64,
    /// Time to wait for a call's response
    pub call_timeout_ms: u64,
    /// Size of the call bridge's worker pool. Bounds how many call results
    /// can be awaited concurrently.
    pub workers: usize,
    /// Polling intervals used by the controller and players
    pub poll: PollConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            reconnect_limit: 1,
            retry_delay_ms: 1000,
            call_timeout_ms: 5000,
            workers: 4,
            poll: PollConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn address(&self) -> Address {
        Address::new(self.host.clone(), self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Polling intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval between `game_running` checks while waiting for a race
    pub game_start_poll_ms: u64,
    /// Pause after each batch of newly discovered players
    pub roster_poll_ms: u64,
    /// How long `fire` holds the trigger
    pub fire_pulse_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            game_start_poll_ms: 250,
            roster_poll_ms: 50,
            fire_pulse_ms: 100,
        }
    }
}

impl PollConfig {
    pub fn game_start_poll(&self) -> Duration {
        Duration::from_millis(self.game_start_poll_ms)
    }

    pub fn roster_poll(&self) -> Duration {
        Duration::from_millis(self.roster_poll_ms)
    }

    pub fn fire_pulse(&self) -> Duration {
        Duration::from_millis(self.fire_pulse_ms)
    }
}
