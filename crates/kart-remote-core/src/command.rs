//! Command vocabulary shared with the game

use serde::{Deserialize, Serialize};

/// RPC method names understood by the game
pub mod method {
    pub const HELLO: &str = "hello";
    pub const GAME_RUNNING: &str = "game_running";
    pub const PLAYER_COUNT: &str = "player_count";
    pub const DISABLE_PLAYER_CONTROLS: &str = "disable_player_controls";
    pub const USE_NITROUS: &str = "use_nitrous";
    pub const SET_FIRING: &str = "set_firing";
    pub const START_DRIFTING: &str = "start_drifting";
    pub const STOP_DRIFTING: &str = "stop_drifting";
}

/// Player identifier, stable for the remote player's lifetime in a match
pub type PlayerId = u32;

/// Direction passed to `start_drifting`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftDirection {
    Left,
    Right,
}

impl DriftDirection {
    /// Get the wire protocol value
    pub fn as_i32(self) -> i32 {
        match self {
            DriftDirection::Left => 0,
            DriftDirection::Right => 1,
        }
    }

    /// Parse the wire protocol value
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(DriftDirection::Left),
            1 => Some(DriftDirection::Right),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_direction_wire_values() {
        assert_eq!(DriftDirection::Left.as_i32(), 0);
        assert_eq!(DriftDirection::Right.as_i32(), 1);
        assert_eq!(DriftDirection::from_i32(1), Some(DriftDirection::Right));
        assert_eq!(DriftDirection::from_i32(2), None);
    }
}
