//! Error types for kart-remote

use std::time::Duration;
use thiserror::Error;

/// Result type for kart-remote operations
pub type Result<T> = std::result::Result<T, RpcError>;

/// Unified failure signal for every RPC made against the game.
///
/// Transport-level failures (`Transport`, `Timeout`, `ConnectionClosed`) are
/// told apart from the remote side raising (`Remote`) via [`RpcError::is_transport`].
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused, reset, or otherwise lost
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response within the call timeout
    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed by this side
    #[error("Connection closed")]
    ConnectionClosed,

    /// The remote method raised
    #[error("Remote error in `{method}`: {message}")]
    Remote { method: String, message: String },

    /// Malformed frame or unexpected message shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Encoding a request or decoding a typed result failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RpcError {
    /// Whether this failure happened below the application layer.
    ///
    /// The handshake loop retries exactly these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::Timeout(_) | RpcError::ConnectionClosed
        )
    }

    /// Whether the remote method itself reported the failure
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote { .. })
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

impl From<rmpv::ext::Error> for RpcError {
    fn from(err: rmpv::ext::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

impl From<rmpv::decode::Error> for RpcError {
    fn from(err: rmpv::decode::Error) -> Self {
        RpcError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(RpcError::Transport("refused".into()).is_transport());
        assert!(RpcError::Timeout(Duration::from_secs(5)).is_transport());
        assert!(RpcError::ConnectionClosed.is_transport());

        let remote = RpcError::Remote {
            method: "hello".into(),
            message: "boom".into(),
        };
        assert!(!remote.is_transport());
        assert!(remote.is_remote());
        assert!(!RpcError::Protocol("bad frame".into()).is_transport());
    }

    #[test]
    fn test_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: RpcError = io.into();
        assert!(err.is_transport());
    }

    #[test]
    fn test_remote_display_names_method() {
        let err = RpcError::Remote {
            method: "use_nitrous".into(),
            message: "unknown player 7".into(),
        };
        assert_eq!(
            err.to_string(),
            "Remote error in `use_nitrous`: unknown player 7"
        );
    }
}
