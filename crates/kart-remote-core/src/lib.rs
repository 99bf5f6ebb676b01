//! # kart-remote-core
//!
//! Core types shared by the kart-remote crates:
//! - The unified RPC error taxonomy
//! - Game address and connection configuration
//! - Command vocabulary (method names, drift direction)

pub mod address;
pub mod command;
pub mod config;
pub mod error;

pub use address::{Address, DEFAULT_HOST, DEFAULT_PORT};
pub use command::{DriftDirection, PlayerId, method};
pub use config::{ConnectionConfig, PollConfig};
pub use error::{Result, RpcError};
