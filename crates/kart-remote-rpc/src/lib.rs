//! MessagePack-RPC plumbing for kart-remote
//!
//! This crate provides:
//! - Wire protocol for requests, responses and notifications
//! - Transport abstractions (AsyncReader/AsyncWriter traits, Connector)
//! - TCP and in-process transports
//! - `RpcClient` with its background reader task
//! - The call bridge that bounds concurrent result waits
//! - A small method-table server for stand-in games

pub mod bridge;
pub mod client;
pub mod local;
pub mod protocol;
pub mod server;
pub mod tcp;
pub mod transport;

pub use bridge::{CallBridge, RpcCall};
pub use client::{PendingCall, RpcClient, WeakRpcClient};
pub use local::LoopbackConnector;
pub use protocol::{MsgId, Reply, RpcMessage, deserialize, serialize};
pub use server::RpcServer;
pub use tcp::TcpConnector;
pub use transport::{AsyncReader, AsyncWriter, Connector, reader_task};
