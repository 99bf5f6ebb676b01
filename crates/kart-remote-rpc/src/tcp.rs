//! TCP transport implementation
//!
//! The game listens on a local TCP port; this is the transport used outside
//! of tests.

use crate::client::RpcClient;
use crate::transport::{Connector, MsgpackReader, MsgpackWriter};
use async_trait::async_trait;
use kart_remote_core::{Address, ConnectionConfig, Result, RpcError};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Connector that opens TCP connections
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Per-attempt connect timeout
    pub connect_timeout: Duration,
    /// Extra attempts after the first connect fails
    pub reconnect_limit: u32,
    /// Response timeout for calls on the opened client
    pub call_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

impl TcpConnector {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            reconnect_limit: config.reconnect_limit,
            call_timeout: config.call_timeout(),
        }
    }
}

/// Open a TCP stream, retrying up to `reconnect_limit` extra times
pub async fn connect_stream(
    address: &Address,
    connect_timeout: Duration,
    reconnect_limit: u32,
) -> Result<TcpStream> {
    let target = (address.host(), address.port());
    let mut last_err = None;

    for attempt in 0..=reconnect_limit {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                // Disable Nagle's algorithm for low latency
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!(attempt, "Connect to {} failed: {}", address, e);
                last_err = Some(RpcError::Transport(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )));
            }
            Err(_) => {
                debug!(attempt, "Connect to {} timed out", address);
                last_err = Some(RpcError::Transport(format!(
                    "Connection timeout to {}",
                    address
                )));
            }
        }
    }

    let fallback = RpcError::Transport(format!("Failed to connect to {}", address));
    Err(last_err.unwrap_or(fallback))
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &Address) -> Result<RpcClient> {
        let stream = connect_stream(address, self.connect_timeout, self.reconnect_limit).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(RpcClient::new(
            address.clone(),
            MsgpackReader::new(read_half),
            MsgpackWriter::new(write_half),
            self.call_timeout,
        ))
    }
}
