//! In-process transport
//!
//! Wires clients straight to an [`RpcServer`] over `tokio::io::duplex`,
//! so session logic can run without sockets.

use crate::client::RpcClient;
use crate::server::RpcServer;
use crate::transport::Connector;
use async_trait::async_trait;
use kart_remote_core::{Address, ConnectionConfig, Result};
use std::time::Duration;
use tracing::debug;

const LOOPBACK_BUFFER: usize = 64 * 1024;

/// Connector that serves every connection from an in-process server
#[derive(Clone)]
pub struct LoopbackConnector {
    server: RpcServer,
    call_timeout: Duration,
}

impl LoopbackConnector {
    pub fn new(server: RpcServer) -> Self {
        Self::from_config(server, &ConnectionConfig::default())
    }

    /// Serve `server` with the call timeout from `config`
    pub fn from_config(server: RpcServer, config: &ConnectionConfig) -> Self {
        Self {
            server,
            call_timeout: config.call_timeout(),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, address: &Address) -> Result<RpcClient> {
        let (client_io, server_io) = tokio::io::duplex(LOOPBACK_BUFFER);

        let server = self.server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve_stream(server_io).await {
                debug!("Loopback session ended: {}", e);
            }
        });

        Ok(RpcClient::from_stream(
            address.clone(),
            client_io,
            self.call_timeout,
        ))
    }
}
