//! Minimal MessagePack-RPC server
//!
//! Serves synchronous handlers bound by method name. It stands in for the
//! game process in tests and backs the `kart-stub-game` binary.

use crate::protocol::RpcMessage;
use crate::transport::{AsyncWriter, MsgpackReader, MsgpackWriter};
use kart_remote_core::{Result, RpcError};
use rmpv::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Method handler: positional params in, result or error message out
pub type Handler = Arc<dyn Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync>;

/// Method table plus the loop that serves it
#[derive(Clone, Default)]
pub struct RpcServer {
    methods: HashMap<String, Handler>,
}

impl RpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn bind<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Names of all bound methods
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Accept TCP connections forever, serving each on its own task
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("RPC server listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            stream.set_nodelay(true)?;
            info!("Client connected from {}", peer);

            let server = self.clone();
            tokio::spawn(async move {
                match server.serve_stream(stream).await {
                    Ok(()) => info!("Client {} disconnected", peer),
                    Err(e) => warn!("Session with {} ended: {}", peer, e),
                }
            });
        }
    }

    /// Serve one connection until the peer hangs up
    pub async fn serve_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = MsgpackReader::new(read_half);
        let mut writer = MsgpackWriter::new(write_half);

        loop {
            let msg = match reader.next_message().await {
                Ok(Some(msg)) => msg,
                Ok(None) => return Ok(()),
                Err(RpcError::Protocol(e)) => {
                    warn!("Dropping malformed message: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match msg {
                RpcMessage::Request {
                    msgid,
                    method,
                    params,
                } => {
                    debug!(msgid, method = %method, "[Client→Server] request");
                    let (error, result) = match self.dispatch(&method, params) {
                        Ok(value) => (Value::Nil, value),
                        Err(message) => (Value::from(message), Value::Nil),
                    };
                    writer
                        .write_message(&RpcMessage::Response {
                            msgid,
                            error,
                            result,
                        })
                        .await?;
                }
                RpcMessage::Notification { method, params } => {
                    debug!(method = %method, "[Client→Server] notify");
                    if let Err(e) = self.dispatch(&method, params) {
                        warn!("Notification `{}` failed: {}", method, e);
                    }
                }
                RpcMessage::Response { msgid, .. } => {
                    warn!(msgid, "Ignoring response sent to server");
                }
            }
        }
    }

    fn dispatch(&self, method: &str, params: Vec<Value>) -> std::result::Result<Value, String> {
        match self.methods.get(method) {
            Some(handler) => handler(params),
            None => Err(format!("Method not found: {}", method)),
        }
    }
}
