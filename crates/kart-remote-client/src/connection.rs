//! Connection manager
//!
//! `KartConnection` owns the game's address and runs the handshake, retrying
//! until the game answers. A successful handshake yields a [`Session`], which
//! owns the open client and closes it on every exit path.

use crate::controller::Controller;
use kart_remote_core::{Address, ConnectionConfig, Result, RpcError, method};
use kart_remote_rpc::{CallBridge, Connector, RpcClient, TcpConnector};
use rmpv::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Sent with `hello`; the game must echo it back unchanged
pub const HELLO_SENTINEL: &str = "this should be echoed back";

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Closed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Handshaking => 2,
            ConnectionState::Connected => 3,
            ConnectionState::Closed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Handshaking,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Shared, atomically updated connection state
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state.as_u8())))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Connection to a game instance
pub struct KartConnection<C = TcpConnector> {
    config: ConnectionConfig,
    address: Address,
    connector: C,
    bridge: CallBridge,
    state: StateCell,
    open_sessions: Arc<AtomicUsize>,
}

impl KartConnection<TcpConnector> {
    /// Connection over TCP using `config`
    pub fn new(config: ConnectionConfig) -> Self {
        let connector = TcpConnector::from_config(&config);
        Self::with_connector(config, connector)
    }

    /// Connection to the default local game (127.0.0.1:42069)
    pub fn localhost() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl<C: Connector> KartConnection<C> {
    /// Connection through `connector`.
    ///
    /// The connector applies its own transport settings, so build it from the
    /// same config (`TcpConnector::from_config`, `LoopbackConnector::from_config`).
    pub fn with_connector(config: ConnectionConfig, connector: C) -> Self {
        Self {
            address: config.address(),
            bridge: CallBridge::new(config.workers),
            config,
            connector,
            state: StateCell::new(ConnectionState::Disconnected),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn host(&self) -> &str {
        self.address.host()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Handshake progress, then `Connected` while any session is open
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Connect and handshake, retrying until the game answers.
    ///
    /// Transport failures and echo mismatches are retried every
    /// `retry_delay` with no attempt limit. Any other failure is returned.
    pub async fn open(&self) -> Result<Session> {
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            match self.attempt().await {
                Ok(Some(client)) => {
                    self.open_sessions.fetch_add(1, Ordering::SeqCst);
                    self.state.set(ConnectionState::Connected);
                    info!(attempts, "Connected to game at {}", self.address);
                    let link = SessionLink {
                        connection: self.state.clone(),
                        open_sessions: self.open_sessions.clone(),
                    };
                    return Ok(Session::new(client, self.bridge.clone(), &self.config, link));
                }
                Ok(None) => {
                    debug!(attempt = attempts, "Handshake echo mismatch, retrying");
                }
                Err(e) if e.is_transport() => {
                    debug!(attempt = attempts, "Handshake failed: {}, retrying", e);
                }
                Err(e) => {
                    self.state.set(ConnectionState::Disconnected);
                    return Err(e);
                }
            }

            if attempts == 1 {
                info!("Waiting for game at {}...", self.address);
            }
            self.state.set(ConnectionState::Connecting);
            sleep(self.config.retry_delay()).await;
        }
    }

    /// Run `body` inside a session, closing it however `body` finishes
    pub async fn session<F, Fut, T, E>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<RpcError>,
    {
        let session = self.open().await?;
        let outcome = body(session.controller()).await;
        session.close().await;
        outcome
    }

    /// One connect + hello round. `Ok(None)` means the echo did not match.
    async fn attempt(&self) -> Result<Option<RpcClient>> {
        self.state.set(ConnectionState::Connecting);
        let client = self.connector.connect(&self.address).await?;

        self.state.set(ConnectionState::Handshaking);
        let echo = match self
            .bridge
            .invoke(&client, method::HELLO, vec![Value::from(HELLO_SENTINEL)])
            .await
        {
            Ok(echo) => echo,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        if echo_matches(&echo) {
            Ok(Some(client))
        } else {
            warn!("Unexpected handshake echo from {}: {}", self.address, echo);
            client.close().await;
            Ok(None)
        }
    }
}

/// The game may answer with a MessagePack str or bin
fn echo_matches(echo: &Value) -> bool {
    match echo {
        Value::String(s) => s.as_bytes() == HELLO_SENTINEL.as_bytes(),
        Value::Binary(bytes) => bytes.as_slice() == HELLO_SENTINEL.as_bytes(),
        _ => false,
    }
}

/// An open, handshaken connection.
///
/// Dropping the session closes the socket, so handles obtained from it stop
/// working even when the session ends by `?` or panic.
pub struct Session {
    client: RpcClient,
    controller: Controller,
    state: StateCell,
    link: SessionLink,
    closed: bool,
}

/// Ties a session back to the connection that opened it
struct SessionLink {
    connection: StateCell,
    open_sessions: Arc<AtomicUsize>,
}

impl SessionLink {
    /// The connection reads `Closed` once its last session ends
    fn release(&self) {
        if self.open_sessions.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.connection.set(ConnectionState::Closed);
        }
    }
}

impl Session {
    fn new(
        client: RpcClient,
        bridge: CallBridge,
        config: &ConnectionConfig,
        link: SessionLink,
    ) -> Self {
        let controller = Controller::new(client.downgrade(), bridge, config.poll);
        Self {
            client,
            controller,
            state: StateCell::new(ConnectionState::Connected),
            link,
            closed: false,
        }
    }

    /// Controller bound to this session
    pub fn controller(&self) -> Controller {
        self.controller.clone()
    }

    pub fn address(&self) -> &Address {
        self.client.address()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Close the socket
    pub async fn close(mut self) {
        self.closed = true;
        self.client.close().await;
        self.state.set(ConnectionState::Closed);
        self.link.release();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            self.client.close_now();
            self.state.set(ConnectionState::Closed);
            self.link.release();
        }
    }
}
