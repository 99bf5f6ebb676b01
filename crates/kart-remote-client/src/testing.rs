//! Scripted stand-in game for unit tests

use crate::connection::{HELLO_SENTINEL, KartConnection, Session};
use async_trait::async_trait;
use kart_remote_core::{Address, ConnectionConfig, Result, RpcError, method};
use kart_remote_rpc::{Connector, LoopbackConnector, RpcClient, RpcServer};
use rmpv::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Replies handed out in order; the last one repeats forever
#[derive(Clone)]
pub struct Script<T>(Arc<Mutex<VecDeque<T>>>);

impl<T: Clone> Script<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Self {
        Self(Arc::new(Mutex::new(values.into_iter().collect())))
    }

    pub fn next(&self) -> T {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().expect("script must not be empty")
        }
    }
}

/// Commands received by the fake game, in arrival order
pub type CommandLog = mpsc::UnboundedReceiver<(String, Vec<Value>)>;

pub struct FakeGame {
    pub running: Script<bool>,
    pub counts: Script<u32>,
    pub hello: Script<std::result::Result<Value, String>>,
    pub hello_calls: Arc<AtomicU32>,
}

impl FakeGame {
    pub fn new() -> Self {
        Self {
            running: Script::new([true]),
            counts: Script::new([1]),
            hello: Script::new([Ok(Value::from(HELLO_SENTINEL))]),
            hello_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn running(mut self, values: impl IntoIterator<Item = bool>) -> Self {
        self.running = Script::new(values);
        self
    }

    pub fn counts(mut self, values: impl IntoIterator<Item = u32>) -> Self {
        self.counts = Script::new(values);
        self
    }

    pub fn hello(
        mut self,
        replies: impl IntoIterator<Item = std::result::Result<Value, String>>,
    ) -> Self {
        self.hello = Script::new(replies);
        self
    }

    pub fn server(&self) -> (RpcServer, CommandLog) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let running = self.running.clone();
        let counts = self.counts.clone();
        let hello = self.hello.clone();
        let hello_calls = self.hello_calls.clone();

        let mut server = RpcServer::new()
            .bind(method::HELLO, move |_| {
                hello_calls.fetch_add(1, Ordering::SeqCst);
                hello.next()
            })
            .bind(method::GAME_RUNNING, move |_| Ok(Value::from(running.next())))
            .bind(method::PLAYER_COUNT, move |_| Ok(Value::from(counts.next())));

        for command in [
            method::DISABLE_PLAYER_CONTROLS,
            method::USE_NITROUS,
            method::SET_FIRING,
            method::START_DRIFTING,
            method::STOP_DRIFTING,
        ] {
            let log_tx = log_tx.clone();
            server = server.bind(command, move |params| {
                let _ = log_tx.send((command.to_string(), params));
                Ok(Value::Nil)
            });
        }

        (server, log_rx)
    }

    pub fn connector(&self) -> (LoopbackConnector, CommandLog) {
        let (server, log) = self.server();
        (LoopbackConnector::new(server), log)
    }

    /// Open a handshaken session against this game
    pub async fn session(&self) -> (Session, CommandLog) {
        let (connector, log) = self.connector();
        (open(connector).await, log)
    }
}

/// Open a session through `connector` with default settings
pub async fn open<C: Connector>(connector: C) -> Session {
    KartConnection::with_connector(ConnectionConfig::default(), connector)
        .open()
        .await
        .expect("handshake with fake game")
}

/// Refuses connections until `up_at`, like a game that has not launched yet
pub struct LateConnector {
    pub inner: LoopbackConnector,
    pub up_at: Instant,
    pub attempts: Arc<AtomicU32>,
}

impl LateConnector {
    pub fn new(inner: LoopbackConnector, delay: Duration) -> Self {
        Self {
            inner,
            up_at: Instant::now() + delay,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Connector for LateConnector {
    async fn connect(&self, address: &Address) -> Result<RpcClient> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if Instant::now() < self.up_at {
            return Err(RpcError::Transport(format!(
                "Failed to connect to {}: connection refused",
                address
            )));
        }
        self.inner.connect(address).await
    }
}
