//! MessagePack-RPC client handle
//!
//! `RpcClient` is a cheap, clonable handle around one open connection. Calls
//! are split in two halves: `call_async` writes the request and returns a
//! [`PendingCall`], and `PendingCall::get` waits for the matching response.

use crate::protocol::{MsgId, Reply, RpcMessage};
use crate::transport::{AsyncReader, AsyncWriter, MsgpackReader, MsgpackWriter, reader_task};
use kart_remote_core::{Address, Result, RpcError};
use rmpv::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Handle to an open RPC connection
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

/// Non-owning handle; upgrading fails once every `RpcClient` is gone
#[derive(Clone)]
pub struct WeakRpcClient {
    inner: Weak<ClientInner>,
}

struct ClientInner {
    /// Address the connection was opened against
    address: Address,
    /// Writer half of the connection, `None` once closed
    writer: Mutex<Option<Box<dyn AsyncWriter>>>,
    /// Channel to register pending calls with the reader task
    register_tx: mpsc::UnboundedSender<(MsgId, crate::transport::ReplySender)>,
    /// Next request id
    next_msgid: AtomicU32,
    /// Set once by `close`
    closed: AtomicBool,
    /// How long a call may go unanswered, counted from when it is sent
    call_timeout: Duration,
    /// Background reader task
    reader_abort: AbortHandle,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.reader_abort.abort();
    }
}

impl RpcClient {
    /// Build a client over an already-open transport.
    ///
    /// Spawns the reader task, so this must run inside a tokio runtime.
    pub fn new<R, W>(address: Address, reader: R, writer: W, call_timeout: Duration) -> Self
    where
        R: AsyncReader + 'static,
        W: AsyncWriter + 'static,
    {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(reader_task(reader, register_rx));

        Self {
            inner: Arc::new(ClientInner {
                address,
                writer: Mutex::new(Some(Box::new(writer))),
                register_tx,
                next_msgid: AtomicU32::new(0),
                closed: AtomicBool::new(false),
                call_timeout,
                reader_abort: handle.abort_handle(),
            }),
        }
    }

    /// Build a client over any duplex byte stream
    pub fn from_stream<S>(address: Address, stream: S, call_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::new(
            address,
            MsgpackReader::new(read_half),
            MsgpackWriter::new(write_half),
            call_timeout,
        )
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn call_timeout(&self) -> Duration {
        self.inner.call_timeout
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn downgrade(&self) -> WeakRpcClient {
        WeakRpcClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Send a request and return the not-yet-resolved call
    pub async fn call_async(&self, method: &str, params: Vec<Value>) -> Result<PendingCall> {
        self.ensure_open()?;

        let msgid = self.inner.next_msgid.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.inner.call_timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .register_tx
            .send((msgid, reply_tx))
            .map_err(|_| RpcError::Transport("Connection lost".into()))?;

        debug!(msgid, method, "[Rust→Game] request");
        self.send(RpcMessage::Request {
            msgid,
            method: method.to_string(),
            params,
        })
        .await?;

        Ok(PendingCall {
            method: method.to_string(),
            msgid,
            reply_rx,
            timeout: self.inner.call_timeout,
            deadline,
        })
    }

    /// Send a request and wait for its result
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.call_async(method, params).await?.get().await
    }

    /// Send a one-way notification. Nothing is returned by the game.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.ensure_open()?;

        debug!(method, "[Rust→Game] notify");
        self.send(RpcMessage::Notification {
            method: method.to_string(),
            params,
        })
        .await
    }

    /// Close the connection. Later calls fail with `ConnectionClosed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown on close failed: {}", e);
            }
        }
        self.inner.reader_abort.abort();
        info!("Disconnected from {}", self.inner.address);
    }

    /// Synchronous close for `Drop` paths.
    ///
    /// The writer is dropped without a graceful shutdown, and only if no write
    /// is in flight. The closed flag stops any later write either way.
    pub fn close_now(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut guard) = self.inner.writer.try_lock() {
            guard.take();
        }
        self.inner.reader_abort.abort();
        info!("Disconnected from {}", self.inner.address);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(RpcError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn send(&self, msg: RpcMessage) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(RpcError::ConnectionClosed)?;
        writer.write_message(&msg).await
    }
}

impl WeakRpcClient {
    /// Get a usable client, failing if the connection is gone or closed
    pub fn upgrade(&self) -> Result<RpcClient> {
        let client = self
            .inner
            .upgrade()
            .map(|inner| RpcClient { inner })
            .ok_or(RpcError::ConnectionClosed)?;
        client.ensure_open()?;
        Ok(client)
    }
}

/// A request that has been sent but not yet answered
pub struct PendingCall {
    method: String,
    msgid: MsgId,
    reply_rx: oneshot::Receiver<Result<Reply>>,
    timeout: Duration,
    deadline: Instant,
}

impl PendingCall {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn msgid(&self) -> MsgId {
        self.msgid
    }

    /// When this call times out
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, up to the deadline set when it was sent
    pub async fn get(self) -> Result<Value> {
        match tokio::time::timeout_at(self.deadline, self.reply_rx).await {
            Err(_) => Err(RpcError::Timeout(self.timeout)),
            // Reader task dropped the sender: the client was closed
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Ok(Ok(reply)) => reply?.into_result(&self.method),
        }
    }
}
