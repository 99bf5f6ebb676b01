//! Transport abstractions for the RPC client
//!
//! Provides AsyncReader/AsyncWriter traits over any byte stream, the
//! MessagePack framing used on the wire, the `Connector` seam that opens
//! clients, and the background reader task that routes responses back to
//! their callers.

use crate::client::RpcClient;
use crate::protocol::{MsgId, Reply, RpcMessage, serialize};
use async_trait::async_trait;
use kart_remote_core::{Address, Result, RpcError};
use std::collections::HashMap;
use std::io::{self, Cursor};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Upper bound on a single buffered message (64MB)
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Channel a response is delivered on
pub type ReplySender = oneshot::Sender<Result<Reply>>;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read the next complete message.
    ///
    /// Must be cancel-safe: the reader task polls it inside `select!`.
    async fn read_message(&mut self) -> Result<RpcMessage>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send {
    /// Write a complete message and flush it
    async fn write_message(&mut self, msg: &RpcMessage) -> Result<()>;

    /// Close the write direction
    async fn shutdown(&mut self) -> Result<()>;
}

/// Opens RPC clients against an address
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address) -> Result<RpcClient>;
}

/// Reads MessagePack-RPC messages from a byte stream.
///
/// MessagePack values are self-delimiting, so messages are concatenated on
/// the wire with no length prefix. Bytes are buffered until a whole value
/// decodes.
pub struct MsgpackReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> MsgpackReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next message, or `None` on a clean end of stream
    pub async fn next_message(&mut self) -> Result<Option<RpcMessage>> {
        loop {
            if let Some(msg) = self.try_decode()? {
                return Ok(Some(msg));
            }

            if self.buf.len() > MAX_MESSAGE_SIZE {
                return Err(RpcError::Transport(format!(
                    "Message too large: {} bytes buffered",
                    self.buf.len()
                )));
            }

            self.buf.reserve(READ_CHUNK);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(RpcError::Transport(format!(
                    "Stream ended inside a message ({} bytes pending)",
                    self.buf.len()
                )));
            }
        }
    }

    fn try_decode(&mut self) -> Result<Option<RpcMessage>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let decoded = {
            let mut cursor = Cursor::new(self.buf.as_slice());
            rmpv::decode::read_value(&mut cursor).map(|value| (value, cursor.position() as usize))
        };

        match decoded {
            Ok((value, used)) => {
                self.buf.drain(..used);
                RpcMessage::from_value(value).map(Some)
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            // The stream cannot be resynchronized after garbage
            Err(e) => Err(RpcError::Transport(format!("Undecodable stream: {}", e))),
        }
    }
}

fn is_incomplete(err: &rmpv::decode::Error) -> bool {
    match err {
        rmpv::decode::Error::InvalidMarkerRead(e) | rmpv::decode::Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncReader for MsgpackReader<R> {
    async fn read_message(&mut self) -> Result<RpcMessage> {
        self.next_message()
            .await?
            .ok_or_else(|| RpcError::Transport("Connection closed by peer".into()))
    }
}

/// Writes MessagePack-RPC messages to a byte stream
pub struct MsgpackWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> MsgpackWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> AsyncWriter for MsgpackWriter<W> {
    async fn write_message(&mut self, msg: &RpcMessage) -> Result<()> {
        let data = serialize(msg)?;
        self.inner.write_all(&data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Calls waiting for a response, keyed by msgid
#[derive(Default)]
struct PendingCalls {
    calls: HashMap<MsgId, ReplySender>,
}

impl PendingCalls {
    /// Track a new call, dropping calls whose caller has stopped waiting
    fn register(&mut self, msgid: MsgId, reply_tx: ReplySender) {
        self.calls.retain(|_, tx| !tx.is_closed());
        self.calls.insert(msgid, reply_tx);
    }

    fn complete(&mut self, msgid: MsgId, reply: Reply) {
        match self.calls.remove(&msgid) {
            // Caller may have given up (timeout)
            Some(reply_tx) => {
                let _ = reply_tx.send(Ok(reply));
            }
            None => warn!(msgid, "Received response but no pending request"),
        }
    }

    fn fail_all(&mut self, reason: &RpcError) {
        for (_, reply_tx) in self.calls.drain() {
            let _ = reply_tx.send(Err(RpcError::Transport(format!(
                "Connection lost: {}",
                reason
            ))));
        }
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Background reader task that routes responses to waiting callers
///
/// This task:
/// - Receives (msgid, reply channel) registrations from the client
/// - Delivers each response to the registration with the same msgid
/// - Fails every outstanding call when the transport dies
///
/// Registrations are always polled first so that a registration sent
/// before its request was written is seen before the response.
pub async fn reader_task<R: AsyncReader>(
    mut reader: R,
    mut register_rx: mpsc::UnboundedReceiver<(MsgId, ReplySender)>,
) {
    let mut pending = PendingCalls::default();

    loop {
        tokio::select! {
            biased;

            reg = register_rx.recv() => {
                match reg {
                    Some((msgid, reply_tx)) => pending.register(msgid, reply_tx),
                    None => {
                        debug!("Registration channel closed, reader task exiting");
                        break;
                    }
                }
            }

            msg_result = reader.read_message() => {
                match msg_result {
                    Ok(RpcMessage::Response { msgid, error, result }) => {
                        debug!(msgid, pending = pending.len(), "[Game→Rust] response");
                        pending.complete(msgid, Reply { error, result });
                    }
                    Ok(other) => {
                        warn!("Ignoring unexpected message from game: {:?}", other);
                    }
                    Err(RpcError::Protocol(e)) => {
                        warn!("Dropping malformed message: {}", e);
                    }
                    Err(e) => {
                        error!("Reader task failed: {}", e);
                        pending.fail_all(&e);
                        break;
                    }
                }
            }
        }
    }
}
