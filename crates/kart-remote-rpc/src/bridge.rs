//! Call bridge
//!
//! Issues a call on the client, then hands the wait for its result to a
//! bounded pool of workers. The caller gets back an [`RpcCall`] it can await
//! (or drop) without tying up its own task.
//!
//! The pool size is the backpressure limit on concurrent in-flight result
//! waits: once every permit is taken, new waits queue until one frees up.

use crate::client::RpcClient;
use kart_remote_core::{Result, RpcError};
use rmpv::Value;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Bounded pool that waits on call results
#[derive(Debug, Clone)]
pub struct CallBridge {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl Default for CallBridge {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WORKERS)
    }
}

impl CallBridge {
    pub const DEFAULT_WORKERS: usize = 4;

    /// Create a pool with `workers` slots (at least one)
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Configured pool size
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Slots not currently waiting on a result
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Send `method` now and return the awaitable result.
    ///
    /// The request is written before this returns. Dropping the returned
    /// [`RpcCall`] does not cancel the wait: the worker runs to completion.
    pub async fn call(
        &self,
        client: &RpcClient,
        method: &str,
        params: Vec<Value>,
    ) -> Result<RpcCall> {
        let pending = client.call_async(method, params).await?;
        let permits = self.permits.clone();

        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| RpcError::Transport("Call bridge closed".into()))?;
            pending.get().await
        });

        Ok(RpcCall {
            method: method.to_string(),
            handle,
        })
    }

    /// Send `method` and wait for its result
    pub async fn invoke(
        &self,
        client: &RpcClient,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        self.call(client, method, params).await?.await
    }

    /// Send `method` and decode its result
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        client: &RpcClient,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        let value = self.invoke(client, method, params).await?;
        debug!(method, result = %value, "[Game→Rust] result");
        Ok(rmpv::ext::from_value(value)?)
    }
}

/// Result of a call whose wait runs on the bridge's pool
pub struct RpcCall {
    method: String,
    handle: JoinHandle<Result<Value>>,
}

impl RpcCall {
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for RpcCall {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_err)) => Poll::Ready(Err(RpcError::Transport(format!(
                "Worker for `{}` failed: {}",
                this.method, join_err
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LoopbackConnector;
    use crate::server::RpcServer;
    use crate::protocol::{MsgId, RpcMessage};
    use crate::transport::{AsyncWriter, Connector, MsgpackReader, MsgpackWriter};
    use kart_remote_core::Address;
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::time::{Instant, sleep, timeout};

    /// Game side of a duplex connection, answering only when told to
    struct ManualPeer {
        reader: MsgpackReader<ReadHalf<DuplexStream>>,
        writer: MsgpackWriter<WriteHalf<DuplexStream>>,
    }

    impl ManualPeer {
        fn connect() -> (RpcClient, Self) {
            let (client_io, peer_io) = tokio::io::duplex(4096);
            let (read_half, write_half) = tokio::io::split(peer_io);
            let client =
                RpcClient::from_stream(Address::default(), client_io, Duration::from_secs(5));
            let peer = Self {
                reader: MsgpackReader::new(read_half),
                writer: MsgpackWriter::new(write_half),
            };
            (client, peer)
        }

        async fn next_request(&mut self) -> MsgId {
            match self.reader.next_message().await.unwrap() {
                Some(RpcMessage::Request { msgid, .. }) => msgid,
                other => panic!("Expected a request, got {:?}", other),
            }
        }

        async fn answer(&mut self, msgid: MsgId, result: Value) {
            let reply = RpcMessage::Response {
                msgid,
                error: Value::Nil,
                result,
            };
            self.writer.write_message(&reply).await.unwrap();
        }
    }

    async fn client() -> RpcClient {
        let server = RpcServer::new()
            .bind("player_count", |_| Ok(Value::from(3u32)))
            .bind("game_running", |_| Ok(Value::from(true)))
            .bind("hello", |_| Err("not today".to_string()));
        LoopbackConnector::new(server)
            .connect(&Address::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_as_decodes() {
        let client = client().await;
        let bridge = CallBridge::default();

        let count: u32 = bridge.invoke_as(&client, "player_count", vec![]).await.unwrap();
        assert_eq!(count, 3);
        let running: bool = bridge.invoke_as(&client, "game_running", vec![]).await.unwrap();
        assert!(running);
    }

    #[tokio::test]
    async fn test_remote_failure_propagates() {
        let client = client().await;
        let bridge = CallBridge::default();

        let err = bridge
            .invoke(&client, "hello", vec![Value::from("x")])
            .await
            .unwrap_err();
        assert!(err.is_remote());
    }

    #[tokio::test]
    async fn test_wrong_result_type_is_serialization_error() {
        let client = client().await;
        let bridge = CallBridge::default();

        let err = bridge
            .invoke_as::<bool>(&client, "player_count", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_single_worker_serves_concurrent_calls() {
        let client = client().await;
        let bridge = CallBridge::new(1);

        let first = bridge.call(&client, "player_count", vec![]).await.unwrap();
        let second = bridge.call(&client, "game_running", vec![]).await.unwrap();
        assert_eq!(second.method(), "game_running");

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap(), Value::from(3));
        assert_eq!(b.unwrap(), Value::from(true));
        assert_eq!(bridge.idle_workers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_bounds_concurrent_waits() {
        let (client, mut peer) = ManualPeer::connect();
        let bridge = CallBridge::new(2);

        let mut first = bridge.call(&client, "player_count", vec![]).await.unwrap();
        let second = bridge.call(&client, "player_count", vec![]).await.unwrap();
        let mut third = bridge.call(&client, "player_count", vec![]).await.unwrap();
        let ids = [
            peer.next_request().await,
            peer.next_request().await,
            peer.next_request().await,
        ];

        // The third reply arrives while both workers are still waiting
        peer.answer(ids[2], Value::from(3)).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(bridge.idle_workers(), 0);
        assert!(timeout(Duration::from_millis(10), &mut third).await.is_err());

        peer.answer(ids[0], Value::from(1)).await;
        assert_eq!((&mut first).await.unwrap(), Value::from(1));
        let released = timeout(Duration::from_millis(10), &mut third).await;
        assert_eq!(released.unwrap().unwrap(), Value::from(3));

        peer.answer(ids[1], Value::from(2)).await;
        assert_eq!(second.await.unwrap(), Value::from(2));
        assert_eq!(bridge.idle_workers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_call_times_out_from_send() {
        let (client, mut peer) = ManualPeer::connect();
        let bridge = CallBridge::new(1);

        let start = Instant::now();
        let first = bridge.call(&client, "game_running", vec![]).await.unwrap();
        let second = bridge.call(&client, "game_running", vec![]).await.unwrap();
        peer.next_request().await;
        peer.next_request().await;

        let (a, b) = tokio::join!(first, second);
        assert!(matches!(a, Err(RpcError::Timeout(_))));
        assert!(matches!(b, Err(RpcError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[test]
    fn test_pool_size_clamped() {
        assert_eq!(CallBridge::new(0).workers(), 1);
        assert_eq!(CallBridge::default().workers(), 4);
        assert_eq!(CallBridge::default().idle_workers(), 4);
    }
}
