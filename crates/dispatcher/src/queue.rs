//! ReplicationQueue - rounds executed on a background worker
//!
//! The caller hands over a whole round and returns at once; serialization,
//! sending and collection all happen on the worker. Failures are logged and
//! counted by the engine, never reported back.

use std::sync::Arc;

use contracts::{Marshaller, ReplicableCommand, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::engine::DispatchEngine;
use crate::error::RpcError;
use crate::round::ReplicationRound;

/// Handle to a running background worker
pub struct ReplicationQueue<C, T, M> {
    tx: mpsc::Sender<ReplicationRound<C>>,
    engine: Arc<DispatchEngine<C, T, M>>,
    capacity: usize,
    worker_handle: JoinHandle<()>,
}

impl<C, T, M> ReplicationQueue<C, T, M>
where
    C: ReplicableCommand,
    T: Transport + Send + Sync + 'static,
    M: Marshaller<C> + 'static,
{
    /// Spawn the worker with room for `capacity` pending rounds.
    pub fn spawn(engine: Arc<DispatchEngine<C, T, M>>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let worker_engine = Arc::clone(&engine);

        let worker_handle = tokio::spawn(async move {
            replication_worker(worker_engine, rx).await;
        });

        Self {
            tx,
            engine,
            capacity,
            worker_handle,
        }
    }

    /// Spawn with the capacity from the engine's configuration.
    pub fn from_config(engine: Arc<DispatchEngine<C, T, M>>) -> Self {
        let capacity = engine.config().async_queue_capacity;
        Self::spawn(engine, capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of rounds waiting for the worker
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Queue a round without waiting.
    ///
    /// # Errors
    /// - `RpcError::QueueFull` if the queue is full; the round is dropped
    /// - `RpcError::ShutDown` if the worker has stopped
    pub fn try_submit(&self, round: ReplicationRound<C>) -> Result<(), RpcError> {
        match self.tx.try_send(round) {
            Ok(()) => {
                self.engine.metrics().inc_queued();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(round)) => {
                let command = round.command().type_name();
                self.engine.metrics().inc_dropped();
                observability::record_async_dropped(command);
                warn!(
                    command,
                    capacity = self.capacity,
                    "Replication queue full, round dropped"
                );
                Err(RpcError::QueueFull {
                    capacity: self.capacity,
                    command,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Replication worker closed unexpectedly");
                Err(RpcError::ShutDown)
            }
        }
    }

    /// Stop accepting rounds and wait for queued ones to finish.
    #[instrument(name = "replication_queue_shutdown", skip(self))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(error = ?e, "Replication worker panicked");
        }
        debug!("ReplicationQueue shutdown complete");
    }
}

#[instrument(name = "replication_worker_loop", skip(engine, rx))]
async fn replication_worker<C, T, M>(
    engine: Arc<DispatchEngine<C, T, M>>,
    mut rx: mpsc::Receiver<ReplicationRound<C>>,
) where
    C: ReplicableCommand,
    T: Transport + Send + Sync + 'static,
    M: Marshaller<C> + 'static,
{
    debug!("Replication worker started");

    while let Some(round) = rx.recv().await {
        let command = round.command().type_name();
        if let Err(e) = engine.dispatch(round).await {
            error!(command, error = %e, "Background replication failed");
        }
    }

    debug!("Replication worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonMarshaller;
    use contracts::{DispatchConfig, NodeAddress, Response};
    use loopback::{Behavior, LoopbackTransport};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Invalidate {
        key: String,
    }

    impl ReplicableCommand for Invalidate {
        fn command_id(&self) -> u8 {
            7
        }

        fn type_name(&self) -> &'static str {
            "Invalidate"
        }
    }

    type Engine = DispatchEngine<Invalidate, LoopbackTransport, JsonMarshaller<Invalidate>>;

    fn setup() -> (Arc<Engine>, LoopbackTransport) {
        let marshaller = Arc::new(JsonMarshaller::<Invalidate>::new());
        let encoder = Arc::clone(&marshaller);
        let transport =
            LoopbackTransport::new("self", move |r: &Response| encoder.encode_response(r));
        let engine = DispatchEngine::new(
            Arc::new(transport.clone()),
            marshaller,
            DispatchConfig::default(),
        );
        (Arc::new(engine), transport)
    }

    fn round(key: &str) -> ReplicationRound<Invalidate> {
        ReplicationRound::wait_for_all(
            Invalidate { key: key.into() },
            [NodeAddress::from("a"), NodeAddress::from("b")],
        )
    }

    #[tokio::test]
    async fn test_queued_rounds_drain_on_shutdown() {
        let (engine, transport) = setup();
        let queue = ReplicationQueue::spawn(Arc::clone(&engine), 16);

        for i in 0..5 {
            queue.try_submit(round(&format!("k{i}"))).unwrap();
        }
        queue.shutdown().await;

        assert_eq!(transport.hits("a"), 5);
        assert_eq!(transport.hits("b"), 5);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.queued, 5);
        assert_eq!(snapshot.rounds_completed, 5);
    }

    #[tokio::test]
    async fn test_full_queue_drops_round() {
        let (engine, transport) = setup();
        transport.set_behavior(
            "a",
            Behavior::Delayed(Duration::from_millis(100), Response::null()),
        );
        let queue = ReplicationQueue::spawn(Arc::clone(&engine), 1);

        let results: Vec<_> = (0..10).map(|i| queue.try_submit(round(&format!("k{i}")))).collect();

        let dropped = results
            .iter()
            .filter(|r| matches!(r, Err(RpcError::QueueFull { capacity: 1, command: "Invalidate" })))
            .count();
        assert!(dropped > 0);
        assert_eq!(engine.snapshot().dropped, dropped as u64);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_survives_failed_rounds() {
        let (engine, transport) = setup();
        transport.set_behavior("a", Behavior::Reply(Response::failure("boom")));
        transport.set_behavior("b", Behavior::Reply(Response::failure("boom")));
        let queue = ReplicationQueue::from_config(Arc::clone(&engine));
        assert_eq!(queue.capacity(), 1024);

        queue.try_submit(round("k1")).unwrap();
        queue.try_submit(round("k2")).unwrap();
        queue.shutdown().await;

        assert_eq!(engine.snapshot().failures, 2);
    }
}
