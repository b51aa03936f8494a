//! DispatchEngine - executes replication rounds
//!
//! One `dispatch` call runs one round end to end: exclude the local node,
//! serialize once, pick routing, send, collect according to the delivery mode,
//! replay to ignoring members when asked, and map the outcome to a result.
//! The engine holds no per-round state; concurrent rounds share nothing but
//! the transport, the marshaller and the counters.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    DeliveryMode, DispatchConfig, Marshaller, NodeAddress, RawReply, ReplicableCommand,
    ReplyListener, RequestId, ResponseFilter, ResponseSet, RoutingMode, SendOptions, Transport,
};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, trace, warn};

use crate::collator::FutureCollator;
use crate::error::RpcError;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::replay::ReplayCoordinator;
use crate::replies;
use crate::round::{ReplicationRound, RoundParts};

/// Extra time given to a group send beyond the round deadline, so the
/// transport's own accounting of who answered wins over the outer guard.
const GROUP_DEADLINE_SLACK: Duration = Duration::from_millis(50);

/// Runs replication rounds over a transport
pub struct DispatchEngine<C, T, M> {
    transport: Arc<T>,
    marshaller: Arc<M>,
    config: DispatchConfig,
    metrics: Arc<DispatchMetrics>,
    shut_down: AtomicBool,
    _command: PhantomData<fn(C)>,
}

impl<C, T, M> DispatchEngine<C, T, M>
where
    C: ReplicableCommand,
    T: Transport + Send + Sync + 'static,
    M: Marshaller<C> + 'static,
{
    /// Create an engine with fresh counters.
    pub fn new(transport: Arc<T>, marshaller: Arc<M>, config: DispatchConfig) -> Self {
        Self {
            transport,
            marshaller,
            config,
            metrics: Arc::new(DispatchMetrics::new()),
            shut_down: AtomicBool::new(false),
            _command: PhantomData,
        }
    }

    /// Share counters with another component (e.g. a reporting loop).
    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn local_address(&self) -> NodeAddress {
        self.transport.local_address()
    }

    /// Refuse new rounds. Rounds already in flight finish normally.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!(local = %self.transport.local_address(), "Dispatch engine shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Execute one round.
    ///
    /// Returns `Ok(None)` when nothing was sent (no remote destinations), for
    /// fire-and-forget rounds, and when every answer is null. Otherwise the
    /// returned set holds one entry per answering destination, or exactly one
    /// entry for filtered rounds.
    ///
    /// # Errors
    /// - `RpcError::ShutDown` after [`DispatchEngine::shutdown`]
    /// - `RpcError::InvalidRound` for illegal mode combinations
    /// - `RpcError::Serialization` if the command cannot be encoded
    /// - `RpcError::Transport` if the transport refuses the send
    /// - `RpcError::Timeout` naming the destinations that did not answer
    /// - `RpcError::NoAcceptableResponse` if a filtered round accepted nothing
    /// - `RpcError::RemoteExecution` if every destination answered with a failure
    /// - `RpcError::Deserialization` if an answer cannot be decoded
    #[instrument(
        name = "dispatch_round",
        skip(self, round),
        fields(
            command = round.command().type_name(),
            mode = round.mode().as_str(),
            destinations = round.destinations().len()
        )
    )]
    pub async fn dispatch(
        &self,
        round: ReplicationRound<C>,
    ) -> Result<Option<ResponseSet>, RpcError> {
        if self.is_shut_down() {
            return Err(RpcError::ShutDown);
        }
        round.validate()?;

        let command = round.command().type_name();
        let mode = round.mode();
        self.metrics.inc_rounds_started();
        let started = Instant::now();

        let result = self.run(round).await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => {
                self.metrics.inc_rounds_completed();
                observability::record_round(command, mode.as_str(), "ok", latency_ms);
            }
            Err(e) => {
                if let RpcError::Timeout { missing, .. } = e {
                    self.metrics.inc_timeouts();
                    observability::record_timeout(command, missing.len());
                    warn!(missing = ?missing, "Round timed out");
                } else {
                    self.metrics.inc_failures();
                    debug!(error = %e, "Round failed");
                }
                observability::record_round(command, mode.as_str(), e.kind(), latency_ms);
            }
        }
        result
    }

    async fn run(&self, mut round: ReplicationRound<C>) -> Result<Option<ResponseSet>, RpcError> {
        let local = self.transport.local_address();
        if round.exclude(&local) {
            trace!(local = %local, "Local node removed from destinations");
        }
        if round.destinations().is_empty() {
            debug!("No remote destinations, nothing to send");
            return Ok(None);
        }

        let RoundParts {
            command,
            destinations,
            mode,
            routing,
            filter,
            timeout,
            replay_eligible,
        } = round.into_parts(self.config.force_multicast);

        let type_name = command.type_name();
        let payload = self
            .marshaller
            .encode_command(&command)
            .map_err(|source| RpcError::Serialization {
                command: type_name,
                source,
            })?;
        let options = SendOptions::for_round(mode, routing, self.config.oob);
        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());

        debug!(
            routing = routing.as_str(),
            bytes = payload.len(),
            "Replication task sending to {} destinations",
            destinations.len()
        );

        let responses = match (mode, filter) {
            (DeliveryMode::FireAndForget, _) => {
                self.transport
                    .send_and_forget(&destinations, payload, options)
                    .await
                    .map_err(RpcError::Transport)?;
                self.metrics.inc_fire_and_forget();
                return Ok(None);
            }
            (DeliveryMode::WaitForFirstAcceptable, Some(filter)) => {
                self.await_first(type_name, &destinations, filter, payload.clone(), options, timeout)
                    .await?
            }
            (DeliveryMode::WaitForFirstAcceptable, None) => {
                return Err(RpcError::invalid_round(
                    "wait-for-first-acceptable requires a response filter",
                ));
            }
            (DeliveryMode::WaitForAll, _) => match routing {
                RoutingMode::Broadcast => {
                    self.await_group(type_name, &destinations, payload.clone(), options, timeout)
                        .await?
                }
                RoutingMode::PerTargetUnicast => {
                    self.await_each(type_name, &destinations, payload.clone(), options, timeout)
                        .await?
                }
            },
        };
        trace!(responses = ?responses, "Responses");

        let responses = if replay_eligible {
            ReplayCoordinator::<C, T, M>::new(
                &*self.transport,
                &*self.marshaller,
                &self.metrics,
                type_name,
                timeout,
                options,
            )
            .maybe_replay(&payload, responses)
            .await?
        } else {
            responses
        };

        if mode == DeliveryMode::WaitForAll {
            if let Some(failures) = replies::all_failed(&responses) {
                return Err(RpcError::RemoteExecution { failures });
            }
        }

        if responses.is_empty() || responses.contains_only_nulls() {
            return Ok(None);
        }
        Ok(Some(responses))
    }

    /// Wait-for-all over one group message.
    async fn await_group(
        &self,
        command: &'static str,
        targets: &[NodeAddress],
        payload: Bytes,
        options: SendOptions,
        timeout: Duration,
    ) -> Result<ResponseSet, RpcError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let send = self
            .transport
            .send_and_await(targets, payload, options, deadline.into_std());

        let replies = match timeout_at(deadline + GROUP_DEADLINE_SLACK, send).await {
            Ok(replies) => replies.map_err(RpcError::Transport)?,
            Err(_) => return Err(RpcError::timeout(started.elapsed(), targets.to_vec())),
        };

        let (set, missing) =
            replies::collect_group::<C, M>(&*self.marshaller, command, targets, replies)?;
        if !missing.is_empty() {
            return Err(RpcError::timeout(started.elapsed(), missing));
        }
        Ok(set)
    }

    /// Wait-for-all over one unicast per destination.
    async fn await_each(
        &self,
        command: &'static str,
        targets: &[NodeAddress],
        payload: Bytes,
        options: SendOptions,
        timeout: Duration,
    ) -> Result<ResponseSet, RpcError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let (tx, mut rx) = mpsc::unbounded_channel::<RawReply>();
        let listener: ReplyListener = Arc::new(move |reply| {
            // Receiver gone means the round is already over.
            let _ = tx.send(reply);
        });

        let mut pending: HashMap<RequestId, NodeAddress> = HashMap::with_capacity(targets.len());
        for target in targets {
            let request_id = RequestId::next();
            pending.insert(request_id, target.clone());
            self.transport
                .send_unicast(
                    request_id,
                    target,
                    payload.clone(),
                    options,
                    Arc::clone(&listener),
                )
                .map_err(RpcError::Transport)?;
        }

        let mut set = ResponseSet::with_capacity(targets.len());
        let mut timed_out = Vec::new();
        while !pending.is_empty() {
            let reply = match timeout_at(deadline, rx.recv()).await {
                Ok(Some(reply)) => reply,
                Ok(None) | Err(_) => break,
            };
            let Some(source) = pending.remove(&reply.request_id) else {
                trace!(request = %reply.request_id, "Not processing callback; already processed");
                continue;
            };
            match replies::entry_for::<C, M>(&*self.marshaller, command, &source, reply.outcome)? {
                Some(entry) => {
                    set.insert(source, entry);
                }
                None => timed_out.push(source),
            }
        }
        drop(listener);

        timed_out.extend(pending.into_values());
        if !timed_out.is_empty() {
            return Err(RpcError::timeout(started.elapsed(), timed_out));
        }
        Ok(set)
    }

    /// Wait-for-first-acceptable over one unicast per destination.
    async fn await_first(
        &self,
        command: &'static str,
        targets: &[NodeAddress],
        filter: Box<dyn ResponseFilter>,
        payload: Bytes,
        options: SendOptions,
        timeout: Duration,
    ) -> Result<ResponseSet, RpcError> {
        let collator = Arc::new(FutureCollator::new(filter, targets.len(), timeout));

        let sink = Arc::clone(&collator);
        let marshaller = Arc::clone(&self.marshaller);
        let listener: ReplyListener = Arc::new(move |reply: RawReply| match reply.outcome {
            Ok(bytes) => {
                match replies::decode::<C, M>(&*marshaller, command, &reply.source, &bytes) {
                    Ok(response) => sink.complete(reply.request_id, Ok(response)),
                    Err(e) => sink.abort(e),
                }
            }
            Err(fault) => sink.complete(reply.request_id, Err(fault)),
        });

        for target in targets {
            let request_id = RequestId::next();
            collator.watch(request_id, target.clone());
            self.transport
                .send_unicast(
                    request_id,
                    target,
                    payload.clone(),
                    options,
                    Arc::clone(&listener),
                )
                .map_err(RpcError::Transport)?;
        }

        collator.collate().await
    }
}
