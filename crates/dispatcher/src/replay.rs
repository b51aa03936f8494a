//! ReplayCoordinator - second pass for members that ignored a round
//!
//! A member that is not ready yet (still joining, for instance) answers
//! `Ignored`. If another member's `Extended` answer asks for ignored requests
//! to be replayed, the same bytes are re-sent once, synchronously, to exactly
//! the ignoring members. Replayed answers never trigger another replay.

use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use contracts::{Marshaller, ResponseSet, RoutingMode, SendOptions, Transport};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument};

use crate::error::RpcError;
use crate::metrics::DispatchMetrics;
use crate::replies;

pub struct ReplayCoordinator<'a, C, T, M> {
    transport: &'a T,
    marshaller: &'a M,
    metrics: &'a DispatchMetrics,
    command: &'static str,
    timeout: Duration,
    options: SendOptions,
    _command: PhantomData<fn() -> C>,
}

impl<'a, C, T, M> ReplayCoordinator<'a, C, T, M>
where
    T: Transport + Sync,
    M: Marshaller<C>,
{
    pub fn new(
        transport: &'a T,
        marshaller: &'a M,
        metrics: &'a DispatchMetrics,
        command: &'static str,
        timeout: Duration,
        options: SendOptions,
    ) -> Self {
        Self {
            transport,
            marshaller,
            metrics,
            command,
            timeout,
            options,
            _command: PhantomData,
        }
    }

    /// Unwrap `Extended` answers and replay to ignoring members if asked to.
    ///
    /// Without a replay request, `Ignored` entries are returned unchanged and
    /// callers should treat them as "try again later".
    ///
    /// # Errors
    /// - `RpcError::Transport` if the replay send is refused
    /// - `RpcError::Timeout` if an ignoring member does not answer the replay
    /// - `RpcError::Deserialization` if a replayed answer is unreadable
    #[instrument(name = "replay_maybe_replay", skip(self, payload, responses), fields(command = self.command))]
    pub async fn maybe_replay(
        &self,
        payload: &Bytes,
        mut responses: ResponseSet,
    ) -> Result<ResponseSet, RpcError> {
        let replay_requested = responses.unwrap_extended();
        let ignorers = responses.ignoring();

        if ignorers.is_empty() {
            return Ok(responses);
        }
        if !replay_requested {
            debug!(ignorers = ?ignorers, "Request ignored but no member asked for replay");
            return Ok(responses);
        }

        info!(ignorers = ?ignorers, "Replaying message to ignoring senders");
        self.metrics.inc_replays();
        observability::record_replay(self.command, ignorers.len());

        let mut options = self.options.with_routing(RoutingMode::Broadcast);
        options.dont_bundle = true;
        let started = Instant::now();
        let deadline = started + self.timeout;

        let send = self
            .transport
            .send_and_await(&ignorers, payload.clone(), options, deadline.into_std());
        let replies = match timeout_at(deadline, send).await {
            Ok(replies) => replies.map_err(RpcError::Transport)?,
            Err(_) => return Err(RpcError::timeout(started.elapsed(), ignorers)),
        };

        let (mut replayed, missing) =
            replies::collect_group::<C, M>(self.marshaller, self.command, &ignorers, replies)?;
        if !missing.is_empty() {
            return Err(RpcError::timeout(started.elapsed(), missing));
        }

        replayed.unwrap_extended();
        responses.merge(replayed);
        Ok(responses)
    }
}
