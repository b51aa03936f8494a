//! FutureCollator - first-acceptable collation over parallel unicasts
//!
//! One collator belongs to one filtered round. Transport callbacks feed it
//! replies through [`FutureCollator::complete`]; the round's caller waits in
//! [`FutureCollator::collate`]. All state sits behind a single per-round mutex
//! and the caller is woken through a `Notify`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{NodeAddress, ReplyFault, RequestId, Response, ResponseFilter, ResponseSet};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use crate::error::RpcError;

#[derive(Debug)]
struct Outstanding {
    address: NodeAddress,
    processed: bool,
}

struct CollatorState {
    filter: Box<dyn ResponseFilter>,
    outstanding: HashMap<RequestId, Outstanding>,
    expected: usize,
    result: Option<ResponseSet>,
    errors: Vec<(NodeAddress, ReplyFault)>,
    fatal: Option<RpcError>,
}

impl CollatorState {
    fn resolved(&self) -> bool {
        self.result.is_some() || self.fatal.is_some()
    }

    fn unanswered(&self) -> Vec<NodeAddress> {
        self.outstanding
            .values()
            .filter(|o| !o.processed)
            .map(|o| o.address.clone())
            .collect()
    }

    fn destinations(&self) -> Vec<NodeAddress> {
        let mut all: Vec<_> = self.outstanding.values().map(|o| o.address.clone()).collect();
        all.sort();
        all
    }
}

/// Resolves once: on the first reply the filter is satisfied with, when every
/// reply has failed or been rejected, or when the deadline passes.
pub struct FutureCollator {
    state: Mutex<CollatorState>,
    notify: Notify,
    started: Instant,
    deadline: Instant,
}

impl FutureCollator {
    /// Create a collator expecting `expected` replies within `timeout`.
    pub fn new(filter: Box<dyn ResponseFilter>, expected: usize, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            state: Mutex::new(CollatorState {
                filter,
                outstanding: HashMap::with_capacity(expected),
                expected,
                result: None,
                errors: Vec::new(),
                fatal: None,
            }),
            notify: Notify::new(),
            started,
            deadline: started + timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request before it is sent.
    pub fn watch(&self, request_id: RequestId, address: NodeAddress) {
        self.lock().outstanding.insert(
            request_id,
            Outstanding {
                address,
                processed: false,
            },
        );
    }

    /// Feed the completion of one request.
    ///
    /// A second completion for the same request is ignored.
    pub fn complete(&self, request_id: RequestId, outcome: Result<Response, ReplyFault>) {
        let mut state = self.lock();

        let sender = match state.outstanding.get_mut(&request_id) {
            Some(o) if o.processed => {
                trace!(
                    request = %request_id,
                    sender = %o.address,
                    "Not processing callback; already processed"
                );
                return;
            }
            Some(o) => {
                o.processed = true;
                o.address.clone()
            }
            None => {
                debug!(request = %request_id, "Completion for unknown request ignored");
                return;
            }
        };

        if state.resolved() {
            debug!(
                sender = %sender,
                "Skipping response, a valid response for this request was already received"
            );
        } else {
            match outcome {
                Ok(response) => {
                    trace!(sender = %sender, ?response, "Received response");
                    let accepted = state.filter.is_acceptable(&response, &sender);
                    if accepted && !state.filter.need_more_responses() {
                        state.result = Some(ResponseSet::single(sender, response));
                    } else if let Response::Failure(failure) = &response {
                        state
                            .errors
                            .push((sender, ReplyFault::Failed(failure.to_string())));
                    }
                }
                Err(fault) => {
                    debug!(sender = %sender, error = %fault, "Caught error from sender, skipping response");
                    state.errors.push((sender, fault));
                }
            }
        }

        state.expected = state.expected.saturating_sub(1);
        drop(state);
        self.notify.notify_one();
    }

    /// Fail the round outright, e.g. on an undecodable reply.
    pub fn abort(&self, error: RpcError) {
        let mut state = self.lock();
        if !state.resolved() {
            state.fatal = Some(error);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Number of replies still expected
    pub fn expected(&self) -> usize {
        self.lock().expected
    }

    /// Wait for resolution.
    ///
    /// # Errors
    /// - `RpcError::NoAcceptableResponse` if every reply was rejected or failed
    /// - `RpcError::Timeout` naming the members that had not answered
    /// - whatever error was passed to [`FutureCollator::abort`]
    pub async fn collate(&self) -> Result<ResponseSet, RpcError> {
        loop {
            if let Some(outcome) = self.try_resolve() {
                return outcome;
            }
            if timeout_at(self.deadline, self.notify.notified()).await.is_err() {
                return self.try_resolve().unwrap_or_else(|| {
                    let missing = self.lock().unanswered();
                    Err(RpcError::timeout(self.started.elapsed(), missing))
                });
            }
        }
    }

    fn try_resolve(&self) -> Option<Result<ResponseSet, RpcError>> {
        let mut state = self.lock();
        if let Some(error) = state.fatal.take() {
            return Some(Err(error));
        }
        if let Some(result) = state.result.take() {
            return Some(Ok(result));
        }
        if state.expected == 0 {
            return Some(Err(RpcError::NoAcceptableResponse {
                destinations: state.destinations(),
                errors: std::mem::take(&mut state.errors),
            }));
        }
        None
    }
}
