//! InboundHandler - receiving side of a round
//!
//! Decodes a command received from another member, runs it through the local
//! executor, and turns every failure into a `Failure` response so the origin
//! learns about it instead of timing out.

use std::sync::Arc;

use bytes::Bytes;
use contracts::{
    CommandExecutor, Marshaller, NodeAddress, RemoteFailure, ReplicableCommand, RequestHandler,
    Response,
};
use tracing::{debug, error, instrument, warn};

const INVOCATION_FAILED: &str = "Problems invoking command.";

/// Bridges the transport's inbound requests to a [`CommandExecutor`]
pub struct InboundHandler<M, E> {
    marshaller: Arc<M>,
    executor: Arc<E>,
}

impl<M, E> InboundHandler<M, E>
where
    E: CommandExecutor + Sync,
    M: Marshaller<E::Command>,
{
    pub fn new(marshaller: Arc<M>, executor: Arc<E>) -> Self {
        Self {
            marshaller,
            executor,
        }
    }

    /// Execute one received command.
    ///
    /// Returns `None` for an empty buffer; nothing is sent back in that case.
    #[instrument(name = "inbound_handle", skip(self, bytes), fields(sender = %sender, bytes = bytes.len()))]
    pub async fn handle(&self, bytes: &[u8], sender: &NodeAddress) -> Option<Response> {
        if bytes.is_empty() {
            warn!("Received empty request, not replying");
            return None;
        }

        let command = match self.marshaller.decode_command(bytes) {
            Ok(command) => command,
            Err(e) => {
                error!(error = %e, "Could not decode command");
                return Some(Response::Failure(
                    RemoteFailure::new(INVOCATION_FAILED).with_cause(e.to_string()),
                ));
            }
        };

        let type_name = command.type_name();
        debug!(command = type_name, "Executing command");
        match self.executor.perform(command, sender).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(command = type_name, error = %e, "Command execution failed");
                Some(Response::Failure(
                    RemoteFailure::new(INVOCATION_FAILED).with_cause(e.to_string()),
                ))
            }
        }
    }

    /// Like [`InboundHandler::handle`], encoding the response for the wire.
    pub async fn handle_bytes(&self, bytes: &[u8], sender: &NodeAddress) -> Option<Bytes> {
        let response = self.handle(bytes, sender).await?;
        match self.marshaller.encode_response(&response) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                error!(error = %e, "Could not encode response");
                let fallback =
                    Response::Failure(RemoteFailure::new(INVOCATION_FAILED).with_cause(e.to_string()));
                self.marshaller.encode_response(&fallback).ok()
            }
        }
    }
}

impl<M, E> RequestHandler for InboundHandler<M, E>
where
    E: CommandExecutor + Sync,
    M: Marshaller<E::Command>,
{
    async fn handle(&self, payload: Bytes, sender: NodeAddress) -> Option<Bytes> {
        self.handle_bytes(&payload, &sender).await
    }
}
