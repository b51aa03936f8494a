//! Transport - the message layer below the dispatcher
//!
//! Membership and delivery live behind this trait. The dispatcher only borrows
//! a transport per send and never holds it across a wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;

use crate::{ContractError, NodeAddress, RequestId, SendOptions};

/// Why a destination produced no usable reply bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyFault {
    /// The transport suspects the member is unreachable
    #[error("member suspected")]
    Suspected,
    /// The remote side or the transport timed out
    #[error("remote timeout")]
    Timeout,
    /// The request failed for another reason
    #[error("{0}")]
    Failed(String),
}

/// Completion of one unicast request, delivered by the transport
#[derive(Debug, Clone)]
pub struct RawReply {
    /// Request this reply completes
    pub request_id: RequestId,
    /// Member that produced it
    pub source: NodeAddress,
    /// Encoded response, or the reason there is none
    pub outcome: Result<Bytes, ReplyFault>,
}

/// Completion callback for unicast requests.
///
/// Transports call it once per request in any order, from any thread. Some
/// transports may call it twice for the same request; receivers must tolerate
/// that.
pub type ReplyListener = Arc<dyn Fn(RawReply) + Send + Sync>;

/// Answers gathered by a group send. Members that never answered are absent.
pub type GroupReplies = HashMap<NodeAddress, Result<Bytes, ReplyFault>>;

/// Outbound side of the message transport
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Address of this node
    fn local_address(&self) -> NodeAddress;

    /// Send without expecting replies.
    async fn send_and_forget(
        &self,
        targets: &[NodeAddress],
        payload: Bytes,
        options: SendOptions,
    ) -> Result<(), ContractError>;

    /// Send to a group and gather replies until all arrive or `deadline` passes.
    async fn send_and_await(
        &self,
        targets: &[NodeAddress],
        payload: Bytes,
        options: SendOptions,
        deadline: Instant,
    ) -> Result<GroupReplies, ContractError>;

    /// Start a unicast request; `listener` is invoked when it completes.
    ///
    /// Must not block. `request_id` is allocated by the caller so it can be
    /// registered before any completion can race in.
    fn send_unicast(
        &self,
        request_id: RequestId,
        target: &NodeAddress,
        payload: Bytes,
        options: SendOptions,
        listener: ReplyListener,
    ) -> Result<(), ContractError>;
}

/// Inbound side: the transport hands received requests to a handler.
#[trait_variant::make(RequestHandler: Send)]
pub trait LocalRequestHandler {
    /// Handle one request; `None` means no reply is sent.
    async fn handle(&self, payload: Bytes, sender: NodeAddress) -> Option<Bytes>;
}
