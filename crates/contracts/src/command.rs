//! Commands - the unit of work a round replicates
//!
//! Also defines the execution contract on the receiving side.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{ContractError, NodeAddress, Response};

/// A command that can be shipped to other members and executed there.
///
/// Commands are immutable once built. The same serialized bytes are sent to
/// every destination of a round and may be sent a second time during replay.
pub trait ReplicableCommand: fmt::Debug + Send + Sync + 'static {
    /// Stable numeric type id written in front of the encoded body.
    fn command_id(&self) -> u8;

    /// Declared type name, used to pinpoint marshalling failures.
    fn type_name(&self) -> &'static str;

    /// Whether executing this command twice on the same member is harmless.
    ///
    /// Rounds that may replay a command to members which first ignored it
    /// only accept idempotent commands.
    fn is_idempotent(&self) -> bool {
        false
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one outstanding unicast request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a process-unique request id.
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Executes inbound commands against the local node.
///
/// Implemented by the command-execution layer; the dispatcher only calls it
/// from its inbound handler.
#[trait_variant::make(CommandExecutor: Send)]
pub trait LocalCommandExecutor {
    /// Command type this executor understands
    type Command: ReplicableCommand;

    /// Run the command on behalf of `origin`.
    ///
    /// # Errors
    /// Any error is reported back to the origin as a failure response.
    async fn perform(
        &self,
        command: Self::Command,
        origin: &NodeAddress,
    ) -> Result<Response, ContractError>;
}
