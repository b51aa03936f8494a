//! Turning raw transport replies into a ResponseSet

use bytes::Bytes;
use contracts::{
    GroupReplies, Marshaller, NodeAddress, RemoteFailure, ReplyFault, Response, ResponseEntry,
    ResponseSet,
};
use tracing::warn;

use crate::error::RpcError;

/// Decode one reply body, attributing failures to the round's command.
pub(crate) fn decode<C, M: Marshaller<C>>(
    marshaller: &M,
    command: &'static str,
    source: &NodeAddress,
    bytes: &Bytes,
) -> Result<Response, RpcError> {
    marshaller.decode_response(bytes).map_err(|e| {
        RpcError::deserialization(command, format!("reply from {source}: {e}"))
    })
}

/// Entry for one destination, or `None` if it never answered.
pub(crate) fn entry_for<C, M: Marshaller<C>>(
    marshaller: &M,
    command: &'static str,
    source: &NodeAddress,
    outcome: Result<Bytes, ReplyFault>,
) -> Result<Option<ResponseEntry>, RpcError> {
    match outcome {
        Ok(bytes) => decode::<C, M>(marshaller, command, source, &bytes)
            .map(|response| Some(ResponseEntry::received(response))),
        Err(ReplyFault::Suspected) => {
            warn!(member = %source, "Member suspected during round");
            Ok(Some(ResponseEntry::suspected()))
        }
        Err(ReplyFault::Timeout) => Ok(None),
        Err(ReplyFault::Failed(message)) => Ok(Some(ResponseEntry::received(Response::Failure(
            RemoteFailure::new(message),
        )))),
    }
}

/// Build a ResponseSet from group replies.
///
/// Returns the set plus the targets that produced no answer at all.
pub(crate) fn collect_group<C, M: Marshaller<C>>(
    marshaller: &M,
    command: &'static str,
    targets: &[NodeAddress],
    mut replies: GroupReplies,
) -> Result<(ResponseSet, Vec<NodeAddress>), RpcError> {
    let mut set = ResponseSet::with_capacity(targets.len());
    let mut missing = Vec::new();

    for target in targets {
        let entry = match replies.remove(target) {
            Some(outcome) => entry_for::<C, M>(marshaller, command, target, outcome)?,
            None => None,
        };
        match entry {
            Some(entry) => {
                set.insert(target.clone(), entry);
            }
            None => missing.push(target.clone()),
        }
    }

    Ok((set, missing))
}

/// Per-destination failures if every destination in the set failed.
///
/// A suspected member is not a failure, so its presence keeps the set.
pub(crate) fn all_failed(set: &ResponseSet) -> Option<Vec<(NodeAddress, RemoteFailure)>> {
    let mut failures = Vec::new();
    for (address, entry) in set.iter() {
        match &entry.response {
            Some(Response::Failure(failure)) if !entry.suspected => {
                failures.push((address.clone(), failure.clone()))
            }
            _ => return None,
        }
    }
    if failures.is_empty() {
        None
    } else {
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        Some(failures)
    }
}
