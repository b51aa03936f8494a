//! Response and ResponseSet
//!
//! The per-destination outcome of a round and its aggregate.

use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::NodeAddress;

/// Failure raised by a remote member while executing a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// Summary of what went wrong
    pub message: String,
    /// Underlying cause as reported by the remote side
    pub cause: Option<String>,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} (caused by: {})", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of one destination's attempt to execute a command.
///
/// Exactly one variant is ever populated; `Value(None)` is a legitimate
/// "nothing to say" answer, distinct from not answering at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Normal return value
    Value(Option<Bytes>),
    /// The member was not ready to execute the command
    Ignored,
    /// A value plus a request to replay commands the round's other members ignored
    Extended {
        value: Option<Bytes>,
        replay_ignored: bool,
    },
    /// Execution threw on the remote member
    Failure(RemoteFailure),
}

impl Response {
    /// Successful response carrying a value
    pub fn value(value: impl Into<Bytes>) -> Self {
        Self::Value(Some(value.into()))
    }

    /// Successful response carrying nothing
    pub fn null() -> Self {
        Self::Value(None)
    }

    /// Failure response
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(RemoteFailure::new(message))
    }

    /// `Value` or `Extended`
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Value(_) | Self::Extended { .. })
    }

    /// `Value(None)`
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(None))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }

    /// Extended response that asked for ignored requests to be replayed
    pub fn requests_replay(&self) -> bool {
        matches!(
            self,
            Self::Extended {
                replay_ignored: true,
                ..
            }
        )
    }

    /// Payload of a successful response
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Self::Value(value) | Self::Extended { value, .. } => value.as_ref(),
            Self::Ignored | Self::Failure(_) => None,
        }
    }

    /// Strip an `Extended` wrapper down to its inner value.
    pub fn unwrap_extended(self) -> Self {
        match self {
            Self::Extended { value, .. } => Self::Value(value),
            other => other,
        }
    }
}

/// One destination's slot in a [`ResponseSet`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEntry {
    /// The decoded response, absent if none arrived
    pub response: Option<Response>,
    /// A reply arrived from the destination
    pub received: bool,
    /// The transport suspects the destination is unreachable
    pub suspected: bool,
}

impl ResponseEntry {
    /// Entry for a reply that arrived
    pub fn received(response: Response) -> Self {
        Self {
            response: Some(response),
            received: true,
            suspected: false,
        }
    }

    /// Entry for a destination the transport reported as unreachable
    pub fn suspected() -> Self {
        Self {
            response: None,
            received: false,
            suspected: true,
        }
    }

    fn is_null(&self) -> bool {
        self.received && !self.suspected && self.response.as_ref().is_some_and(Response::is_null)
    }
}

/// Per-destination results of one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSet {
    entries: HashMap<NodeAddress, ResponseEntry>,
}

impl ResponseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Set holding a single received response
    pub fn single(address: NodeAddress, response: Response) -> Self {
        let mut set = Self::with_capacity(1);
        set.insert(address, ResponseEntry::received(response));
        set
    }

    /// Insert or overwrite the entry for `address`
    pub fn insert(&mut self, address: NodeAddress, entry: ResponseEntry) -> Option<ResponseEntry> {
        self.entries.insert(address, entry)
    }

    pub fn get(&self, address: &str) -> Option<&ResponseEntry> {
        self.entries.get(address)
    }

    /// Shortcut to the response recorded for `address`
    pub fn response(&self, address: &str) -> Option<&Response> {
        self.entries.get(address).and_then(|e| e.response.as_ref())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, NodeAddress, ResponseEntry> {
        self.entries.iter()
    }

    /// Destinations in the set, sorted for stable output
    pub fn addresses(&self) -> Vec<NodeAddress> {
        let mut addrs: Vec<_> = self.entries.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// True when every member answered and every answer was `Value(None)`.
    ///
    /// A suspected or silent member means the set is not "only nulls".
    pub fn contains_only_nulls(&self) -> bool {
        self.entries.values().all(ResponseEntry::is_null)
    }

    /// Destinations whose response is `Ignored`
    pub fn ignoring(&self) -> Vec<NodeAddress> {
        let mut addrs: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.response.as_ref().is_some_and(Response::is_ignored))
            .map(|(a, _)| a.clone())
            .collect();
        addrs.sort();
        addrs
    }

    /// Unwrap every `Extended` response in place.
    ///
    /// Returns true if any of them asked for ignored requests to be replayed.
    pub fn unwrap_extended(&mut self) -> bool {
        let mut replay = false;
        for entry in self.entries.values_mut() {
            if let Some(response) = entry.response.take() {
                replay |= response.requests_replay();
                entry.response = Some(response.unwrap_extended());
            }
        }
        replay
    }

    /// Overwrite entries with those of `other`.
    pub fn merge(&mut self, other: ResponseSet) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for ResponseSet {
    type Item = (NodeAddress, ResponseEntry);
    type IntoIter = hash_map::IntoIter<NodeAddress, ResponseEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(NodeAddress, ResponseEntry)> for ResponseSet {
    fn from_iter<I: IntoIterator<Item = (NodeAddress, ResponseEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
