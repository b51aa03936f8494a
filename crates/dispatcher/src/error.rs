//! Dispatcher error types

use std::time::Duration;

use contracts::{ContractError, NodeAddress, ReplyFault, RemoteFailure};
use thiserror::Error;

/// Errors a replication round can end with
#[derive(Debug, Error)]
pub enum RpcError {
    /// The command could not be encoded; nothing was sent
    #[error("failed to marshal {command}: {source}")]
    Serialization {
        command: &'static str,
        #[source]
        source: ContractError,
    },

    /// A reply could not be decoded
    #[error(
        "unreadable response to {command}, most often caused by {command} or its result \
         not being marshallable on one side: {message}"
    )]
    Deserialization {
        command: &'static str,
        message: String,
    },

    /// Required replies did not arrive before the deadline
    #[error("timed out after {waited_ms}ms waiting for responses from {missing:?}")]
    Timeout {
        waited_ms: u64,
        missing: Vec<NodeAddress>,
    },

    /// A filtered round heard from everyone without accepting anything
    #[error(
        "no acceptable response from any of {destinations:?} ({} remote errors captured)",
        .errors.len()
    )]
    NoAcceptableResponse {
        destinations: Vec<NodeAddress>,
        errors: Vec<(NodeAddress, ReplyFault)>,
    },

    /// Every destination failed to execute the command
    #[error("command failed on every destination: {failures:?}")]
    RemoteExecution {
        failures: Vec<(NodeAddress, RemoteFailure)>,
    },

    /// The transport refused the send
    #[error("transport failure: {0}")]
    Transport(#[source] ContractError),

    /// The round's parameters do not form a legal combination
    #[error("invalid round: {message}")]
    InvalidRound { message: String },

    /// The engine was shut down
    #[error("dispatch engine is shut down")]
    ShutDown,

    /// The background queue is full; the round was dropped
    #[error("replication queue full (capacity {capacity}), round for {command} dropped")]
    QueueFull {
        capacity: usize,
        command: &'static str,
    },
}

impl RpcError {
    /// Create a timeout error
    pub fn timeout(waited: Duration, mut missing: Vec<NodeAddress>) -> Self {
        missing.sort();
        Self::Timeout {
            waited_ms: waited.as_millis() as u64,
            missing,
        }
    }

    /// Create an invalid-round error
    pub fn invalid_round(message: impl Into<String>) -> Self {
        Self::InvalidRound {
            message: message.into(),
        }
    }

    /// Create a deserialization error attributed to `command`
    pub fn deserialization(command: &'static str, message: impl Into<String>) -> Self {
        Self::Deserialization {
            command,
            message: message.into(),
        }
    }

    /// Whether this is a deadline failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// First remote error captured by a filtered round, if any
    pub fn first_remote_error(&self) -> Option<&(NodeAddress, ReplyFault)> {
        match self {
            Self::NoAcceptableResponse { errors, .. } => errors.first(),
            _ => None,
        }
    }

    /// Label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Serialization { .. } => "serialization",
            Self::Deserialization { .. } => "deserialization",
            Self::Timeout { .. } => "timeout",
            Self::NoAcceptableResponse { .. } => "no_acceptable_response",
            Self::RemoteExecution { .. } => "remote_execution",
            Self::Transport(_) => "transport",
            Self::InvalidRound { .. } => "invalid_round",
            Self::ShutDown => "shut_down",
            Self::QueueFull { .. } => "queue_full",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_names_missing_sorted() {
        let err = RpcError::timeout(
            Duration::from_millis(250),
            vec!["node-c".into(), "node-a".into()],
        );
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "timed out after 250ms waiting for responses from [\"node-a\", \"node-c\"]"
        );
    }

    #[test]
    fn test_no_acceptable_exposes_first_error() {
        let err = RpcError::NoAcceptableResponse {
            destinations: vec!["a".into(), "b".into()],
            errors: vec![
                ("b".into(), ReplyFault::Timeout),
                ("a".into(), ReplyFault::Failed("boom".into())),
            ],
        };
        let (source, fault) = err.first_remote_error().unwrap();
        assert_eq!(source, "b");
        assert_eq!(fault, &ReplyFault::Timeout);
        assert_eq!(err.kind(), "no_acceptable_response");
    }
}
