//! Delivery and routing modes
//!
//! `DeliveryMode` decides whether and how a round waits; `RoutingMode` decides
//! how the bytes leave this node. The two are orthogonal.

use serde::{Deserialize, Serialize};

/// How a round collects answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Send and return immediately; no answers are collected
    FireAndForget,
    /// Return as soon as a response filter is satisfied
    WaitForFirstAcceptable,
    /// Wait until every destination has answered
    #[default]
    WaitForAll,
}

impl DeliveryMode {
    /// Whether the caller waits for replies
    pub fn awaits_replies(&self) -> bool {
        !matches!(self, Self::FireAndForget)
    }

    /// Short label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FireAndForget => "fire_and_forget",
            Self::WaitForFirstAcceptable => "wait_for_first_acceptable",
            Self::WaitForAll => "wait_for_all",
        }
    }
}

/// How a round's message is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One group message, many recipients
    Broadcast,
    /// One independent message per recipient
    PerTargetUnicast,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::PerTargetUnicast => "unicast",
        }
    }
}

/// Per-message flags handed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Routing used for this message
    pub routing: RoutingMode,
    /// Deliver out-of-band, bypassing per-sender ordering
    pub oob: bool,
    /// Do not batch this message with others
    pub dont_bundle: bool,
    /// Bypass transport flow control
    pub no_flow_control: bool,
}

impl SendOptions {
    /// Options for a round in `mode` routed with `routing`.
    ///
    /// Anything that waits for replies skips bundling and flow control.
    pub fn for_round(mode: DeliveryMode, routing: RoutingMode, oob: bool) -> Self {
        let awaiting = mode.awaits_replies();
        Self {
            routing,
            oob,
            dont_bundle: awaiting,
            no_flow_control: awaiting,
        }
    }

    /// Same options with a different routing
    pub fn with_routing(mut self, routing: RoutingMode) -> Self {
        self.routing = routing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_rounds_keep_bundling() {
        let opts = SendOptions::for_round(
            DeliveryMode::FireAndForget,
            RoutingMode::PerTargetUnicast,
            true,
        );
        assert!(opts.oob);
        assert!(!opts.dont_bundle);
        assert!(!opts.no_flow_control);
    }

    #[test]
    fn test_sync_rounds_skip_bundling() {
        let opts = SendOptions::for_round(DeliveryMode::WaitForAll, RoutingMode::Broadcast, false);
        assert!(opts.dont_bundle);
        assert!(opts.no_flow_control);
        assert!(!opts.oob);
    }

    #[test]
    fn test_delivery_mode_serde() {
        let mode: DeliveryMode = serde_json::from_str("\"wait_for_first_acceptable\"").unwrap();
        assert_eq!(mode, DeliveryMode::WaitForFirstAcceptable);
    }
}
