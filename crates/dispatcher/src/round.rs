//! ReplicationRound - everything one dispatch call needs
//!
//! A round is built by the caller, consumed by exactly one `dispatch` call and
//! never shared. Illegal mode combinations are rejected in [`ReplicationRound::validate`]
//! before anything is serialized.

use std::fmt;
use std::time::Duration;

use contracts::{DeliveryMode, NodeAddress, ReplicableCommand, ResponseFilter, RoutingMode};

use crate::error::RpcError;

/// One command, its destinations, and how to collect the answers
pub struct ReplicationRound<C> {
    command: C,
    destinations: Vec<NodeAddress>,
    mode: DeliveryMode,
    force_broadcast: bool,
    filter: Option<Box<dyn ResponseFilter>>,
    timeout: Option<Duration>,
    replay_eligible: bool,
}

impl<C: ReplicableCommand> ReplicationRound<C> {
    /// Create a round. Duplicate destinations are collapsed.
    pub fn new(
        command: C,
        destinations: impl IntoIterator<Item = NodeAddress>,
        mode: DeliveryMode,
    ) -> Self {
        let mut destinations: Vec<NodeAddress> = destinations.into_iter().collect();
        destinations.sort();
        destinations.dedup();
        Self {
            command,
            destinations,
            mode,
            force_broadcast: false,
            filter: None,
            timeout: None,
            replay_eligible: false,
        }
    }

    /// Fire-and-forget round
    pub fn fire_and_forget(command: C, destinations: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self::new(command, destinations, DeliveryMode::FireAndForget)
    }

    /// Round that waits for every destination
    pub fn wait_for_all(command: C, destinations: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self::new(command, destinations, DeliveryMode::WaitForAll)
    }

    /// Round that returns the first reply `filter` accepts
    pub fn first_acceptable(
        command: C,
        destinations: impl IntoIterator<Item = NodeAddress>,
        filter: impl ResponseFilter + 'static,
    ) -> Self {
        Self::new(command, destinations, DeliveryMode::WaitForFirstAcceptable).with_filter(filter)
    }

    /// Attach a response filter
    pub fn with_filter(mut self, filter: impl ResponseFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Override the engine's default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send as one group message regardless of the routing heuristics
    pub fn force_broadcast(mut self) -> Self {
        self.force_broadcast = true;
        self
    }

    /// Allow replaying the command to members that ignored it
    pub fn with_replay(mut self) -> Self {
        self.replay_eligible = true;
        self
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn destinations(&self) -> &[NodeAddress] {
        &self.destinations
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Replay only applies to rounds that wait for everyone.
    pub fn replay_eligible(&self) -> bool {
        self.replay_eligible && self.mode == DeliveryMode::WaitForAll
    }

    /// Reject combinations that cannot be executed.
    ///
    /// # Errors
    /// `RpcError::InvalidRound` describing the first violated rule
    pub fn validate(&self) -> Result<(), RpcError> {
        match (self.mode, self.filter.is_some()) {
            (DeliveryMode::WaitForFirstAcceptable, false) => {
                return Err(RpcError::invalid_round(
                    "wait-for-first-acceptable requires a response filter",
                ));
            }
            (DeliveryMode::FireAndForget | DeliveryMode::WaitForAll, true) => {
                return Err(RpcError::invalid_round(format!(
                    "response filter is only valid with wait-for-first-acceptable, not {}",
                    self.mode.as_str()
                )));
            }
            _ => {}
        }

        if self.mode == DeliveryMode::WaitForFirstAcceptable && self.force_broadcast {
            return Err(RpcError::invalid_round(
                "filtered rounds evaluate replies per target and cannot be broadcast",
            ));
        }

        if self.replay_eligible && !self.command.is_idempotent() {
            return Err(RpcError::invalid_round(format!(
                "replay requested for non-idempotent command {}",
                self.command.type_name()
            )));
        }

        if self.mode.awaits_replies() && self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(RpcError::invalid_round("timeout must be positive"));
        }

        Ok(())
    }

    /// Routing for this round.
    ///
    /// Filtered rounds always use parallel unicasts so each reply can be judged
    /// on its own. Otherwise an explicit or configured broadcast wins, and an
    /// unfiltered wait-for-all round without replay is sent as one group message.
    pub fn routing(&self, force_multicast: bool) -> RoutingMode {
        if self.filter.is_some() {
            return RoutingMode::PerTargetUnicast;
        }
        if self.force_broadcast || force_multicast {
            return RoutingMode::Broadcast;
        }
        if self.mode == DeliveryMode::WaitForAll && !self.replay_eligible() {
            RoutingMode::Broadcast
        } else {
            RoutingMode::PerTargetUnicast
        }
    }

    /// Remove `local` from the destinations; never send to ourselves.
    pub(crate) fn exclude(&mut self, local: &NodeAddress) -> bool {
        let before = self.destinations.len();
        self.destinations.retain(|d| d != local);
        before != self.destinations.len()
    }

    /// Split the round for execution, resolving its routing.
    pub(crate) fn into_parts(self, force_multicast: bool) -> RoundParts<C> {
        let routing = self.routing(force_multicast);
        let replay_eligible = self.replay_eligible();
        RoundParts {
            command: self.command,
            destinations: self.destinations,
            mode: self.mode,
            routing,
            filter: self.filter,
            timeout: self.timeout,
            replay_eligible,
        }
    }
}

/// A validated round taken apart so its pieces can move independently.
pub(crate) struct RoundParts<C> {
    pub command: C,
    pub destinations: Vec<NodeAddress>,
    pub mode: DeliveryMode,
    pub routing: RoutingMode,
    pub filter: Option<Box<dyn ResponseFilter>>,
    pub timeout: Option<Duration>,
    pub replay_eligible: bool,
}

impl<C: fmt::Debug> fmt::Debug for ReplicationRound<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationRound")
            .field("command", &self.command)
            .field("destinations", &self.destinations)
            .field("mode", &self.mode)
            .field("force_broadcast", &self.force_broadcast)
            .field("filtered", &self.filter.is_some())
            .field("timeout", &self.timeout)
            .field("replay_eligible", &self.replay_eligible)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::FirstValidResponse;

    #[derive(Debug)]
    struct Put {
        idempotent: bool,
    }

    impl ReplicableCommand for Put {
        fn command_id(&self) -> u8 {
            1
        }

        fn type_name(&self) -> &'static str {
            "Put"
        }

        fn is_idempotent(&self) -> bool {
            self.idempotent
        }
    }

    fn nodes(names: &[&str]) -> Vec<NodeAddress> {
        names.iter().map(|n| NodeAddress::from(*n)).collect()
    }

    #[test]
    fn test_destinations_deduplicated() {
        let round =
            ReplicationRound::wait_for_all(Put { idempotent: true }, nodes(&["b", "a", "b"]));
        assert_eq!(round.destinations(), &nodes(&["a", "b"])[..]);
    }

    #[test]
    fn test_first_acceptable_without_filter_rejected() {
        let round = ReplicationRound::new(
            Put { idempotent: true },
            nodes(&["a"]),
            DeliveryMode::WaitForFirstAcceptable,
        );
        assert!(matches!(
            round.validate(),
            Err(RpcError::InvalidRound { .. })
        ));
    }

    #[test]
    fn test_filter_with_wait_for_all_rejected() {
        let round = ReplicationRound::wait_for_all(Put { idempotent: true }, nodes(&["a"]))
            .with_filter(FirstValidResponse::new());
        assert!(round.validate().is_err());
    }

    #[test]
    fn test_filtered_broadcast_rejected() {
        let round = ReplicationRound::first_acceptable(
            Put { idempotent: true },
            nodes(&["a"]),
            FirstValidResponse::new(),
        )
        .force_broadcast();
        assert!(round.validate().is_err());
    }

    #[test]
    fn test_replay_requires_idempotent_command() {
        let round =
            ReplicationRound::wait_for_all(Put { idempotent: false }, nodes(&["a"])).with_replay();
        let err = round.validate().unwrap_err();
        assert!(err.to_string().contains("non-idempotent command Put"));

        let ok = ReplicationRound::wait_for_all(Put { idempotent: true }, nodes(&["a"])).with_replay();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let round = ReplicationRound::wait_for_all(Put { idempotent: true }, nodes(&["a"]))
            .with_timeout(Duration::ZERO);
        assert!(round.validate().is_err());

        let async_round = ReplicationRound::fire_and_forget(Put { idempotent: true }, nodes(&["a"]))
            .with_timeout(Duration::ZERO);
        assert!(async_round.validate().is_ok());
    }

    #[test]
    fn test_routing_selection() {
        let put = || Put { idempotent: true };

        let sync_all = ReplicationRound::wait_for_all(put(), nodes(&["a", "b"]));
        assert_eq!(sync_all.routing(false), RoutingMode::Broadcast);

        let with_replay = ReplicationRound::wait_for_all(put(), nodes(&["a", "b"])).with_replay();
        assert_eq!(with_replay.routing(false), RoutingMode::PerTargetUnicast);
        assert_eq!(with_replay.routing(true), RoutingMode::Broadcast);

        let async_round = ReplicationRound::fire_and_forget(put(), nodes(&["a", "b"]));
        assert_eq!(async_round.routing(false), RoutingMode::PerTargetUnicast);
        assert_eq!(
            ReplicationRound::fire_and_forget(put(), nodes(&["a"]))
                .force_broadcast()
                .routing(false),
            RoutingMode::Broadcast
        );

        let filtered =
            ReplicationRound::first_acceptable(put(), nodes(&["a", "b"]), FirstValidResponse::new());
        assert_eq!(filtered.routing(true), RoutingMode::PerTargetUnicast);
    }

    #[test]
    fn test_exclude_local() {
        let mut round = ReplicationRound::wait_for_all(Put { idempotent: true }, nodes(&["a", "self"]));
        assert!(round.exclude(&"self".into()));
        assert!(!round.exclude(&"self".into()));
        assert_eq!(round.destinations(), &nodes(&["a"])[..]);
    }
}
