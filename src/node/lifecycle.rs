//! Node lifecycle state machine.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Lifecycle of a node, driven by its actor thread only.
///
/// `Created -> TransportStarting -> TransportReady -> JoiningNetwork -> Joined`
pub enum NodeState {
    Created,
    TransportStarting,
    /// The transport emitted its ready event; bootstrap starts right after.
    TransportReady,
    /// Connecting to seeds.
    JoiningNetwork,
    /// Every seed connection settled, successfully or not.
    Joined,
}

impl NodeState {
    /// The state following this one, `None` once [NodeState::Joined].
    pub fn next(self) -> Option<NodeState> {
        match self {
            NodeState::Created => Some(NodeState::TransportStarting),
            NodeState::TransportStarting => Some(NodeState::TransportReady),
            NodeState::TransportReady => Some(NodeState::JoiningNetwork),
            NodeState::JoiningNetwork => Some(NodeState::Joined),
            NodeState::Joined => None,
        }
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Created => "created",
            NodeState::TransportStarting => "transport-starting",
            NodeState::TransportReady => "transport-ready",
            NodeState::JoiningNetwork => "joining-network",
            NodeState::Joined => "joined",
        };

        f.write_str(name)
    }
}

#[derive(Debug)]
/// Owns the current [NodeState] and only allows forward, single step transitions.
pub struct Lifecycle {
    state: NodeState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle {
            state: NodeState::Created,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Move to `to` if it directly follows the current state.
    ///
    /// Returns `false` and stays put otherwise.
    pub fn advance(&mut self, to: NodeState) -> bool {
        if self.state.next() != Some(to) {
            tracing::trace!(from = %self.state, %to, "Ignored lifecycle transition");
            return false;
        }

        tracing::debug!(from = %self.state, %to, "Lifecycle transition");
        self.state = to;

        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn forward_only() {
        let mut lifecycle = Lifecycle::new();

        assert!(!lifecycle.advance(NodeState::TransportReady));
        assert_eq!(lifecycle.state(), NodeState::Created);

        for state in [
            NodeState::TransportStarting,
            NodeState::TransportReady,
            NodeState::JoiningNetwork,
            NodeState::Joined,
        ] {
            assert!(lifecycle.advance(state));
        }

        assert_eq!(lifecycle.state(), NodeState::Joined);
        assert!(!lifecycle.advance(NodeState::Created));
        assert_eq!(NodeState::Joined.next(), None);
    }

    #[test]
    fn display() {
        assert_eq!(NodeState::JoiningNetwork.to_string(), "joining-network");
    }
}
