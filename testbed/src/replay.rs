//! Observable state for determinism checks.
//!
//! Two networks built from the same parameters and seed, advanced by the same
//! `run_ms` calls, must produce identical snapshots at every step.

use crate::node::SimNode;
use crate::{Network, NetworkStats, NodeId, Protocol, SimResult, Time};
use serde::{Deserialize, Serialize};

/// Per-node observable state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub down: bool,
    pub done_at: Time,
    pub msg_sent: u64,
    pub msg_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Protocol state digest from [`SimNode::state_digest`]
    pub state: u64,
}

impl NodeSnapshot {
    pub fn of(node: &impl SimNode) -> Self {
        let core = node.core();
        Self {
            id: core.id(),
            down: core.is_down(),
            done_at: core.done_at(),
            msg_sent: core.msg_sent(),
            msg_received: core.msg_received(),
            bytes_sent: core.bytes_sent(),
            bytes_received: core.bytes_received(),
            state: node.state_digest(),
        }
    }
}

/// Whole-network observable state at one virtual time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkSnapshot {
    pub time: Time,
    pub stats: NetworkStats,
    pub nodes: Vec<NodeSnapshot>,
}

impl NetworkSnapshot {
    /// First node whose state differs from `other`, by position
    pub fn first_divergent_node(&self, other: &NetworkSnapshot) -> Option<NodeId> {
        let common = self.nodes.len().min(other.nodes.len());
        self.nodes
            .iter()
            .zip(&other.nodes)
            .find(|(a, b)| a != b)
            .map(|(a, _)| a.id)
            .or_else(|| {
                (self.nodes.len() != other.nodes.len()).then_some(common as NodeId)
            })
    }

    pub fn done_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.done_at > 0).count()
    }
}

/// A simulation that can be rebuilt from its construction parameters.
///
/// `copy` must not clone state: it builds a fresh instance with the same
/// parameters and seed, which is what makes lock-step comparison meaningful.
pub trait Replayable: Sized {
    fn copy(&self) -> Self;

    fn run_ms(&mut self, ms: Time) -> SimResult<()>;

    fn snapshot(&self) -> NetworkSnapshot;
}

impl<P: Protocol> Network<P> {
    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            time: self.time(),
            stats: self.stats().clone(),
            nodes: self.all_nodes().iter().map(NodeSnapshot::of).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Location;
    use crate::NodeCore;

    fn node(id: NodeId, sent: u64) -> NodeSnapshot {
        let mut core = NodeCore::new(Location { x: 1, y: 1, region: None }, false);
        core.id = id;
        core.msg_sent = sent;
        NodeSnapshot::of(&core)
    }

    fn snapshot(nodes: Vec<NodeSnapshot>) -> NetworkSnapshot {
        NetworkSnapshot {
            time: 10,
            stats: NetworkStats::default(),
            nodes,
        }
    }

    #[test]
    fn test_identical_snapshots_do_not_diverge() {
        let a = snapshot(vec![node(0, 1), node(1, 2)]);
        assert_eq!(a.first_divergent_node(&a.clone()), None);
    }

    #[test]
    fn test_first_divergent_node() {
        let a = snapshot(vec![node(0, 1), node(1, 2), node(2, 3)]);
        let b = snapshot(vec![node(0, 1), node(1, 5), node(2, 4)]);
        assert_eq!(a.first_divergent_node(&b), Some(1));

        let shorter = snapshot(vec![node(0, 1)]);
        assert_eq!(a.first_divergent_node(&shorter), Some(1));
    }

    #[test]
    fn test_snapshot_serializes() {
        let a = snapshot(vec![node(0, 1)]);
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"msg_sent\":1"));
    }
}
