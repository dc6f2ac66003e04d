//! Protocol extension points.
//!
//! A protocol plugs into the substrate by naming four types in a [`Protocol`]
//! bundle: its node type, its closed message enum, its task enum and the
//! topology layer it builds on. Delivery is double dispatch: the network pops
//! an event and calls [`Message::action`] with itself, the sender and the
//! receiver, and the protocol matches on its own variants.

use crate::node::SimNode;
use crate::task::Task;
use crate::{Network, NodeId, SimResult};
use std::fmt::Debug;

/// Type bundle describing one protocol
pub trait Protocol: Sized + 'static {
    type Node: SimNode;
    type Message: Message<Self>;
    type Task: Task<Self>;
    type Topology: Topology;
}

/// Protocol message, immutable once built and shared across fan-out sends
pub trait Message<P: Protocol>: Debug + Clone {
    /// Size in bytes, accounted on both ends of the link
    fn size(&self) -> u64 {
        1
    }

    /// Executed on delivery at the receiver
    fn action(&self, network: &mut Network<P>, from: NodeId, to: NodeId) -> SimResult<()>;
}

/// Layer-specific state living next to the node registry
pub trait Topology {
    /// Called once per added node, with ids in increasing order
    fn node_added(&mut self, _id: NodeId) {}
}

/// Plain network without overlay or block state
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTopology;

impl Topology for NoTopology {}
