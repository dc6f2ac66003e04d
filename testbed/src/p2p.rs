//! # Peer-to-Peer Layer
//!
//! Overlay adjacency and flood de-duplication on top of the base network.
//! Protocols select this layer with `type Topology = PeerTopology`, which
//! unlocks the peer operations on [`Network`].
//!
//! ## Key Features
//!
//! - **Symmetric adjacency** kept in insertion order so every walk over a
//!   node's peers is deterministic
//! - **Disconnect keeps links**: a down node is still listed by its peers,
//!   only traffic to it is dropped
//! - **Flooding**: a node forwards a given message id once, on first receipt,
//!   after a local delay and with a per-peer stagger

use crate::clock::time_after;
use crate::latency::LatencyEstimate;
use crate::message::Topology;
use crate::node::SimNode;
use crate::{Network, NodeId, Protocol, SimError, SimResult, SimRng, Time};
use bitvec::vec::BitVec;
use indexmap::IndexSet;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// Parameters of the initial overlay built by [`Network::set_peers`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct P2PConfig {
    /// Target degree
    pub connection_count: usize,
    /// When true every node ends with at least `connection_count` peers;
    /// otherwise `connection_count` is the average degree
    pub minimum: bool,
}

impl P2PConfig {
    pub fn new(connection_count: usize, minimum: bool) -> Self {
        Self {
            connection_count,
            minimum,
        }
    }

    pub fn validate(&self, node_count: usize) -> SimResult<()> {
        if self.connection_count == 0 || self.connection_count >= node_count {
            return Err(SimError::InvalidParameter(format!(
                "connection count {} must be in 1..{}",
                self.connection_count, node_count
            )));
        }
        Ok(())
    }
}

/// Flooding parameters carried by a gossip message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FloodHeader {
    /// Dedup key; distinct floods must use distinct ids
    pub msg_id: u64,
    /// Processing time before a node forwards
    pub local_delay: Time,
    /// Extra delay between two consecutive peers of the fan-out
    pub delay_between_peers: Time,
}

impl FloodHeader {
    pub fn new(msg_id: u64) -> Self {
        Self {
            msg_id,
            local_delay: 0,
            delay_between_peers: 0,
        }
    }

    pub fn with_local_delay(mut self, local_delay: Time) -> Self {
        self.local_delay = local_delay;
        self
    }

    pub fn with_delay_between_peers(mut self, delay_between_peers: Time) -> Self {
        self.delay_between_peers = delay_between_peers;
        self
    }
}

/// Adjacency lists plus the per-message seen ledger
#[derive(Debug, Clone, Default)]
pub struct PeerTopology {
    peers: Vec<IndexSet<NodeId>>,
    seen: HashMap<u64, BitVec>,
}

impl PeerTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self, id: NodeId) -> Option<&IndexSet<NodeId>> {
        self.peers.get(id as usize)
    }

    pub fn are_linked(&self, a: NodeId, b: NodeId) -> bool {
        self.peers(a).is_some_and(|set| set.contains(&b))
    }

    /// Number of undirected links
    pub fn link_count(&self) -> usize {
        self.peers.iter().map(IndexSet::len).sum::<usize>() / 2
    }

    pub fn average_degree(&self) -> f64 {
        if self.peers.is_empty() {
            return 0.0;
        }
        (self.link_count() * 2) as f64 / self.peers.len() as f64
    }

    pub fn min_degree(&self) -> usize {
        self.peers.iter().map(IndexSet::len).min().unwrap_or(0)
    }

    /// True if `node` already received the flood `msg_id`
    pub fn has_seen(&self, msg_id: u64, node: NodeId) -> bool {
        self.seen
            .get(&msg_id)
            .and_then(|bits| bits.get(node as usize).map(|bit| *bit))
            .unwrap_or(false)
    }

    fn mark_seen(&mut self, msg_id: u64, node: NodeId) {
        let width = self.peers.len();
        let bits = self
            .seen
            .entry(msg_id)
            .or_insert_with(|| BitVec::repeat(false, width));
        if bits.len() < width {
            bits.resize(width, false);
        }
        bits.set(node as usize, true);
    }

    fn link(&mut self, a: NodeId, b: NodeId) -> bool {
        let added = self.peers[a as usize].insert(b);
        self.peers[b as usize].insert(a);
        added
    }

    fn unlink(&mut self, a: NodeId, b: NodeId) -> bool {
        let removed = self.peers[a as usize].shift_remove(&b);
        self.peers[b as usize].shift_remove(&a);
        removed
    }
}

impl Topology for PeerTopology {
    fn node_added(&mut self, id: NodeId) {
        debug_assert_eq!(id as usize, self.peers.len());
        self.peers.push(IndexSet::new());
    }
}

impl<P> Network<P>
where
    P: Protocol<Topology = PeerTopology>,
{
    /// Build the initial overlay, drawing candidates from the network generator
    pub fn set_peers(&mut self, config: P2PConfig) -> SimResult<()> {
        let n = self.node_count();
        config.validate(n)?;

        if config.minimum {
            for id in 0..n as NodeId {
                while self.topology.peers[id as usize].len() < config.connection_count {
                    self.link_random_peer(id);
                }
            }
        } else {
            let target = n * config.connection_count / 2;
            while self.topology.link_count() < target {
                let open: Vec<NodeId> = (0..n as NodeId)
                    .filter(|id| self.topology.peers[*id as usize].len() < n - 1)
                    .collect();
                let Some(&id) = open.choose(&mut self.rng) else {
                    break;
                };
                self.link_random_peer(id);
            }
        }

        debug!(
            nodes = n,
            links = self.topology.link_count(),
            min_degree = self.topology.min_degree(),
            "Peers set"
        );
        Ok(())
    }

    fn link_random_peer(&mut self, id: NodeId) {
        let candidates: Vec<NodeId> = (0..self.node_count() as NodeId)
            .filter(|other| *other != id && !self.topology.are_linked(id, *other))
            .collect();
        if let Some(&other) = candidates.choose(&mut self.rng) {
            self.topology.link(id, other);
        }
    }

    /// Add a symmetric link; returns false if it already existed
    pub fn create_link(&mut self, a: NodeId, b: NodeId) -> SimResult<bool> {
        self.check_pair(a, b)?;
        Ok(self.topology.link(a, b))
    }

    /// Remove a symmetric link; returns false if there was none
    pub fn remove_link(&mut self, a: NodeId, b: NodeId) -> SimResult<bool> {
        self.check_pair(a, b)?;
        Ok(self.topology.unlink(a, b))
    }

    fn check_pair(&self, a: NodeId, b: NodeId) -> SimResult<()> {
        self.node(a)?;
        self.node(b)?;
        if a == b {
            return Err(SimError::InvalidParameter(format!(
                "node {} cannot link to itself",
                a
            )));
        }
        Ok(())
    }

    /// Take a node down without touching its adjacency
    pub fn disconnect(&mut self, id: NodeId) -> SimResult<()> {
        self.set_down(id, true)
    }

    pub fn peers(&self, id: NodeId) -> SimResult<&IndexSet<NodeId>> {
        self.topology.peers(id).ok_or(SimError::UnknownNode(id))
    }

    /// Start a flood at `origin`: marks it as seen there and forwards to all peers
    pub fn flood(&mut self, message: P::Message, header: FloodHeader, origin: NodeId) -> SimResult<()> {
        self.forward_flood(Rc::new(message), &header, origin, None)
            .map(|_| ())
    }

    /// Handle a flood delivery at `to`.
    ///
    /// Returns true on first receipt, after scheduling the forward to every
    /// peer except `from`. Duplicates return false and send nothing.
    pub fn receive_flood(
        &mut self,
        message: &P::Message,
        header: &FloodHeader,
        from: NodeId,
        to: NodeId,
    ) -> SimResult<bool> {
        self.forward_flood(Rc::new(message.clone()), header, to, Some(from))
    }

    fn forward_flood(
        &mut self,
        message: Rc<P::Message>,
        header: &FloodHeader,
        at: NodeId,
        from: Option<NodeId>,
    ) -> SimResult<bool> {
        self.node(at)?;
        if self.topology.has_seen(header.msg_id, at) {
            trace!(msg_id = header.msg_id, node = at, "Duplicate flood ignored");
            return Ok(false);
        }
        let mut destinations: Vec<NodeId> = self
            .peers(at)?
            .iter()
            .copied()
            .filter(|peer| Some(*peer) != from)
            .collect();
        let origin_time = time_after(self.time(), header.local_delay)?;
        let last_stagger = (destinations.len().saturating_sub(1) as Time)
            .checked_mul(header.delay_between_peers)
            .ok_or_else(|| {
                SimError::InvalidParameter(format!(
                    "flood stagger of {}ms overflows virtual time",
                    header.delay_between_peers
                ))
            })?;
        time_after(origin_time, last_stagger)?;
        self.topology.mark_seen(header.msg_id, at);

        if header.delay_between_peers == 0 {
            self.send_shared(message, origin_time, at, &destinations)?;
        } else {
            destinations.shuffle(&mut self.rng);
            for (index, peer) in destinations.into_iter().enumerate() {
                let stagger = header.delay_between_peers * index as Time;
                self.send_shared(Rc::clone(&message), origin_time + stagger, at, &[peer])?;
            }
        }
        Ok(true)
    }

    /// Sample random links with a caller-provided scratch generator
    pub fn estimate_p2p_latency(&self, samples: usize, scratch: &mut SimRng) -> Option<LatencyEstimate> {
        let linked: Vec<NodeId> = (0..self.node_count() as NodeId)
            .filter(|id| !self.topology.peers[*id as usize].is_empty())
            .collect();
        if linked.is_empty() {
            return None;
        }
        let delays: Vec<Time> = (0..samples)
            .filter_map(|_| {
                let a = *linked.choose(&mut *scratch)?;
                let peers = &self.topology.peers[a as usize];
                let b = *peers.get_index(scratch.gen_range(0..peers.len()))?;
                let (a, b) = (self.nodes[a as usize].core(), self.nodes[b as usize].core());
                Some(self.latency().delay(a, b, scratch))
            })
            .collect();
        LatencyEstimate::from_samples(delays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::NoLatency;
    use crate::node::RandomPositionBuilder;
    use crate::{Message, NoTask, NodeCore, SimConfig};

    #[derive(Debug, Clone)]
    struct Gossip(FloodHeader);

    struct GossipProtocol;

    impl Protocol for GossipProtocol {
        type Node = NodeCore;
        type Message = Gossip;
        type Task = NoTask;
        type Topology = PeerTopology;
    }

    impl Message<GossipProtocol> for Gossip {
        fn action(&self, net: &mut Network<GossipProtocol>, from: NodeId, to: NodeId) -> SimResult<()> {
            if net.receive_flood(self, &self.0, from, to)? {
                net.mark_done(to)?;
            }
            Ok(())
        }
    }

    fn network(n: usize, seed: u64) -> Network<GossipProtocol> {
        let mut net = Network::new(SimConfig::new().with_seed(seed), NoLatency, PeerTopology::new());
        for _ in 0..n {
            let core = net.create_node(&RandomPositionBuilder, false);
            net.add_node(core).unwrap();
        }
        net
    }

    #[test]
    fn test_links_are_symmetric() {
        let mut net = network(3, 1);
        assert!(net.create_link(0, 1).unwrap());
        assert!(!net.create_link(1, 0).unwrap());
        assert!(net.peers(1).unwrap().contains(&0));
        assert!(net.remove_link(1, 0).unwrap());
        assert!(net.peers(0).unwrap().is_empty());
        assert!(net.create_link(2, 2).is_err());
        assert!(matches!(net.create_link(0, 9), Err(SimError::UnknownNode(9))));
    }

    #[test]
    fn test_set_peers_minimum_degree() {
        let mut net = network(20, 4);
        net.set_peers(P2PConfig::new(3, true)).unwrap();
        assert!(net.topology().min_degree() >= 3);
    }

    #[test]
    fn test_set_peers_average_degree() {
        let mut net = network(20, 4);
        net.set_peers(P2PConfig::new(4, false)).unwrap();
        assert_eq!(net.topology().link_count(), 40);
    }

    #[test]
    fn test_set_peers_rejects_impossible_degree() {
        let mut net = network(4, 4);
        assert!(net.set_peers(P2PConfig::new(4, true)).is_err());
    }

    #[test]
    fn test_disconnect_keeps_adjacency() {
        let mut net = network(3, 2);
        net.create_link(0, 1).unwrap();
        net.disconnect(1).unwrap();
        assert!(net.node(1).unwrap().is_down());
        assert!(net.peers(0).unwrap().contains(&1));
    }

    #[test]
    fn test_flood_is_forwarded_once() {
        let mut net = network(3, 2);
        net.create_link(0, 1).unwrap();
        net.create_link(1, 2).unwrap();
        net.create_link(0, 2).unwrap();
        net.flood(Gossip(FloodHeader::new(1)), FloodHeader::new(1), 0).unwrap();
        net.run_ms(10).unwrap();

        assert!(net.node(1).unwrap().is_done());
        assert!(net.node(2).unwrap().is_done());
        // origin: 2 sends; 1 and 2 forward to their other peer once each
        assert_eq!(net.stats().messages_sent, 4);
        assert!(net.topology().has_seen(1, 0));
        assert!(!net.topology().has_seen(2, 0));
    }

    #[test]
    fn test_overflowing_stagger_is_rejected_before_marking() {
        let mut net = network(3, 2);
        net.create_link(0, 1).unwrap();
        net.create_link(0, 2).unwrap();
        let header = FloodHeader::new(5)
            .with_local_delay(1)
            .with_delay_between_peers(Time::MAX);
        assert!(matches!(
            net.flood(Gossip(header), header, 0),
            Err(SimError::InvalidParameter(_))
        ));
        assert!(!net.topology().has_seen(5, 0));
        assert_eq!(net.pending_events(), 0);
    }
}
