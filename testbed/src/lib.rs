//! # Consensus Testbed - Deterministic Simulation Substrate
//!
//! This library provides the shared simulation substrate used to evaluate
//! consensus, aggregation and gossip protocols under controlled network
//! conditions. Every run is replayed bit-for-bit from a seed.
//!
//! ## Architecture
//!
//! - **Clock & Event Queue**: virtual millisecond clock and a total order over
//!   pending deliveries and tasks, keyed by `(time, sequence)`
//! - **Latency**: interchangeable `(from, to, rng) -> delay` strategies
//! - **Node Builders**: deterministic placement of nodes on the world map
//! - **Network**: node registry, send/broadcast, partitions, task scheduling
//! - **Peer-to-Peer Layer**: adjacency and flood de-duplication
//! - **Block-DAG Layer**: parent-linked blocks, fork choice, global indices
//!
//! ## Usage
//!
//! ```rust
//! use consensus_testbed::{
//!     Message, Network, NoTask, NoTopology, NodeCore, NodeId, Protocol, SimConfig,
//!     SimResult, latency::NoLatency, node::RandomPositionBuilder,
//! };
//!
//! #[derive(Debug, Clone)]
//! struct Ping;
//!
//! struct PingProtocol;
//!
//! impl Protocol for PingProtocol {
//!     type Node = NodeCore;
//!     type Message = Ping;
//!     type Task = NoTask;
//!     type Topology = NoTopology;
//! }
//!
//! impl Message<PingProtocol> for Ping {
//!     fn action(&self, net: &mut Network<PingProtocol>, _from: NodeId, to: NodeId) -> SimResult<()> {
//!         net.mark_done(to)
//!     }
//! }
//!
//! let mut net = Network::<PingProtocol>::new(SimConfig::new().with_seed(7), NoLatency, NoTopology);
//! let a = net.create_node(&RandomPositionBuilder, false);
//! let a = net.add_node(a).unwrap();
//! let b = net.create_node(&RandomPositionBuilder, false);
//! let b = net.add_node(b).unwrap();
//! net.send(Ping, 0, a, b).unwrap();
//! net.run_ms(10).unwrap();
//! assert!(net.node(b).unwrap().is_done());
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub mod blockchain;
pub mod clock;
pub mod config;
pub mod error;
pub mod latency;
pub mod message;
pub mod network;
pub mod node;
pub mod p2p;
pub mod replay;
pub mod task;

pub use blockchain::{
    Block, BlockDag, BlockId, BlockProposal, BlockRetry, ForkChoice, OmniscientView, GENESIS,
};
pub use clock::{EventKey, EventQueue};
pub use config::{EarlyBlockPolicy, SimConfig};
pub use error::{SimError, SimResult};
pub use latency::{LatencyEstimate, NetworkLatency};
pub use message::{Message, NoTopology, Protocol, Topology};
pub use network::{Network, NetworkStats, PartitionState};
pub use node::{NodeBuilder, NodeCore, SimNode};
pub use p2p::{FloodHeader, P2PConfig, PeerTopology};
pub use replay::{NetworkSnapshot, NodeSnapshot, Replayable};
pub use task::{NoTask, Task, TaskId, TaskKind};

/// Node identifier, assigned in insertion order starting at 0
pub type NodeId = u32;

/// Virtual time in milliseconds since the start of the run
pub type Time = u64;

/// Seeded generator owned by each network instance
pub type SimRng = ChaCha8Rng;

/// Create the generator for a given seed
pub fn seeded_rng(seed: u64) -> SimRng {
    ChaCha8Rng::seed_from_u64(seed)
}
