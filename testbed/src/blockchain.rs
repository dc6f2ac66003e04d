//! # Block-DAG Layer
//!
//! Parent-linked blocks shared by every node of a network. Blocks live in one
//! arena indexed by [`BlockId`]; each node keeps its own head and the set of
//! blocks it accepted. The head is moved by the protocol's [`ForkChoice`].
//!
//! ## Key Features
//!
//! - **Arena + ids**: parents are ids, never references, so the DAG is
//!   append-only and cheap to walk
//! - **Early blocks**: blocks received before their proposal time are
//!   accepted, refused, or retried later depending on [`EarlyBlockPolicy`]
//! - **Equivocation**: two accepted blocks at one height from one producer
//!   abort the run unless the configuration allows them
//! - **Omniscient view**: read-only access to every accepted block, handed
//!   out to byzantine nodes only
//!
//! [`EarlyBlockPolicy`]: crate::EarlyBlockPolicy

use crate::config::EarlyBlockPolicy;
use crate::message::Topology;
use crate::node::SimNode;
use crate::{Network, NodeId, Protocol, SimError, SimResult, Time};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

/// Index of a block in the DAG arena; 0 is genesis
pub type BlockId = u64;

/// Id of the genesis block
pub const GENESIS: BlockId = 0;

/// One block of the DAG
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block<B> {
    pub id: BlockId,
    /// `None` only for genesis
    pub producer: Option<NodeId>,
    pub height: u64,
    pub parent: Option<BlockId>,
    pub valid: bool,
    /// Earliest virtual time at which honest nodes accept the block
    pub proposal_time: Time,
    pub payload: B,
}

impl<B> Block<B> {
    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arguments of [`Network::create_block`]
#[derive(Debug, Clone)]
pub struct BlockProposal<B> {
    pub producer: NodeId,
    pub parent: BlockId,
    pub height: u64,
    pub proposal_time: Time,
    pub valid: bool,
    pub payload: B,
}

impl<B> BlockProposal<B> {
    /// Valid block acceptable immediately
    pub fn new(producer: NodeId, parent: BlockId, height: u64, payload: B) -> Self {
        Self {
            producer,
            parent,
            height,
            proposal_time: 0,
            valid: true,
            payload,
        }
    }

    pub fn at(mut self, proposal_time: Time) -> Self {
        self.proposal_time = proposal_time;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }
}

/// Retry of a block that arrived before its proposal time.
///
/// Scheduled on the receiving node under [`EarlyBlockPolicy::Defer`]; the
/// protocol task converted from it should call [`Network::on_block`] again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlockRetry {
    pub block: BlockId,
}

/// Protocol-supplied fork choice
pub trait ForkChoice<B>: Protocol<Topology = BlockDag<B>> {
    /// Preferred head among `a` and `b`; must return `a` when `a == b`
    fn best(dag: &BlockDag<B>, a: BlockId, b: BlockId) -> BlockId;
}

/// Shared block storage plus per-node views
#[derive(Debug, Clone)]
pub struct BlockDag<B> {
    blocks: Vec<Block<B>>,
    children: Vec<Vec<BlockId>>,
    by_height: BTreeMap<u64, IndexSet<BlockId>>,
    heads: Vec<BlockId>,
    received: Vec<HashSet<BlockId>>,
}

impl<B> BlockDag<B> {
    /// Create a DAG holding only the genesis block
    pub fn new(genesis_payload: B) -> Self {
        let genesis = Block {
            id: GENESIS,
            producer: None,
            height: 0,
            parent: None,
            valid: true,
            proposal_time: 0,
            payload: genesis_payload,
        };
        let mut by_height = BTreeMap::new();
        by_height.insert(0, IndexSet::from([GENESIS]));
        Self {
            blocks: vec![genesis],
            children: vec![Vec::new()],
            by_height,
            heads: Vec::new(),
            received: Vec::new(),
        }
    }

    pub fn genesis(&self) -> &Block<B> {
        &self.blocks[GENESIS as usize]
    }

    pub fn block(&self, id: BlockId) -> SimResult<&Block<B>> {
        self.blocks
            .get(id as usize)
            .ok_or(SimError::UnknownBlock(id))
    }

    /// Number of created blocks, genesis included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn children(&self, id: BlockId) -> SimResult<&[BlockId]> {
        self.children
            .get(id as usize)
            .map(Vec::as_slice)
            .ok_or(SimError::UnknownBlock(id))
    }

    /// Accepted blocks at `height`, in first-acceptance order
    pub fn blocks_at_height(&self, height: u64) -> impl Iterator<Item = &Block<B>> + '_ {
        self.by_height
            .get(&height)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .map(|id| &self.blocks[*id as usize])
    }

    /// Highest height with at least one accepted block
    pub fn max_height(&self) -> u64 {
        self.by_height.keys().next_back().copied().unwrap_or(0)
    }

    pub fn head(&self, node: NodeId) -> SimResult<BlockId> {
        self.heads
            .get(node as usize)
            .copied()
            .ok_or(SimError::UnknownNode(node))
    }

    pub fn has_received(&self, node: NodeId, block: BlockId) -> bool {
        self.received
            .get(node as usize)
            .is_some_and(|set| set.contains(&block))
    }

    pub fn received_count(&self, node: NodeId) -> usize {
        self.received.get(node as usize).map_or(0, HashSet::len)
    }

    /// True when `ancestor` is a strict ancestor of `descendant`
    pub fn is_ancestor(&self, ancestor: BlockId, descendant: BlockId) -> SimResult<bool> {
        let target = self.block(ancestor)?;
        let mut current = self.block(descendant)?;
        if ancestor == descendant {
            return Ok(false);
        }
        while current.height > target.height {
            match current.parent {
                Some(parent) => current = self.block(parent)?,
                None => return Ok(false),
            }
        }
        Ok(current.id == ancestor)
    }

    /// True when one block is a strict ancestor of the other
    pub fn has_direct_link(&self, a: BlockId, b: BlockId) -> SimResult<bool> {
        let (low, high) = if self.block(a)?.height <= self.block(b)?.height {
            (a, b)
        } else {
            (b, a)
        };
        self.is_ancestor(low, high)
    }

    /// Ids from `id` back to genesis, `id` first
    pub fn ancestry(&self, id: BlockId) -> SimResult<Vec<BlockId>> {
        let mut chain = vec![id];
        let mut current = self.block(id)?;
        while let Some(parent) = current.parent {
            chain.push(parent);
            current = self.block(parent)?;
        }
        Ok(chain)
    }

    /// Fork choice helper: the higher block wins, ties keep `a`
    pub fn higher(&self, a: BlockId, b: BlockId) -> BlockId {
        match (self.blocks.get(a as usize), self.blocks.get(b as usize)) {
            (Some(x), Some(y)) if y.height > x.height => b,
            _ => a,
        }
    }

    fn insert(&mut self, proposal: BlockProposal<B>) -> SimResult<BlockId> {
        let parent = self.block(proposal.parent)?;
        if proposal.height <= parent.height {
            return Err(SimError::InvalidBlock(format!(
                "height {} does not exceed parent {} at height {}",
                proposal.height, parent.id, parent.height
            )));
        }
        let id = self.blocks.len() as BlockId;
        self.blocks.push(Block {
            id,
            producer: Some(proposal.producer),
            height: proposal.height,
            parent: Some(proposal.parent),
            valid: proposal.valid,
            proposal_time: proposal.proposal_time,
            payload: proposal.payload,
        });
        self.children.push(Vec::new());
        self.children[proposal.parent as usize].push(id);
        Ok(id)
    }

    /// Accepted block from the same producer at the same height, if any
    fn conflicting(&self, block: &Block<B>) -> Option<(NodeId, BlockId)> {
        let producer = block.producer?;
        self.by_height
            .get(&block.height)?
            .iter()
            .copied()
            .find(|other| {
                *other != block.id && self.blocks[*other as usize].producer == Some(producer)
            })
            .map(|other| (producer, other))
    }
}

impl<B> Topology for BlockDag<B> {
    fn node_added(&mut self, id: NodeId) {
        debug_assert_eq!(id as usize, self.heads.len());
        self.heads.push(GENESIS);
        self.received.push(HashSet::from([GENESIS]));
    }
}

/// Read-only view over every accepted block.
///
/// A simulation shortcut: real nodes only know what they received. Only
/// byzantine nodes get one, through [`Network::omniscient_view`].
#[derive(Debug, Clone, Copy)]
pub struct OmniscientView<'a, B> {
    dag: &'a BlockDag<B>,
}

impl<'a, B> OmniscientView<'a, B> {
    pub fn by_height(&self, height: u64) -> impl Iterator<Item = &'a Block<B>> + 'a {
        self.dag.blocks_at_height(height)
    }

    /// Accepted block by id; blocks nobody accepted yet are hidden
    pub fn by_id(&self, id: BlockId) -> Option<&'a Block<B>> {
        let block = self.dag.blocks.get(id as usize)?;
        self.dag
            .by_height
            .get(&block.height)
            .is_some_and(|ids| ids.contains(&id))
            .then_some(block)
    }

    pub fn max_height(&self) -> u64 {
        self.dag.max_height()
    }
}

impl<P, B> Network<P>
where
    P: Protocol<Topology = BlockDag<B>>,
{
    /// Add a block to the DAG; it is not received by anyone yet
    pub fn create_block(&mut self, proposal: BlockProposal<B>) -> SimResult<BlockId> {
        self.node(proposal.producer)?;
        let producer = proposal.producer;
        let id = self.topology.insert(proposal)?;
        trace!(block = id, producer, time = self.time(), "Block created");
        Ok(id)
    }

    pub fn head(&self, node: NodeId) -> SimResult<&Block<B>> {
        self.topology.block(self.topology.head(node)?)
    }

    /// Global block index, for byzantine nodes only
    pub fn omniscient_view(&self, node: NodeId) -> SimResult<Option<OmniscientView<'_, B>>> {
        let byzantine = self.node(node)?.core().is_byzantine();
        Ok(byzantine.then_some(OmniscientView {
            dag: &self.topology,
        }))
    }

    /// Offer `block` to `node`.
    ///
    /// Returns true when the block was accepted and the node's head updated
    /// through the fork choice. Invalid, already received and early blocks
    /// return false; early blocks may be retried depending on the policy.
    pub fn on_block(&mut self, node: NodeId, block: BlockId) -> SimResult<bool>
    where
        P: ForkChoice<B>,
        P::Task: From<BlockRetry>,
    {
        self.node(node)?;
        let candidate = self.topology.block(block)?;
        if !candidate.valid || self.topology.has_received(node, block) {
            return Ok(false);
        }

        let now = self.time();
        if candidate.proposal_time > now {
            match self.config().early_block_policy {
                EarlyBlockPolicy::Accept => {}
                EarlyBlockPolicy::Reject => return Ok(false),
                EarlyBlockPolicy::Defer => {
                    let at = candidate.proposal_time;
                    self.register_task(P::Task::from(BlockRetry { block }), at, node)?;
                    trace!(block, node, retry_at = at, "Early block deferred");
                    return Ok(false);
                }
            }
        }

        if let Some((producer, existing)) = self.topology.conflicting(candidate) {
            let height = candidate.height;
            if self.config().allow_equivocation {
                debug!(producer, height, existing, candidate = block, "Equivocation ignored");
                return Ok(false);
            }
            return Err(SimError::Equivocation {
                producer,
                height,
                existing,
                candidate: block,
            });
        }

        let height = candidate.height;
        let dag = &mut self.topology;
        dag.received[node as usize].insert(block);
        dag.by_height.entry(height).or_default().insert(block);
        let head = dag.heads[node as usize];
        let best = P::best(dag, head, block);
        dag.heads[node as usize] = best;
        trace!(block, node, height, head = best, time = now, "Block accepted");
        Ok(true)
    }
}
