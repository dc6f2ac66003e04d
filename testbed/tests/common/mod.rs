//! Shared protocol fixtures for the integration tests
#![allow(dead_code)]

use consensus_testbed::latency::{DistanceLatency, NetworkLatency};
use consensus_testbed::node::RandomPositionBuilder;
use consensus_testbed::{
    Message, Network, NetworkSnapshot, NoTopology, NodeCore, NodeId, Protocol, Replayable,
    SimConfig, SimNode, SimResult, Task, Time,
};
use rand::Rng;

/// Node recording every action it observes
#[derive(Debug, Clone)]
pub struct ProbeNode {
    pub core: NodeCore,
    pub log: Vec<(Time, &'static str)>,
}

impl SimNode for ProbeNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn state_digest(&self) -> u64 {
        self.log
            .iter()
            .fold(self.log.len() as u64, |acc, (time, _)| acc.rotate_left(7) ^ time)
    }
}

#[derive(Debug, Clone)]
pub enum ProbeMsg {
    Note(&'static str),
    /// Message with an explicit byte size
    Sized(u64),
    /// Answered with a `Note("pong")` to the sender
    Echo,
}

impl Message<Probe> for ProbeMsg {
    fn size(&self) -> u64 {
        match self {
            ProbeMsg::Sized(bytes) => *bytes,
            _ => 1,
        }
    }

    fn action(&self, net: &mut Network<Probe>, from: NodeId, to: NodeId) -> SimResult<()> {
        let now = net.time();
        match self {
            ProbeMsg::Note(label) => net.node_mut(to)?.log.push((now, *label)),
            ProbeMsg::Sized(_) => net.node_mut(to)?.log.push((now, "sized")),
            ProbeMsg::Echo => {
                net.node_mut(to)?.log.push((now, "echo"));
                net.send(ProbeMsg::Note("pong"), now, to, from)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ProbeTask {
    Note(&'static str),
    /// Body runs while `from <= now < until`, re-arms while `now <= stop_after`
    Gated {
        label: &'static str,
        from: Time,
        until: Time,
        stop_after: Time,
    },
    /// Echo a node picked with the network generator
    Chatter,
}

impl Task<Probe> for ProbeTask {
    fn run(&self, net: &mut Network<Probe>, owner: NodeId) -> SimResult<()> {
        let now = net.time();
        match self {
            ProbeTask::Note(label) | ProbeTask::Gated { label, .. } => {
                net.node_mut(owner)?.log.push((now, *label));
            }
            ProbeTask::Chatter => {
                let n = net.node_count() as NodeId;
                let to = net.rng().gen_range(0..n);
                if to != owner {
                    net.send(ProbeMsg::Echo, now, owner, to)?;
                }
            }
        }
        Ok(())
    }

    fn still_enabled(&self, net: &Network<Probe>, _owner: NodeId) -> bool {
        match self {
            ProbeTask::Gated { from, until, .. } => (*from..*until).contains(&net.time()),
            _ => true,
        }
    }

    fn keep_running(&self, net: &Network<Probe>, _owner: NodeId) -> bool {
        match self {
            ProbeTask::Gated { stop_after, .. } => net.time() <= *stop_after,
            _ => true,
        }
    }
}

pub struct Probe;

impl Protocol for Probe {
    type Node = ProbeNode;
    type Message = ProbeMsg;
    type Task = ProbeTask;
    type Topology = NoTopology;
}

/// Network of `n` randomly placed probe nodes
pub fn probe_network(
    n: usize,
    config: SimConfig,
    latency: impl NetworkLatency + 'static,
) -> Network<Probe> {
    let mut net = Network::new(config, latency, NoTopology);
    for _ in 0..n {
        let core = net.create_node(&RandomPositionBuilder, false);
        net.add_node(ProbeNode {
            core,
            log: Vec::new(),
        })
        .unwrap();
    }
    net
}

pub fn labels(net: &Network<Probe>, id: NodeId) -> Vec<(Time, &'static str)> {
    net.node(id).unwrap().log.clone()
}

/// Random chatter over distance latency, rebuilt from its seed
pub struct ChatterScenario {
    pub seed: u64,
    pub nodes: usize,
    pub net: Network<Probe>,
}

impl ChatterScenario {
    pub fn new(seed: u64, nodes: usize) -> Self {
        let mut net = probe_network(nodes, SimConfig::new().with_seed(seed), DistanceLatency::default());
        for id in 0..nodes as NodeId {
            net.register_periodic_task(ProbeTask::Chatter, u64::from(id), 25, id)
                .unwrap();
        }
        Self { seed, nodes, net }
    }
}

impl Replayable for ChatterScenario {
    fn copy(&self) -> Self {
        Self::new(self.seed, self.nodes)
    }

    fn run_ms(&mut self, ms: Time) -> SimResult<()> {
        self.net.run_ms(ms)
    }

    fn snapshot(&self) -> NetworkSnapshot {
        self.net.snapshot()
    }
}
