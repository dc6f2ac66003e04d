//! # Network Layer Implementation
//!
//! The [`Network`] owns everything a run mutates: the virtual clock, the event
//! queue, the node registry, the seeded generator, the latency model, the
//! partition state and the topology layer. There is a single logical timeline;
//! "simultaneous" activity is many events at the same virtual time, executed in
//! `(time, sequence)` order.
//!
//! ## Key Features
//!
//! - **Send semantics**: drops for down nodes and partitions are silent data,
//!   sender counters move at send time, receiver counters at delivery time
//! - **Task scheduling**: one-shot, periodic and conditional tasks sharing the
//!   event queue with deliveries
//! - **Partitions**: disjoint groups covering all nodes, or a split on the
//!   map's x axis
//! - **Fatal errors**: an error raised while executing an event aborts the run
//!   with the virtual time, node and event sequence attached

use crate::clock::{time_after, EventKey, EventQueue};
use crate::latency::{self, LatencyEstimate, NetworkLatency};
use crate::message::Topology;
use crate::node::{NodeBuilder, NodeCore, SimNode, MAX_X};
use crate::task::{TaskId, TaskKind, TaskRecord};
use crate::{
    seeded_rng, Message, NodeId, Protocol, SimConfig, SimError, SimResult, SimRng, Task, Time,
};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

/// Traffic and scheduling counters for a whole network
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkStats {
    /// Messages accepted into the event queue
    pub messages_sent: u64,
    /// Messages whose action was executed
    pub messages_delivered: u64,
    /// Sends refused because the sender or receiver was down
    pub dropped_down: u64,
    /// Sends refused because the pair was split by a partition
    pub dropped_partition: u64,
    /// Sends whose latency reached the discard threshold
    pub dropped_discarded: u64,
    /// Deliveries refused because the receiver went down in flight
    pub dropped_at_delivery: u64,
    /// Task bodies executed
    pub tasks_fired: u64,
    /// Task fire times skipped (owner down or condition false)
    pub tasks_skipped: u64,
}

impl NetworkStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_at_send() + self.dropped_at_delivery
    }

    /// Sends refused before entering the queue; these never count as sent
    pub fn dropped_at_send(&self) -> u64 {
        self.dropped_down + self.dropped_partition + self.dropped_discarded
    }
}

/// Active partition: disjoint groups covering every node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionState {
    groups: Vec<Vec<NodeId>>,
    group_of: Vec<usize>,
}

impl PartitionState {
    /// Validate `groups` against a network of `node_count` nodes
    pub fn new(groups: Vec<Vec<NodeId>>, node_count: usize) -> SimResult<Self> {
        let mut group_of = vec![usize::MAX; node_count];
        for (index, group) in groups.iter().enumerate() {
            for &id in group {
                let slot = group_of
                    .get_mut(id as usize)
                    .ok_or(SimError::UnknownNode(id))?;
                if *slot != usize::MAX {
                    return Err(SimError::InvalidPartition(format!(
                        "node {} appears in groups {} and {}",
                        id, *slot, index
                    )));
                }
                *slot = index;
            }
        }
        if let Some(missing) = group_of.iter().position(|g| *g == usize::MAX) {
            return Err(SimError::InvalidPartition(format!(
                "node {} is not covered by any group",
                missing
            )));
        }
        Ok(Self { groups, group_of })
    }

    pub fn groups(&self) -> &[Vec<NodeId>] {
        &self.groups
    }

    pub fn group_of(&self, id: NodeId) -> Option<usize> {
        self.group_of.get(id as usize).copied()
    }

    /// True when `a` and `b` sit in different groups
    pub fn separates(&self, a: NodeId, b: NodeId) -> bool {
        self.group_of(a) != self.group_of(b)
    }
}

enum Event<P: Protocol> {
    Delivery {
        from: NodeId,
        to: NodeId,
        message: Rc<P::Message>,
    },
    Task(TaskRecord<P::Task>),
}

/// Fate of one destination of a send, decided before anything is committed
enum Route {
    Down,
    Partitioned,
    Discarded,
    Deliver(Time),
}

impl<P: Protocol> Event<P> {
    fn node(&self) -> NodeId {
        match self {
            Event::Delivery { to, .. } => *to,
            Event::Task(record) => record.owner,
        }
    }
}

/// Simulated network parameterized by a protocol bundle
pub struct Network<P: Protocol> {
    config: SimConfig,
    time: Time,
    started: bool,
    halted: bool,
    pub(crate) rng: SimRng,
    latency: Box<dyn NetworkLatency>,
    pub(crate) nodes: Vec<P::Node>,
    queue: EventQueue<Event<P>>,
    partition: Option<PartitionState>,
    next_task_id: u64,
    pub(crate) stats: NetworkStats,
    pub(crate) topology: P::Topology,
}

impl<P: Protocol> Network<P> {
    /// Create an empty network seeded from `config.seed`
    pub fn new(
        config: SimConfig,
        latency: impl NetworkLatency + 'static,
        topology: P::Topology,
    ) -> Self {
        Self {
            rng: seeded_rng(config.seed),
            config,
            time: 0,
            started: false,
            halted: false,
            latency: Box::new(latency),
            nodes: Vec::new(),
            queue: EventQueue::new(),
            partition: None,
            next_task_id: 0,
            stats: NetworkStats::default(),
            topology,
        }
    }

    /// Current virtual time in milliseconds
    pub fn time(&self) -> Time {
        self.time
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn latency(&self) -> &dyn NetworkLatency {
        self.latency.as_ref()
    }

    /// The network-owned generator; every draw shifts the rest of the run
    pub fn rng(&mut self) -> &mut SimRng {
        &mut self.rng
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn topology(&self) -> &P::Topology {
        &self.topology
    }

    pub fn has_started(&self) -> bool {
        self.started
    }

    /// Number of deliveries and tasks waiting in the queue
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    // ----------------------------------------------------------------------
    // Node registry
    // ----------------------------------------------------------------------

    /// Build a node core placed by `builder`, drawing from the network generator
    pub fn create_node(&mut self, builder: &dyn NodeBuilder, byzantine: bool) -> NodeCore {
        NodeCore::new(builder.place(&mut self.rng), byzantine)
    }

    /// Register a node and assign it the next id
    pub fn add_node(&mut self, mut node: P::Node) -> SimResult<NodeId> {
        if self.started {
            return Err(SimError::TopologyFrozen("the network is already running"));
        }
        if self.partition.is_some() {
            return Err(SimError::TopologyFrozen("a partition is active"));
        }
        let id = NodeId::try_from(self.nodes.len())
            .map_err(|_| SimError::InvalidParameter("too many nodes".to_string()))?;
        node.core_mut().id = id;
        self.nodes.push(node);
        self.topology.node_added(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> SimResult<&P::Node> {
        self.nodes.get(id as usize).ok_or(SimError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> SimResult<&mut P::Node> {
        self.nodes
            .get_mut(id as usize)
            .ok_or(SimError::UnknownNode(id))
    }

    pub fn all_nodes(&self) -> &[P::Node] {
        &self.nodes
    }

    /// Nodes that are not down, in id order
    pub fn live_nodes(&self) -> impl Iterator<Item = &P::Node> + '_ {
        self.nodes.iter().filter(|n| !n.core().is_down())
    }

    pub fn live_node_ids(&self) -> Vec<NodeId> {
        self.live_nodes().map(|n| n.core().id()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Flip the liveness flag of a node
    pub fn set_down(&mut self, id: NodeId, down: bool) -> SimResult<()> {
        let now = self.time;
        let core = self.node_mut(id)?.core_mut();
        if core.down != down {
            debug!(node = id, down, time = now, "Liveness changed");
        }
        core.down = down;
        Ok(())
    }

    /// Record completion time for `id`, keeping the first one
    pub fn mark_done(&mut self, id: NodeId) -> SimResult<()> {
        let now = self.time.max(1);
        let core = self.node_mut(id)?.core_mut();
        if core.done_at == 0 {
            core.done_at = now;
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Sending
    // ----------------------------------------------------------------------

    /// Send `message` leaving `from` at `origin_time`
    pub fn send(
        &mut self,
        message: P::Message,
        origin_time: Time,
        from: NodeId,
        to: NodeId,
    ) -> SimResult<()> {
        self.send_to_many(message, origin_time, from, &[to])
    }

    /// Send one shared message to several destinations, in slice order
    pub fn send_to_many(
        &mut self,
        message: P::Message,
        origin_time: Time,
        from: NodeId,
        destinations: &[NodeId],
    ) -> SimResult<()> {
        self.send_shared(Rc::new(message), origin_time, from, destinations)
    }

    /// Send to every live node except `from`
    pub fn send_all(&mut self, message: P::Message, origin_time: Time, from: NodeId) -> SimResult<()> {
        let destinations: Vec<NodeId> = self
            .live_node_ids()
            .into_iter()
            .filter(|id| *id != from)
            .collect();
        self.send_to_many(message, origin_time, from, &destinations)
    }

    /// All-or-nothing: every id and arrival time is checked before the first
    /// destination is enqueued, and the generator only advances on success
    pub(crate) fn send_shared(
        &mut self,
        message: Rc<P::Message>,
        origin_time: Time,
        from: NodeId,
        destinations: &[NodeId],
    ) -> SimResult<()> {
        if origin_time < self.time {
            return Err(SimError::ScheduleInPast {
                now: self.time,
                requested: origin_time,
            });
        }
        self.node(from)?;
        for &to in destinations {
            self.node(to)?;
        }

        let mut rng = self.rng.clone();
        let routes = destinations
            .iter()
            .map(|&to| self.route(origin_time, from, to, &mut rng))
            .collect::<SimResult<Vec<Route>>>()?;
        self.rng = rng;

        let size = message.size();
        for (&to, route) in destinations.iter().zip(routes) {
            match route {
                Route::Down => self.stats.dropped_down += 1,
                Route::Partitioned => self.stats.dropped_partition += 1,
                Route::Discarded => self.stats.dropped_discarded += 1,
                Route::Deliver(arrival) => {
                    let core = self.nodes[from as usize].core_mut();
                    core.msg_sent += 1;
                    core.bytes_sent += size;
                    self.stats.messages_sent += 1;
                    self.queue.push(
                        arrival,
                        Event::Delivery {
                            from,
                            to,
                            message: Rc::clone(&message),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn route(&self, origin_time: Time, from: NodeId, to: NodeId, rng: &mut SimRng) -> SimResult<Route> {
        let sender = self.node(from)?.core();
        let receiver = self.node(to)?.core();
        if sender.is_down() || receiver.is_down() {
            return Ok(Route::Down);
        }
        if self.is_partitioned(from, to) {
            return Ok(Route::Partitioned);
        }
        let delay = self.latency.delay(sender, receiver, rng);
        if self.config.discard_after.is_some_and(|limit| delay >= limit) {
            return Ok(Route::Discarded);
        }
        Ok(Route::Deliver(time_after(origin_time, delay)?))
    }

    // ----------------------------------------------------------------------
    // Tasks
    // ----------------------------------------------------------------------

    /// Run `task` once on `owner` at `start_time`
    pub fn register_task(&mut self, task: P::Task, start_time: Time, owner: NodeId) -> SimResult<TaskId> {
        self.schedule_task(task, start_time, owner, TaskKind::OneShot)
    }

    /// Run `task` on `owner` at `start_time`, `start_time + period`, ...
    pub fn register_periodic_task(
        &mut self,
        task: P::Task,
        start_time: Time,
        period: Time,
        owner: NodeId,
    ) -> SimResult<TaskId> {
        self.schedule_task(task, start_time, owner, TaskKind::Periodic { period })
    }

    /// Like a periodic task, gated by the task's `still_enabled` and
    /// `keep_running` predicates
    pub fn register_conditional_task(
        &mut self,
        task: P::Task,
        start_time: Time,
        period: Time,
        owner: NodeId,
    ) -> SimResult<TaskId> {
        self.schedule_task(task, start_time, owner, TaskKind::Conditional { period })
    }

    fn schedule_task(
        &mut self,
        task: P::Task,
        start_time: Time,
        owner: NodeId,
        kind: TaskKind,
    ) -> SimResult<TaskId> {
        self.node(owner)?;
        if start_time < self.time {
            return Err(SimError::ScheduleInPast {
                now: self.time,
                requested: start_time,
            });
        }
        if kind.period() == Some(0) {
            return Err(SimError::InvalidParameter(
                "task period must be positive".to_string(),
            ));
        }
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        self.queue.push(
            start_time,
            Event::Task(TaskRecord {
                id,
                owner,
                kind,
                task,
            }),
        );
        Ok(id)
    }

    // ----------------------------------------------------------------------
    // Partitions
    // ----------------------------------------------------------------------

    /// Install a partition; sends across groups are dropped until it ends
    pub fn partition(&mut self, groups: Vec<Vec<NodeId>>) -> SimResult<()> {
        let state = PartitionState::new(groups, self.nodes.len())?;
        debug!(groups = state.groups().len(), time = self.time, "Partition installed");
        self.partition = Some(state);
        Ok(())
    }

    /// Split the map at `fraction` of its width: nodes left of the line form
    /// one group, the others a second one
    pub fn partition_by_position(&mut self, fraction: f64) -> SimResult<()> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(SimError::InvalidParameter(format!(
                "partition fraction must be in (0, 1), got {}",
                fraction
            )));
        }
        let boundary = (f64::from(MAX_X) * fraction) as u32;
        let (left, right): (Vec<&P::Node>, Vec<&P::Node>) = self
            .nodes
            .iter()
            .partition(|n| n.core().location.x < boundary);
        let groups: Vec<Vec<NodeId>> = [left, right]
            .into_iter()
            .map(|side| side.into_iter().map(|n| n.core().id()).collect::<Vec<_>>())
            .filter(|group| !group.is_empty())
            .collect();
        self.partition(groups)
    }

    /// Clear the partition; a no-op when none is active
    pub fn end_partition(&mut self) {
        if self.partition.take().is_some() {
            debug!(time = self.time, "Partition healed");
        }
    }

    pub fn partition_state(&self) -> Option<&PartitionState> {
        self.partition.as_ref()
    }

    /// True when an active partition separates `a` from `b`
    pub fn is_partitioned(&self, a: NodeId, b: NodeId) -> bool {
        self.partition
            .as_ref()
            .is_some_and(|state| state.separates(a, b))
    }

    // ----------------------------------------------------------------------
    // Running
    // ----------------------------------------------------------------------

    pub fn run(&mut self, seconds: u64) -> SimResult<()> {
        let ms = seconds.checked_mul(1000).ok_or_else(|| {
            SimError::InvalidParameter(format!("run of {}s overflows virtual time", seconds))
        })?;
        self.run_ms(ms)
    }

    /// Advance the clock by `ms`, executing everything due on the way
    pub fn run_ms(&mut self, ms: Time) -> SimResult<()> {
        self.run_until(time_after(self.time, ms)?)
    }

    /// Execute every queued item with time <= `deadline`, then set the clock to it
    pub fn run_until(&mut self, deadline: Time) -> SimResult<()> {
        if self.halted {
            return Err(SimError::Halted);
        }
        if deadline < self.time {
            return Err(SimError::ScheduleInPast {
                now: self.time,
                requested: deadline,
            });
        }
        if !self.started {
            self.config.validate()?;
            self.started = true;
            info!(
                nodes = self.nodes.len(),
                seed = self.config.seed,
                latency = self.latency.name(),
                "Simulation started"
            );
        }

        while let Some((key, event)) = self.queue.pop_due(deadline) {
            self.time = key.time;
            let node = event.node();
            if let Err(source) = self.dispatch(key, event) {
                self.halted = true;
                warn!(time = key.time, node, sequence = key.sequence, error = %source, "Simulation aborted");
                return Err(SimError::Aborted {
                    time: key.time,
                    node,
                    sequence: key.sequence,
                    source: Box::new(source),
                });
            }
        }

        self.time = deadline;
        Ok(())
    }

    fn dispatch(&mut self, key: EventKey, event: Event<P>) -> SimResult<()> {
        match event {
            Event::Delivery { from, to, message } => {
                let core = self.node_mut(to)?.core_mut();
                if core.down {
                    self.stats.dropped_at_delivery += 1;
                    trace!(time = key.time, from, to, "Dropped at delivery, receiver down");
                    return Ok(());
                }
                core.msg_received += 1;
                core.bytes_received += message.size();
                self.stats.messages_delivered += 1;
                trace!(time = key.time, seq = key.sequence, from, to, ?message, "Deliver");
                message.action(self, from, to)
            }
            Event::Task(record) => self.fire_task(key, record),
        }
    }

    fn fire_task(&mut self, key: EventKey, record: TaskRecord<P::Task>) -> SimResult<()> {
        let TaskRecord {
            id,
            owner,
            kind,
            task,
        } = record;
        let live = !self.node(owner)?.core().is_down();

        if let TaskKind::Conditional { .. } = kind {
            if !task.keep_running(self, owner) {
                trace!(time = key.time, task = id.0, owner, "Conditional task retired");
                return Ok(());
            }
        }

        // an overflowing re-arm aborts before the body runs
        let next = kind
            .period()
            .map(|period| time_after(key.time, period))
            .transpose()?;

        let enabled = match kind {
            TaskKind::Conditional { .. } => live && task.still_enabled(self, owner),
            TaskKind::OneShot | TaskKind::Periodic { .. } => live,
        };
        if enabled {
            self.stats.tasks_fired += 1;
            trace!(time = key.time, task = id.0, owner, "Task fired");
            task.run(self, owner)?;
        } else {
            self.stats.tasks_skipped += 1;
        }

        if let Some(next) = next {
            self.queue.push(
                next,
                Event::Task(TaskRecord {
                    id,
                    owner,
                    kind,
                    task,
                }),
            );
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Diagnostics
    // ----------------------------------------------------------------------

    /// Sample random node pairs with a caller-provided scratch generator
    pub fn estimate_latency(&self, samples: usize, scratch: &mut SimRng) -> Option<LatencyEstimate> {
        let cores: Vec<&NodeCore> = self.nodes.iter().map(|n| n.core()).collect();
        latency::estimate_latency(self.latency.as_ref(), &cores, samples, scratch)
    }
}
