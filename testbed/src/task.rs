//! Scheduled work bound to a node.
//!
//! Tasks are plain records `{owner, kind, task}` rather than closures: the
//! `task` value is protocol data dispatched through the [`Task`] trait, so
//! pending work can be inspected and never holds references into the network.

use crate::{Network, NodeId, Protocol, SimResult, Time};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Identifier of a registered task, stable across re-arming
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Re-arming behavior of a task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Fires once
    OneShot,
    /// Fires every `period` ms from its start time
    Periodic { period: Time },
    /// Fires every `period` ms while `keep_running` holds; the body only runs
    /// when `still_enabled` holds
    Conditional { period: Time },
}

impl TaskKind {
    pub fn period(&self) -> Option<Time> {
        match self {
            TaskKind::OneShot => None,
            TaskKind::Periodic { period } | TaskKind::Conditional { period } => Some(*period),
        }
    }
}

/// Body and predicates of a scheduled task
pub trait Task<P: Protocol>: Debug {
    fn run(&self, network: &mut Network<P>, owner: NodeId) -> SimResult<()>;

    /// Gate for conditional tasks, checked at every fire time
    fn still_enabled(&self, _network: &Network<P>, _owner: NodeId) -> bool {
        true
    }

    /// Conditional tasks stop re-arming once this is false
    fn keep_running(&self, _network: &Network<P>, _owner: NodeId) -> bool {
        true
    }
}

/// Task type for protocols that never schedule work
#[derive(Debug, Clone, Copy)]
pub enum NoTask {}

impl<P: Protocol> Task<P> for NoTask {
    fn run(&self, _network: &mut Network<P>, _owner: NodeId) -> SimResult<()> {
        match *self {}
    }
}

/// Queued task instance
#[derive(Debug)]
pub(crate) struct TaskRecord<T> {
    pub id: TaskId,
    pub owner: NodeId,
    pub kind: TaskKind,
    pub task: T,
}
