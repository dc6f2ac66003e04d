//! Fatal simulation errors.
//!
//! Modeled failures (dropped messages, down nodes, deferred blocks) are never
//! errors; they show up as flags, counters and return values. Everything in
//! [`SimError`] is a programmer or protocol-invariant violation that aborts the
//! run, because continuing would corrupt the deterministic replay.

use crate::{NodeId, Time};
use thiserror::Error;

/// Invariant violations raised by the simulation substrate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SimError {
    /// A node id that was never added to the network
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),

    /// A block id that was never created in the block DAG
    #[error("unknown block id {0}")]
    UnknownBlock(u64),

    /// Nodes can only be added before the first clock advance
    #[error("cannot add node: {0}")]
    TopologyFrozen(&'static str),

    /// Work scheduled before the current virtual time
    #[error("cannot schedule at t={requested}ms, clock is already at t={now}ms")]
    ScheduleInPast { now: Time, requested: Time },

    /// Invalid numeric parameter (zero period, fraction out of range, ...)
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Partition groups that overlap or do not cover every node
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// Block whose height does not exceed its parent's
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Two distinct blocks at one height from one producer under the honest assumption
    #[error("producer {producer} equivocated at height {height}: blocks {existing} and {candidate}")]
    Equivocation {
        producer: NodeId,
        height: u64,
        existing: u64,
        candidate: u64,
    },

    /// Error raised while executing a queued event, with replay context
    #[error("run aborted at t={time}ms on node {node} (event #{sequence}): {source}")]
    Aborted {
        time: Time,
        node: NodeId,
        sequence: u64,
        #[source]
        source: Box<SimError>,
    },

    /// The network already aborted and refuses to run further
    #[error("network halted after a fatal error")]
    Halted,
}

impl SimError {
    /// Innermost error, unwrapping replay context
    pub fn root_cause(&self) -> &SimError {
        match self {
            SimError::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_display_carries_context() {
        let err = SimError::Aborted {
            time: 42,
            node: 3,
            sequence: 17,
            source: Box::new(SimError::UnknownNode(9)),
        };
        let text = err.to_string();
        assert!(text.contains("t=42ms"));
        assert!(text.contains("node 3"));
        assert!(text.contains("#17"));
        assert!(text.contains("unknown node id 9"));
    }

    #[test]
    fn test_root_cause_unwraps_nested_context() {
        let inner = SimError::InvalidParameter("period must be positive".into());
        let err = SimError::Aborted {
            time: 1,
            node: 0,
            sequence: 0,
            source: Box::new(SimError::Aborted {
                time: 1,
                node: 0,
                sequence: 0,
                source: Box::new(inner.clone()),
            }),
        };
        assert_eq!(err.root_cause(), &inner);
    }
}
