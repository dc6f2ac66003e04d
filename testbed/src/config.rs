//! Network-wide simulation parameters.

use crate::{SimError, SimResult, Time};
use serde::{Deserialize, Serialize};

/// What `on_block` does with a block whose proposal time is still in the future
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EarlyBlockPolicy {
    /// Accept immediately, ignoring the proposal time
    Accept,
    /// Refuse the block; the protocol decides whether to resend it
    Reject,
    /// Refuse now and schedule a retry on the receiving node at the proposal time
    Defer,
}

/// Global configuration for one network instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    /// Seed of the network-owned generator
    pub seed: u64,

    /// Messages whose latency reaches this many milliseconds are dropped
    pub discard_after: Option<Time>,

    /// Handling of blocks received before their proposal time
    pub early_block_policy: EarlyBlockPolicy,

    /// Treat same-height blocks from one producer as ignorable instead of fatal
    pub allow_equivocation: bool,
}

impl SimConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            seed: 0,
            discard_after: None,
            early_block_policy: EarlyBlockPolicy::Defer,
            allow_equivocation: false,
        }
    }

    /// Set the generator seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Drop messages slower than `ms`
    pub fn with_discard_after(mut self, ms: Time) -> Self {
        self.discard_after = Some(ms);
        self
    }

    pub fn with_early_block_policy(mut self, policy: EarlyBlockPolicy) -> Self {
        self.early_block_policy = policy;
        self
    }

    pub fn with_equivocation_allowed(mut self, allowed: bool) -> Self {
        self.allow_equivocation = allowed;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> SimResult<()> {
        if self.discard_after == Some(0) {
            return Err(SimError::InvalidParameter(
                "discard_after must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}
