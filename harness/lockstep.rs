//! Lock-step replay of two independently built simulations
//!
//! The original and its [`Replayable::copy`] are advanced by the same
//! `run_ms` calls. After every step their snapshots must match node for node;
//! the first mismatch is reported with its step, virtual time and node.

use crate::error::{HarnessError, HarnessResult};
use crate::monitor::{MonitorConfig, RunAlert, RunMonitor};
use consensus_testbed::{NetworkSnapshot, NodeId, NodeSnapshot, Replayable, Time};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Replay parameters, loadable from TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    /// Seed handed to the scenario builder
    pub seed: u64,
    /// Virtual milliseconds per step
    pub step_ms: Time,
    /// Number of steps
    pub steps: u32,
    /// Stop at the first divergence instead of running every step
    #[serde(default = "default_stop_on_divergence")]
    pub stop_on_divergence: bool,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_stop_on_divergence() -> bool {
    true
}

impl ReplayConfig {
    pub fn new(seed: u64, step_ms: Time, steps: u32) -> Self {
        Self {
            seed,
            step_ms,
            steps,
            stop_on_divergence: default_stop_on_divergence(),
            monitor: MonitorConfig::default(),
        }
    }

    pub fn with_stop_on_divergence(mut self, stop: bool) -> Self {
        self.stop_on_divergence = stop;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.step_ms == 0 {
            return Err(HarnessError::Config("step_ms must be positive".to_string()));
        }
        if self.steps == 0 {
            return Err(HarnessError::Config("steps must be positive".to_string()));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> HarnessResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Summary of one compared step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: u32,
    pub time: Time,
    pub matched: bool,
    pub done_nodes: usize,
    pub messages_delivered: u64,
}

/// First point where the two runs disagree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Divergence {
    pub step: u32,
    pub time: Time,
    /// `None` when only network-wide counters differ
    pub node: Option<NodeId>,
    pub original: Option<NodeSnapshot>,
    pub copy: Option<NodeSnapshot>,
}

impl Divergence {
    fn between(step: u32, original: &NetworkSnapshot, copy: &NetworkSnapshot) -> Self {
        let node = original.first_divergent_node(copy);
        let pick = |snapshot: &NetworkSnapshot| {
            node.and_then(|id| snapshot.nodes.get(id as usize).cloned())
        };
        Self {
            step,
            time: original.time,
            node,
            original: pick(original),
            copy: pick(copy),
        }
    }
}

/// Result of a lock-step replay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayReport {
    pub seed: u64,
    pub step_ms: Time,
    pub steps_run: u32,
    pub steps: Vec<StepOutcome>,
    pub divergence: Option<Divergence>,
    pub alerts: Vec<RunAlert>,
    pub final_snapshot: NetworkSnapshot,
}

impl ReplayReport {
    pub fn is_deterministic(&self) -> bool {
        self.divergence.is_none()
    }

    pub fn to_json(&self) -> HarnessResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> HarnessResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Drives an original simulation and its copy side by side
pub struct LockStep<R: Replayable> {
    config: ReplayConfig,
    original: R,
    copy: R,
    monitor: RunMonitor,
}

impl<R: Replayable> LockStep<R> {
    pub fn new(config: ReplayConfig, original: R) -> HarnessResult<Self> {
        config.validate()?;
        let copy = original.copy();
        let monitor = RunMonitor::new(config.monitor.clone());
        Ok(Self {
            config,
            original,
            copy,
            monitor,
        })
    }

    pub fn original(&self) -> &R {
        &self.original
    }

    pub fn copy(&self) -> &R {
        &self.copy
    }

    /// Run every configured step, or up to the first divergence
    pub fn run(mut self) -> HarnessResult<ReplayReport> {
        info!(
            seed = self.config.seed,
            step_ms = self.config.step_ms,
            steps = self.config.steps,
            "Lock-step replay started"
        );

        let mut outcomes = Vec::with_capacity(self.config.steps as usize);
        let mut divergence = None;

        for step in 1..=self.config.steps {
            self.original.run_ms(self.config.step_ms)?;
            self.copy.run_ms(self.config.step_ms)?;
            let original = self.original.snapshot();
            let copy = self.copy.snapshot();
            let matched = original == copy;

            outcomes.push(StepOutcome {
                step,
                time: original.time,
                matched,
                done_nodes: original.done_count(),
                messages_delivered: original.stats.messages_delivered,
            });
            self.monitor.observe(&original);

            if matched {
                debug!(step, time = original.time, "Snapshots match");
                continue;
            }
            if divergence.is_none() {
                let found = Divergence::between(step, &original, &copy);
                warn!(step, time = found.time, node = ?found.node, "Runs diverged");
                divergence = Some(found);
            }
            if self.config.stop_on_divergence {
                break;
            }
        }

        let report = ReplayReport {
            seed: self.config.seed,
            step_ms: self.config.step_ms,
            steps_run: outcomes.len() as u32,
            steps: outcomes,
            divergence,
            alerts: self.monitor.into_alerts(),
            final_snapshot: self.original.snapshot(),
        };
        info!(
            steps_run = report.steps_run,
            deterministic = report.is_deterministic(),
            alerts = report.alerts.len(),
            "Lock-step replay finished"
        );
        Ok(report)
    }
}
