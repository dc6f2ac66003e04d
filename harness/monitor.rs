//! Runtime monitoring for simulation runs
//!
//! Installs the `tracing` subscriber used by harness binaries and tests, and
//! watches per-step snapshots for runs that stall, lose most of their traffic
//! or lose nodes.

use consensus_testbed::{NetworkSnapshot, Time};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Returns false when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with("info")
}

/// Same as [`init_tracing`] with an explicit fallback directive
pub fn init_tracing_with(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Thresholds for run alerts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Consecutive steps without a delivery before a stall is reported
    pub stall_steps: u32,
    /// Fraction of dropped sends above which the run is flagged
    pub max_drop_rate: f64,
    /// Send attempts needed before the drop rate is evaluated
    pub min_attempts: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stall_steps: 10,
            max_drop_rate: 0.5,
            min_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunAlertKind {
    /// No delivery for `stall_steps` steps while some nodes are not done
    Stalled,
    /// Too many sends dropped
    HighDropRate,
    /// More nodes are down than at the previous step
    NodesDown,
}

/// Alert raised while observing a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunAlert {
    pub kind: RunAlertKind,
    pub step: u32,
    pub time: Time,
    pub message: String,
    pub metrics: BTreeMap<String, f64>,
}

impl RunAlert {
    pub fn new(kind: RunAlertKind, step: u32, time: Time, message: String) -> Self {
        Self {
            kind,
            step,
            time,
            message,
            metrics: BTreeMap::new(),
        }
    }

    /// Add metric to alert
    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

/// Watches successive snapshots of one run
#[derive(Debug, Clone)]
pub struct RunMonitor {
    config: MonitorConfig,
    step: u32,
    last_delivered: u64,
    quiet_steps: u32,
    last_down: usize,
    drop_rate_flagged: bool,
    alerts: Vec<RunAlert>,
}

impl RunMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            step: 0,
            last_delivered: 0,
            quiet_steps: 0,
            last_down: 0,
            drop_rate_flagged: false,
            alerts: Vec::new(),
        }
    }

    /// Record the next step; returns the alerts it raised
    pub fn observe(&mut self, snapshot: &NetworkSnapshot) -> &[RunAlert] {
        self.step += 1;
        let first_new = self.alerts.len();
        let stats = &snapshot.stats;

        if stats.messages_delivered == self.last_delivered {
            self.quiet_steps += 1;
            let pending = snapshot.nodes.len() - snapshot.done_count();
            if self.quiet_steps == self.config.stall_steps && pending > 0 {
                self.raise(
                    RunAlert::new(
                        RunAlertKind::Stalled,
                        self.step,
                        snapshot.time,
                        format!("no delivery for {} steps", self.quiet_steps),
                    )
                    .with_metric("pending_nodes", pending as f64),
                );
            }
        } else {
            self.quiet_steps = 0;
            self.last_delivered = stats.messages_delivered;
        }

        let attempts = stats.messages_sent + stats.dropped_at_send();
        if !self.drop_rate_flagged && attempts >= self.config.min_attempts {
            let rate = stats.dropped() as f64 / attempts as f64;
            if rate > self.config.max_drop_rate {
                self.drop_rate_flagged = true;
                self.raise(
                    RunAlert::new(
                        RunAlertKind::HighDropRate,
                        self.step,
                        snapshot.time,
                        format!("{:.0}% of sends dropped", rate * 100.0),
                    )
                    .with_metric("drop_rate", rate)
                    .with_metric("attempts", attempts as f64),
                );
            }
        }

        let down = snapshot.nodes.iter().filter(|n| n.down).count();
        if down > self.last_down {
            self.raise(
                RunAlert::new(
                    RunAlertKind::NodesDown,
                    self.step,
                    snapshot.time,
                    format!("{} nodes down, was {}", down, self.last_down),
                )
                .with_metric("down", down as f64),
            );
        }
        self.last_down = down;

        debug!(
            step = self.step,
            time = snapshot.time,
            delivered = stats.messages_delivered,
            done = snapshot.done_count(),
            "Step observed"
        );
        &self.alerts[first_new..]
    }

    fn raise(&mut self, alert: RunAlert) {
        warn!(kind = ?alert.kind, step = alert.step, time = alert.time, "{}", alert.message);
        self.alerts.push(alert);
    }

    pub fn alerts(&self) -> &[RunAlert] {
        &self.alerts
    }

    pub fn into_alerts(self) -> Vec<RunAlert> {
        self.alerts
    }
}
