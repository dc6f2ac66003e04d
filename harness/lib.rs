//! Consensus Testbed Replay and Monitoring Harness
//!
//! Tools that drive [`consensus_testbed`] simulations from the outside: a
//! lock-step runner that checks two independently built instances stay
//! identical, a run monitor that flags stalled or lossy runs, and the
//! logging setup shared by both.
//!
//! ## Features
//!
//! - **lockstep**: step an original and its copy, compare snapshots, report
//!   the first divergence as JSON
//! - **monitor**: `tracing` subscriber setup and per-step run alerts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use consensus_harness::{LockStep, ReplayConfig};
//!
//! let config = ReplayConfig::from_toml_str("seed = 7\nstep_ms = 50\nsteps = 20")?;
//! let scenario = MyScenario::new(config.seed);
//! let report = LockStep::new(config, scenario)?.run()?;
//! assert!(report.is_deterministic());
//! println!("{}", report.to_json()?);
//! ```

#![warn(clippy::all)]

pub mod lockstep;
pub mod monitor;

pub use lockstep::{Divergence, LockStep, ReplayConfig, ReplayReport, StepOutcome};
pub use monitor::{init_tracing, MonitorConfig, RunAlert, RunAlertKind, RunMonitor};

// Error types and result aliases
pub mod error {
    //! Error types for replay and monitoring

    pub use consensus_testbed::{SimError, SimResult};

    /// Combined error type for harness operations
    #[derive(Debug, thiserror::Error)]
    pub enum HarnessError {
        /// Simulation aborted
        #[error("Simulation error: {0}")]
        Simulation(#[from] SimError),

        /// Invalid harness configuration
        #[error("Configuration error: {0}")]
        Config(String),

        /// I/O error
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// Report serialization error
        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        /// Configuration file parse error
        #[error("TOML error: {0}")]
        Toml(#[from] toml::de::Error),
    }

    /// Result type for harness operations
    pub type HarnessResult<T> = Result<T, HarnessError>;
}

pub use error::{HarnessError, HarnessResult};

// Prelude module for convenient imports
pub mod prelude {
    //! Commonly used harness and testbed types

    pub use crate::error::{HarnessError, HarnessResult};
    pub use crate::lockstep::{LockStep, ReplayConfig, ReplayReport};
    pub use crate::monitor::{init_tracing, MonitorConfig, RunMonitor};
    pub use consensus_testbed::{NetworkSnapshot, Replayable, SimConfig, SimError};
}
