//! Deterministic simulation testing.
//!
//! - seeded random workloads, checked against a `BTreeMap` after every
//!   operation and with periodic structural checks
//! - a storage wrapper that fails reads, writes or commits on demand
//!
//! Given the same seed, a run performs the same operations and hits the
//! same faults.
//!
//! # Usage
//!
//! ```
//! use cachetree::simulation::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_write_fault_rate(0.05);
//! let result = Simulator::new(config).run(500);
//! assert!(result.passed());
//! ```

mod simulator;
mod storage;

pub use simulator::{SimulationResult, Simulator, SimulatorConfig, Violation};
pub use storage::{FaultConfig, FaultStats, FaultyStorage};
