//! Seeded workload driver checked against a `BTreeMap` oracle.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::cache::{CacheError, CacheState};
use crate::config::TreeConfig;
use crate::simulation::storage::{FaultConfig, FaultStats, FaultyStorage};
use crate::storage::{MemoryStorage, StorageBackend, StorageError};
use crate::tree::{BPlusTree, TreeError};

/// Configuration for the simulator.
#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Tree and cache sizing.
    pub tree: TreeConfig,
    /// Keys are drawn from `0..key_space`.
    pub key_space: u64,
    /// Share of operations that insert (the rest split between removes and
    /// searches).
    pub insert_ratio: f64,
    /// Share of operations that remove.
    pub remove_ratio: f64,
    /// Run a structural check every this many operations (0 disables).
    pub check_every: usize,
    /// Flush every this many operations (0 disables).
    pub flush_every: usize,
    /// Probability that a storage write fails.
    pub write_fault_rate: f64,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            tree: TreeConfig::new(4).with_cache_capacity(8),
            key_space: 512,
            insert_ratio: 0.5,
            remove_ratio: 0.3,
            check_every: 100,
            flush_every: 0,
            write_fault_rate: 0.0,
        }
    }

    /// Set the tree configuration.
    #[must_use]
    pub const fn with_tree(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }

    /// Set the key space.
    #[must_use]
    pub const fn with_key_space(mut self, key_space: u64) -> Self {
        self.key_space = key_space;
        self
    }

    /// Set the operation mix.
    #[must_use]
    pub const fn with_mix(mut self, insert_ratio: f64, remove_ratio: f64) -> Self {
        self.insert_ratio = insert_ratio;
        self.remove_ratio = remove_ratio;
        self
    }

    /// Flush periodically.
    #[must_use]
    pub const fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    /// Fail storage writes at the given rate.
    ///
    /// Failed writes abort evictions and flushes, never tree operations, so
    /// the oracle stays exact.
    #[must_use]
    pub const fn with_write_fault_rate(mut self, rate: f64) -> Self {
        self.write_fault_rate = rate;
        self
    }
}

/// A detected mismatch between the tree and the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Index of the operation after which it was detected.
    pub operation: usize,
    pub message: String,
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    pub operations: usize,
    pub inserts: u64,
    pub removes: u64,
    pub searches: u64,
    /// Flushes that failed on an injected fault.
    pub failed_flushes: u64,
    /// Entries in the oracle at the end.
    pub final_entries: usize,
    pub violations: Vec<Violation>,
    pub cache: CacheState,
    pub faults: FaultStats,
    /// Error that stopped the run, if any.
    pub error: Option<String>,
}

impl SimulationResult {
    /// Check if the simulation passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.error.is_none() && self.violations.is_empty()
    }
}

#[derive(Debug, Default)]
struct Counters {
    inserts: u64,
    removes: u64,
    searches: u64,
    failed_flushes: u64,
}

/// Drives random operations against a tree and a `BTreeMap`.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    oracle: BTreeMap<u64, u64>,
    violations: Vec<Violation>,
    counters: Counters,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            oracle: BTreeMap::new(),
            violations: Vec::new(),
            counters: Counters::default(),
        }
    }

    /// Run against a fresh in-memory store.
    pub fn run(&mut self, operations: usize) -> SimulationResult {
        let storage = MemoryStorage::new(self.config.tree.block_size);
        self.run_with(storage, operations)
    }

    /// Run against `storage`, which must be empty.
    pub fn run_with<S: StorageBackend>(&mut self, storage: S, operations: usize) -> SimulationResult {
        let faults = FaultConfig::write_faults(self.config.write_fault_rate);
        let storage = FaultyStorage::new(storage, self.config.seed, faults);

        let mut tree = match BPlusTree::open(self.config.tree, storage) {
            Ok(tree) => tree,
            Err(e) => return self.result(0, CacheState::default(), FaultStats::default(), Some(e)),
        };

        info!(seed = self.config.seed, operations, "starting simulation");
        let mut error = None;
        let mut completed = 0;
        for op in 0..operations {
            if let Err(e) = self.step(&mut tree, op) {
                error = Some(e);
                break;
            }
            completed = op + 1;
        }
        let error = match error {
            None => self.check_contents(&mut tree, completed).err(),
            stopped => stopped,
        };

        let cache = tree.cache_state();
        let faults = *tree.storage().stats();
        self.result(completed, cache, faults, error)
    }

    fn step<S: StorageBackend>(
        &mut self,
        tree: &mut BPlusTree<u64, u64, FaultyStorage<S>>,
        op: usize,
    ) -> Result<(), TreeError> {
        let key = self.rng.random_range(0..self.config.key_space.max(1));
        let roll = self.rng.random::<f64>();

        if roll < self.config.insert_ratio {
            let value = self.rng.random::<u64>();
            let previous = tree.insert(key, value)?;
            let expected = self.oracle.insert(key, value);
            self.counters.inserts += 1;
            if previous != expected {
                self.violate(op, format!("insert {key} replaced {previous:?}, expected {expected:?}"));
            }
        } else if roll < self.config.insert_ratio + self.config.remove_ratio {
            let removed = match tree.remove(&key) {
                Ok(value) => Some(value),
                Err(TreeError::KeyDoesNotExist) => None,
                Err(e) => return Err(e),
            };
            let expected = self.oracle.remove(&key);
            self.counters.removes += 1;
            if removed != expected {
                self.violate(op, format!("remove {key} returned {removed:?}, expected {expected:?}"));
            }
        } else {
            let found = match tree.search(&key) {
                Ok(value) => Some(value),
                Err(TreeError::KeyDoesNotExist) => None,
                Err(e) => return Err(e),
            };
            let expected = self.oracle.get(&key).copied();
            self.counters.searches += 1;
            if found != expected {
                self.violate(op, format!("search {key} found {found:?}, expected {expected:?}"));
            }
        }

        if self.config.flush_every > 0 && (op + 1) % self.config.flush_every == 0 {
            match tree.flush() {
                Ok(root) => debug!(op, %root, "flushed"),
                Err(e) if is_injected(&e) => {
                    self.counters.failed_flushes += 1;
                    debug!(op, error = %e, "flush failed on injected fault");
                }
                Err(e) => return Err(e),
            }
        }

        if self.config.check_every > 0 && (op + 1) % self.config.check_every == 0 {
            self.check_structure(tree, op)?;
        }
        Ok(())
    }

    fn check_structure<S: StorageBackend>(
        &mut self,
        tree: &mut BPlusTree<u64, u64, S>,
        op: usize,
    ) -> Result<(), TreeError> {
        let stats = tree.stats()?;
        if !stats.uniform_depth {
            self.violate(op, "leaves at different depths".to_string());
        }
        if stats.underfull_nodes > 0 || stats.overfull_nodes > 0 {
            self.violate(
                op,
                format!(
                    "{} underfull and {} overfull nodes",
                    stats.underfull_nodes, stats.overfull_nodes
                ),
            );
        }
        if stats.entries != self.oracle.len() {
            self.violate(
                op,
                format!("tree holds {} entries, oracle {}", stats.entries, self.oracle.len()),
            );
        }
        Ok(())
    }

    fn check_contents<S: StorageBackend>(
        &mut self,
        tree: &mut BPlusTree<u64, u64, S>,
        op: usize,
    ) -> Result<(), TreeError> {
        self.check_structure(tree, op)?;
        let scanned = tree.scan(..)?;
        let expected: Vec<(u64, u64)> = self.oracle.iter().map(|(&k, &v)| (k, v)).collect();
        if scanned != expected {
            self.violate(op, "full scan differs from oracle".to_string());
        }
        Ok(())
    }

    fn violate(&mut self, operation: usize, message: String) {
        debug!(operation, %message, "violation");
        self.violations.push(Violation { operation, message });
    }

    fn result(
        &mut self,
        operations: usize,
        cache: CacheState,
        faults: FaultStats,
        error: Option<TreeError>,
    ) -> SimulationResult {
        let counters = std::mem::take(&mut self.counters);
        SimulationResult {
            seed: self.config.seed,
            operations,
            inserts: counters.inserts,
            removes: counters.removes,
            searches: counters.searches,
            failed_flushes: counters.failed_flushes,
            final_entries: self.oracle.len(),
            violations: std::mem::take(&mut self.violations),
            cache,
            faults,
            error: error.map(|e| e.to_string()),
        }
    }
}

fn is_injected(error: &TreeError) -> bool {
    matches!(
        error,
        TreeError::Storage(StorageError::InjectedFault(_))
            | TreeError::Cache(CacheError::Storage(StorageError::InjectedFault(_)))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_run_passes() {
        let mut sim = Simulator::new(SimulatorConfig::new(42));
        let result = sim.run(2_000);
        assert!(result.passed(), "{result:?}");
        assert_eq!(result.operations, 2_000);
        assert!(result.cache.evictions > 0);
    }

    #[test]
    fn test_write_faults_do_not_change_results() {
        let config = SimulatorConfig::new(7)
            .with_write_fault_rate(0.2)
            .with_flush_every(250);
        let mut sim = Simulator::new(config);
        let result = sim.run(2_000);
        assert!(result.passed(), "{result:?}");
        assert!(result.faults.injected_write_errors > 0);
        assert!(result.cache.failed_evictions > 0);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let summary = |seed| {
            let result = Simulator::new(SimulatorConfig::new(seed)).run(500);
            (result.inserts, result.removes, result.searches, result.final_entries)
        };
        assert_eq!(summary(99), summary(99));
    }

    #[test]
    fn test_remove_heavy_mix_on_small_key_space() {
        let config = SimulatorConfig::new(3)
            .with_tree(TreeConfig::new(3).with_cache_capacity(2))
            .with_key_space(64)
            .with_mix(0.4, 0.5);
        let result = Simulator::new(config).run(3_000);
        assert!(result.passed(), "{result:?}");
        assert!(result.removes > result.inserts);
    }
}
