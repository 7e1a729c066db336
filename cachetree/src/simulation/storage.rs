//! Fault-injecting storage wrapper.
//!
//! Wraps any `StorageBackend` and fails reads, writes or commits with a
//! seeded probability, so the same seed always fails the same calls.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::locator::{Locator, LocatorTag};
use crate::storage::{StorageBackend, StorageError, StorageInit};

/// Configuration for fault injection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    /// Probability of a failed `get_object` (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a failed `add_object` (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a failed `commit` (0.0 - 1.0).
    pub commit_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Fail only writes, at the given rate.
    #[must_use]
    pub const fn write_faults(rate: f64) -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: rate,
            commit_error_rate: 0.0,
        }
    }

    /// Fail only reads, at the given rate.
    #[must_use]
    pub const fn read_faults(rate: f64) -> Self {
        Self {
            read_error_rate: rate,
            write_error_rate: 0.0,
            commit_error_rate: 0.0,
        }
    }
}

/// Statistics about the wrapped backend's traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FaultStats {
    pub reads: u64,
    pub writes: u64,
    pub commits: u64,
    pub injected_read_errors: u64,
    pub injected_write_errors: u64,
    pub injected_commit_errors: u64,
}

/// A backend that forwards to `inner` but fails calls at random.
#[derive(Debug)]
pub struct FaultyStorage<S> {
    inner: S,
    config: FaultConfig,
    rng: StdRng,
    stats: FaultStats,
}

impl<S: StorageBackend> FaultyStorage<S> {
    /// Wrap `inner` with the given seed and fault rates.
    #[must_use]
    pub fn new(inner: S, seed: u64, config: FaultConfig) -> Self {
        Self {
            inner,
            config,
            rng: StdRng::seed_from_u64(seed),
            stats: FaultStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &FaultStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub const fn set_fault_config(&mut self, config: FaultConfig) {
        self.config = config;
    }

    /// Get a reference to the wrapped backend.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the backend.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }
}

impl<S: StorageBackend> StorageBackend for FaultyStorage<S> {
    fn init(&mut self) -> Result<StorageInit, StorageError> {
        self.inner.init()
    }

    fn get_object(&mut self, locator: Locator) -> Result<Vec<u8>, StorageError> {
        self.stats.reads += 1;
        if self.should_inject_fault(self.config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StorageError::InjectedFault(format!("read of {locator}")));
        }
        self.inner.get_object(locator)
    }

    fn add_object(&mut self, hint: Option<Locator>, bytes: &[u8]) -> Result<Locator, StorageError> {
        self.stats.writes += 1;
        if self.should_inject_fault(self.config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StorageError::InjectedFault(format!(
                "write of {} bytes",
                bytes.len()
            )));
        }
        self.inner.add_object(hint, bytes)
    }

    fn remove(&mut self, locator: Locator) -> Result<(), StorageError> {
        self.inner.remove(locator)
    }

    fn write_position(&self) -> u32 {
        self.inner.write_position()
    }

    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn media_tag(&self) -> LocatorTag {
        self.inner.media_tag()
    }

    fn commit(
        &mut self,
        root: Locator,
        degree: usize,
        cache_capacity: usize,
    ) -> Result<(), StorageError> {
        self.stats.commits += 1;
        if self.should_inject_fault(self.config.commit_error_rate) {
            self.stats.injected_commit_errors += 1;
            return Err(StorageError::InjectedFault("commit".to_string()));
        }
        self.inner.commit(root, degree, cache_capacity)
    }
}
