//! Pending-remap table.
//!
//! When a resident object is relocated its transient locator retires. The
//! table bridges the gap until the single holder of that locator (a parent
//! child slot, the tree root, or a traversal in progress) has observed the
//! replacement.

use std::collections::HashMap;

use crate::cache::ObjectHandle;
use crate::locator::Locator;

/// State of one retired locator.
#[derive(Debug)]
pub enum Relocation<K, V> {
    /// The object is being persisted and is reachable only through here.
    InFlight(ObjectHandle<K, V>),
    /// The object now lives under the given persistent locator.
    Settled(Locator),
}

/// Old locator to relocation state.
#[derive(Debug)]
pub struct RemapTable<K, V> {
    entries: HashMap<Locator, Relocation<K, V>>,
}

impl<K, V> RemapTable<K, V> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether `old` has a pending entry.
    #[must_use]
    pub fn contains(&self, old: Locator) -> bool {
        self.entries.contains_key(&old)
    }

    /// Record that the object behind `old` is being relocated.
    pub fn begin(&mut self, old: Locator, handle: ObjectHandle<K, V>) {
        self.entries.insert(old, Relocation::InFlight(handle));
    }

    /// Record that `old` now resolves to `new`.
    pub fn settle(&mut self, old: Locator, new: Locator) {
        self.entries.insert(old, Relocation::Settled(new));
    }

    /// Cancel an in-flight relocation, returning the object.
    ///
    /// Settled entries are left in place.
    pub fn abort(&mut self, old: Locator) -> Option<ObjectHandle<K, V>> {
        match self.entries.remove(&old) {
            Some(Relocation::InFlight(handle)) => Some(handle),
            Some(settled @ Relocation::Settled(_)) => {
                self.entries.insert(old, settled);
                None
            }
            None => None,
        }
    }

    /// Look up where `old` settled, without consuming the entry.
    #[must_use]
    pub fn settled(&self, old: Locator) -> Option<Locator> {
        match self.entries.get(&old) {
            Some(Relocation::Settled(new)) => Some(*new),
            _ => None,
        }
    }

    /// Check whether `old` is still being relocated.
    #[must_use]
    pub fn is_in_flight(&self, old: Locator) -> bool {
        matches!(self.entries.get(&old), Some(Relocation::InFlight(_)))
    }

    /// Remove and return the entry for `old`.
    pub fn take(&mut self, old: Locator) -> Option<Relocation<K, V>> {
        self.entries.remove(&old)
    }
}

impl<K, V> Default for RemapTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
