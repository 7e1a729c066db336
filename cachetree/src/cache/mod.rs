//! Tree-aware object cache.
//!
//! Keeps a bounded, LRU-ordered working set of nodes keyed by transient
//! locators and moves nodes to and from a `StorageBackend`.
//!
//! # Relocation
//!
//! Evicting a node retires its transient locator. The old locator is first
//! recorded as in flight, then settled to the persistent locator the node now
//! lives under. Whoever holds the old locator (a parent slot or the tree
//! root) learns the new one in one of two ways:
//! - `get_object` on the old locator loads the node under a fresh transient
//!   locator and returns it; the caller must store it back into the holder
//! - a dirty parent being evicted absorbs the settled locator into its slot
//!   before it is serialized
//!
//! Either way the remap entry is consumed, so the table only ever holds
//! locators whose holder has not caught up yet.
//!
//! # Eviction safety
//!
//! An entry is not evicted while its handle is referenced outside the cache,
//! or while it is dirty and references a resident child that cannot be
//! evicted. Dirty victims relocate their resident children first, so stored
//! bytes never contain a transient locator.

mod remap;

pub use remap::{Relocation, RemapTable};

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lru::LruCache;
use tracing::{debug, trace, warn};

use crate::locator::{Locator, LocatorTag};
use crate::node::{CacheObject, NodeError, NodePayload, TreeKey, TreeValue, decode, encode};
use crate::storage::{StorageBackend, StorageError};

/// Shared handle to a resident node.
///
/// The cache holds one reference; any other live clone marks the node as
/// in use and keeps it resident.
#[derive(Debug)]
pub struct ObjectHandle<K, V> {
    inner: Arc<RwLock<CacheObject<K, V>>>,
}

impl<K, V> ObjectHandle<K, V> {
    /// Wrap an object in a new handle.
    #[must_use]
    pub fn new(object: CacheObject<K, V>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(object)),
        }
    }

    /// Acquire shared access to the object.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, CacheObject<K, V>>, CacheError> {
        self.inner.read().map_err(|_| CacheError::LockPoisoned)
    }

    /// Acquire exclusive access to the object.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, CacheObject<K, V>>, CacheError> {
        self.inner.write().map_err(|_| CacheError::LockPoisoned)
    }

    /// Check whether another handle to the same object is alive.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    /// Check whether both handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, V> Clone for ObjectHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Counters kept by the cache.
#[derive(Debug, Clone, Copy, Default)]
struct CacheStats {
    hits: u64,
    misses: u64,
    loads: u64,
    evictions: u64,
    writes: u64,
    failed_evictions: u64,
}

/// Snapshot of the cache for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheState {
    /// Configured capacity.
    pub capacity: usize,
    /// Resident objects.
    pub resident: usize,
    /// Resident objects that differ from storage.
    pub dirty: usize,
    /// Retired locators whose holder has not observed the replacement.
    pub pending_remaps: usize,
    /// Lookups served from the resident set.
    pub hits: u64,
    /// Lookups that were not resident.
    pub misses: u64,
    /// Objects read back from storage.
    pub loads: u64,
    /// Objects relocated out of the resident set.
    pub evictions: u64,
    /// Objects written to storage.
    pub writes: u64,
    /// Eviction passes that ended in an error.
    pub failed_evictions: u64,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resident {}/{} (dirty {}), pending remaps {}, hits {}, misses {}, loads {}, \
             evictions {}, writes {}, failed evictions {}",
            self.resident,
            self.capacity,
            self.dirty,
            self.pending_remaps,
            self.hits,
            self.misses,
            self.loads,
            self.evictions,
            self.writes,
            self.failed_evictions
        )
    }
}

/// Bounded working set of tree nodes over a storage backend.
pub struct ObjectCache<K, V, S> {
    hot: LruCache<Locator, ObjectHandle<K, V>>,
    remaps: RemapTable<K, V>,
    storage: S,
    capacity: usize,
    eviction_lookahead: usize,
    next_transient: u64,
    /// Block just past the last object written by the current relocation
    /// pass, so one pass lays its objects out back to back.
    write_cursor: Option<u32>,
    stats: CacheStats,
}

impl<K: TreeKey, V: TreeValue, S: StorageBackend> ObjectCache<K, V, S> {
    /// Create a cache over `storage`.
    ///
    /// `capacity` is clamped to at least one object.
    pub fn new(storage: S, capacity: usize, eviction_lookahead: usize) -> Self {
        Self {
            hot: LruCache::unbounded(),
            remaps: RemapTable::new(),
            storage,
            capacity: capacity.max(1),
            eviction_lookahead,
            next_transient: 1,
            write_cursor: None,
            stats: CacheStats::default(),
        }
    }

    /// Resolve `locator` to a resident object.
    ///
    /// Returns the object and, if it had to be loaded, the transient locator
    /// it is now resident under. The caller must replace every copy of
    /// `locator` it holds with the returned one.
    pub fn get_object(
        &mut self,
        locator: Locator,
    ) -> Result<(ObjectHandle<K, V>, Option<Locator>), CacheError> {
        if let Some(handle) = self.hot.get(&locator) {
            self.stats.hits += 1;
            return Ok((handle.clone(), None));
        }
        self.stats.misses += 1;

        let source = match locator {
            Locator::Transient(_) => {
                if self.remaps.is_in_flight(locator) {
                    return Err(CacheError::RelocationInFlight(locator));
                }
                self.remaps
                    .settled(locator)
                    .ok_or(CacheError::UnknownLocator(locator))?
            }
            Locator::Persistent { .. } => locator,
        };

        let bytes = self.storage.get_object(source)?;
        let payload = decode(&bytes)?;

        // The holder is about to observe the new locator
        if locator.is_transient() {
            self.remaps.take(locator);
        }

        let fresh = self.mint();
        let handle = ObjectHandle::new(CacheObject::loaded(payload, source));
        self.hot.put(fresh, handle.clone());
        self.stats.loads += 1;
        trace!(%locator, %source, %fresh, "loaded object");

        self.trim();
        Ok((handle, Some(fresh)))
    }

    /// Admit a freshly built node and return its transient locator.
    pub fn create_object(&mut self, payload: NodePayload<K, V>) -> Locator {
        let locator = self.mint();
        self.hot
            .put(locator, ObjectHandle::new(CacheObject::new(payload)));
        trace!(%locator, "created object");

        self.trim();
        locator
    }

    /// Forget an object and release its persistent space.
    ///
    /// Removing a locator the cache has never seen is a no-op.
    pub fn remove(&mut self, locator: Locator) -> Result<(), CacheError> {
        let release = match locator {
            Locator::Persistent { .. } => Some(locator),
            Locator::Transient(_) => {
                if let Some(handle) = self.hot.pop(&locator) {
                    handle.read()?.origin()
                } else {
                    match self.remaps.take(locator) {
                        Some(Relocation::Settled(new)) => Some(new),
                        Some(Relocation::InFlight(handle)) => {
                            self.remaps.begin(locator, handle);
                            return Err(CacheError::RelocationInFlight(locator));
                        }
                        None => None,
                    }
                }
            }
        };

        if let Some(persistent) = release {
            self.storage.remove(persistent)?;
        }
        trace!(%locator, released = ?release, "removed object");
        Ok(())
    }

    /// Promote every locator of `path` to most recently used, in order.
    ///
    /// With `ensure_all_present`, a locator that is not resident is an error.
    pub fn reorder<I>(&mut self, path: I, ensure_all_present: bool) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = Locator>,
    {
        for locator in path {
            if self.hot.contains(&locator) {
                self.hot.promote(&locator);
            } else if ensure_all_present {
                return Err(CacheError::MissingFromPath(locator));
            }
        }
        Ok(())
    }

    /// Force `locator` out to storage and return where it now lives.
    ///
    /// Resident children of a dirty object are relocated with it. The caller
    /// is the holder of `locator`, so the remap entry is consumed here.
    pub fn relocate(&mut self, locator: Locator) -> Result<Locator, CacheError> {
        if !locator.is_transient() {
            return Ok(locator);
        }

        self.write_cursor = None;
        let new = if self.hot.contains(&locator) {
            self.relocate_entry(locator)?
        } else {
            self.remaps
                .settled(locator)
                .ok_or(CacheError::UnknownLocator(locator))?
        };
        self.remaps.take(locator);
        Ok(new)
    }

    /// Run eviction until the resident set fits, logging any failure.
    pub fn trim(&mut self) {
        if let Err(error) = self.evict_to_capacity() {
            self.stats.failed_evictions += 1;
            warn!(%error, resident = self.hot.len(), "eviction failed");
        }
    }

    /// Snapshot of sizes and counters.
    #[must_use]
    pub fn state(&self) -> CacheState {
        let dirty = self
            .hot
            .iter()
            .filter(|(_, handle)| handle.read().is_ok_and(|object| object.is_dirty()))
            .count();

        CacheState {
            capacity: self.capacity,
            resident: self.hot.len(),
            dirty,
            pending_remaps: self.remaps.len(),
            hits: self.stats.hits,
            misses: self.stats.misses,
            loads: self.stats.loads,
            evictions: self.stats.evictions,
            writes: self.stats.writes,
            failed_evictions: self.stats.failed_evictions,
        }
    }

    /// Check whether `locator` is resident.
    #[must_use]
    pub fn contains(&self, locator: Locator) -> bool {
        self.hot.contains(&locator)
    }

    /// Number of resident objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hot.len()
    }

    /// Check whether no object is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hot.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a reference to the storage backend.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Get a mutable reference to the storage backend.
    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Drop every resident object and return the storage backend.
    ///
    /// Dirty objects are lost; relocate the root first to keep them.
    pub fn into_storage(self) -> S {
        self.storage
    }

    const fn mint(&mut self) -> Locator {
        let id = self.next_transient;
        self.next_transient += 1;
        Locator::Transient(id)
    }

    fn evict_to_capacity(&mut self) -> Result<(), CacheError> {
        self.write_cursor = None;
        while self.hot.len() > self.capacity {
            let Some(victim) = self.pick_victim()? else {
                debug!(
                    resident = self.hot.len(),
                    capacity = self.capacity,
                    "no evictable object within lookahead"
                );
                break;
            };
            self.relocate_entry(victim)?;
        }
        Ok(())
    }

    /// Scan from the LRU tail for the first evictable entry.
    fn pick_victim(&self) -> Result<Option<Locator>, CacheError> {
        let mut skipped = 0;
        for (&locator, handle) in self.hot.iter().rev() {
            if self.is_evictable(handle)? {
                return Ok(Some(locator));
            }
            if skipped >= self.eviction_lookahead {
                break;
            }
            skipped += 1;
        }
        Ok(None)
    }

    fn is_evictable(&self, handle: &ObjectHandle<K, V>) -> Result<bool, CacheError> {
        if handle.is_shared() {
            return Ok(false);
        }

        let object = handle.read()?;
        if !object.is_dirty() {
            return Ok(true);
        }

        for &child in object.payload().children() {
            if !child.is_transient() || self.remaps.settled(child).is_some() {
                continue;
            }
            match self.hot.peek(&child) {
                Some(child_handle) => {
                    if !self.is_evictable(child_handle)? {
                        return Ok(false);
                    }
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Move one resident object to storage, leaving a settled remap entry.
    ///
    /// On failure the object goes back to the resident set, at the LRU end.
    fn relocate_entry(&mut self, old: Locator) -> Result<Locator, CacheError> {
        match self.hot.peek(&old) {
            None => return Err(CacheError::UnknownLocator(old)),
            Some(handle) if handle.is_shared() => return Err(CacheError::Pinned(old)),
            Some(_) => {}
        }
        let handle = self.hot.pop(&old).ok_or(CacheError::UnknownLocator(old))?;
        self.remaps.begin(old, handle.clone());

        match self.persist(&handle) {
            Ok(new) => {
                self.remaps.settle(old, new);
                self.stats.evictions += 1;
                trace!(%old, %new, "relocated object");
                Ok(new)
            }
            Err(error) => {
                if let Some(handle) = self.remaps.abort(old) {
                    self.hot.put(old, handle);
                    self.hot.demote(&old);
                }
                Err(error)
            }
        }
    }

    /// Write `handle` to storage if needed and return its persistent locator.
    fn persist(&mut self, handle: &ObjectHandle<K, V>) -> Result<Locator, CacheError> {
        let (dirty, origin, transient_children) = {
            let object = handle.read()?;
            let children: Vec<(usize, Locator)> = object
                .payload()
                .children()
                .iter()
                .enumerate()
                .filter(|(_, child)| child.is_transient())
                .map(|(slot, &child)| (slot, child))
                .collect();
            (object.is_dirty(), object.origin(), children)
        };

        // Clean objects already match their origin
        if let (false, Some(origin)) = (dirty, origin) {
            return Ok(origin);
        }

        for (slot, child) in transient_children {
            let resolved = match self.remaps.settled(child) {
                Some(new) => new,
                None => self.relocate_entry(child)?,
            };
            self.remaps.take(child);
            handle.write()?.set_child(slot, resolved);
            trace!(%child, %resolved, "absorbed child relocation");
        }

        let bytes = encode(handle.read()?.payload())?;
        let hint = match self.storage.media_tag() {
            LocatorTag::Persistent => Some(Locator::Persistent {
                offset: self
                    .write_cursor
                    .unwrap_or_else(|| self.storage.write_position()),
                len: 0,
            }),
            LocatorTag::Transient => None,
        };
        let new = self.storage.add_object(hint, &bytes)?;
        self.stats.writes += 1;
        if let Locator::Persistent { offset, len } = new {
            let span = len.div_ceil(self.storage.block_size().max(1)).max(1);
            self.write_cursor = Some(offset.saturating_add(span));
        }

        let previous = {
            let mut object = handle.write()?;
            let previous = object.origin();
            object.mark_persisted(new);
            previous
        };
        let released = previous
            .filter(|&previous| previous != new)
            .map(|previous| (previous, self.storage.remove(previous)));
        if let Some((previous, Err(error))) = released {
            warn!(%previous, %error, "failed to release superseded object");
        }
        Ok(new)
    }
}

impl<K, V, S: std::fmt::Debug> std::fmt::Debug for ObjectCache<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("resident", &self.hot.len())
            .field("capacity", &self.capacity)
            .field("pending_remaps", &self.remaps.len())
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur in the object cache.
#[derive(Debug)]
pub enum CacheError {
    /// A per-object lock was poisoned by a panic.
    LockPoisoned,
    /// Locator is neither resident nor pending.
    UnknownLocator(Locator),
    /// Locator was observed while its object was being relocated.
    RelocationInFlight(Locator),
    /// Object is referenced outside the cache and cannot be relocated.
    Pinned(Locator),
    /// A path entry was not resident when reordering.
    MissingFromPath(Locator),
    /// Storage error.
    Storage(StorageError),
    /// Node codec error.
    Node(NodeError),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockPoisoned => write!(f, "cache object lock poisoned"),
            Self::UnknownLocator(loc) => write!(f, "locator {loc} resolves to nothing"),
            Self::RelocationInFlight(loc) => write!(f, "locator {loc} is being relocated"),
            Self::Pinned(loc) => write!(f, "object {loc} is still referenced"),
            Self::MissingFromPath(loc) => write!(f, "path entry {loc} is not resident"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for CacheError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for CacheError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DataNode, IndexNode};
    use crate::storage::{MemoryStorage, StorageInit};

    type Cache = ObjectCache<u64, u64, MemoryStorage>;

    fn cache(capacity: usize, lookahead: usize) -> Cache {
        ObjectCache::new(MemoryStorage::new(64), capacity, lookahead)
    }

    fn leaf(keys: &[u64]) -> NodePayload<u64, u64> {
        let mut node = DataNode::new();
        for &k in keys {
            node.insert(k, k * 100, 16).expect("insert");
        }
        NodePayload::Data(node)
    }

    fn value_of(cache: &mut Cache, locator: Locator, key: u64) -> Option<u64> {
        let (handle, _) = cache.get_object(locator).expect("get");
        let object = handle.read().expect("read");
        object.payload().as_data().and_then(|d| d.get(&key).copied())
    }

    #[test]
    fn test_hit_returns_same_object() {
        let mut cache = cache(4, 8);
        let loc = cache.create_object(leaf(&[1]));

        let (a, moved_a) = cache.get_object(loc).expect("get");
        let (b, moved_b) = cache.get_object(loc).expect("get");
        assert!(moved_a.is_none());
        assert!(moved_b.is_none());
        assert!(a.ptr_eq(&b));
        assert_eq!(cache.state().hits, 2);
    }

    #[test]
    fn test_transient_ids_are_never_reused() {
        let mut cache = cache(4, 8);
        let a = cache.create_object(leaf(&[1]));
        cache.remove(a).expect("remove");
        let b = cache.create_object(leaf(&[2]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_eviction_and_reload() {
        let mut cache = cache(2, 8);
        let first = cache.create_object(leaf(&[1]));
        let _second = cache.create_object(leaf(&[2]));
        let _third = cache.create_object(leaf(&[3]));

        let state = cache.state();
        assert_eq!(state.resident, 2);
        assert_eq!(state.writes, 1);
        assert_eq!(state.pending_remaps, 1);
        assert!(!cache.contains(first));

        let (_, moved) = cache.get_object(first).expect("reload");
        let fresh = moved.expect("reloaded under a new locator");
        assert!(fresh.is_transient());
        assert_ne!(fresh, first);
        assert_eq!(cache.state().loads, 1);

        // The retired locator's remap was consumed by the load
        assert!(matches!(
            cache.get_object(first),
            Err(CacheError::UnknownLocator(_))
        ));
        assert_eq!(value_of(&mut cache, fresh, 1), Some(100));
    }

    #[test]
    fn test_pinned_tail_blocks_without_lookahead() {
        let mut cache = cache(1, 0);
        let a = cache.create_object(leaf(&[1]));
        let (pinned, _) = cache.get_object(a).expect("get");

        let _b = cache.create_object(leaf(&[2]));
        assert_eq!(cache.state().resident, 2);
        assert_eq!(cache.state().evictions, 0);
        drop(pinned);
    }

    #[test]
    fn test_lookahead_skips_pinned_tail() {
        let mut cache = cache(1, 1);
        let a = cache.create_object(leaf(&[1]));
        let (pinned, _) = cache.get_object(a).expect("get");

        let b = cache.create_object(leaf(&[2]));
        assert_eq!(cache.state().resident, 1);
        assert!(cache.contains(a));
        assert!(!cache.contains(b));
        drop(pinned);
    }

    #[test]
    fn test_relocate_cascades_to_children() {
        let mut cache = cache(8, 8);
        let left = cache.create_object(leaf(&[1, 2]));
        let right = cache.create_object(leaf(&[5, 6]));
        let parent =
            cache.create_object(NodePayload::Index(IndexNode::with_children(left, 5, right)));

        let stored = cache.relocate(parent).expect("relocate");
        let state = cache.state();
        assert_eq!(state.resident, 0);
        assert_eq!(state.writes, 3);
        assert_eq!(state.pending_remaps, 0);

        let bytes = cache.storage_mut().get_object(stored).expect("stored");
        let payload: NodePayload<u64, u64> = decode(&bytes).expect("decode");
        assert!(payload.children().iter().all(|c| !c.is_transient()));

        // Walking down from the stored root finds the data again
        let (root, moved) = cache.get_object(stored).expect("load root");
        assert!(moved.is_some());
        let child = root.read().expect("read").payload().children()[1];
        assert_eq!(value_of(&mut cache, child, 6), Some(600));
    }

    #[test]
    fn test_cascade_writes_back_to_back() {
        let mut cache: Cache = ObjectCache::new(MemoryStorage::new(16), 8, 8);
        let left = cache.create_object(leaf(&[1]));
        let stored_left = cache.relocate(left).expect("relocate");
        assert_eq!(stored_left, Locator::Persistent { offset: 0, len: 25 });

        // Rewriting the left leaf frees blocks 0..2 in the middle of the pass
        let (handle, moved) = cache.get_object(stored_left).expect("load");
        let left = moved.expect("new locator");
        handle
            .write()
            .expect("write")
            .payload_mut()
            .as_data_mut()
            .expect("data")
            .insert(2, 200, 16)
            .expect("insert");
        drop(handle);
        let right = cache.create_object(leaf(&[9]));
        let parent =
            cache.create_object(NodePayload::Index(IndexNode::with_children(left, 9, right)));

        let stored = cache.relocate(parent).expect("relocate parent");
        assert_eq!(stored, Locator::Persistent { offset: 7, len: 35 });

        let bytes = cache.storage_mut().get_object(stored).expect("stored");
        let payload: NodePayload<u64, u64> = decode(&bytes).expect("decode");
        assert_eq!(
            payload.children(),
            &[
                Locator::Persistent { offset: 2, len: 41 },
                Locator::Persistent { offset: 5, len: 25 },
            ]
        );
        assert!(!cache.storage().contains(stored_left));
    }

    #[test]
    fn test_pinned_child_fails_closed() {
        let mut cache = cache(8, 8);
        let left = cache.create_object(leaf(&[1]));
        let right = cache.create_object(leaf(&[5]));
        let parent =
            cache.create_object(NodePayload::Index(IndexNode::with_children(left, 5, right)));
        let (pinned, _) = cache.get_object(left).expect("pin");

        let result = cache.relocate(parent);
        assert!(matches!(result, Err(CacheError::Pinned(l)) if l == left));

        // Parent is back, dirty, and nothing is left in flight
        assert!(cache.contains(parent));
        assert!(cache.contains(left));
        assert!(!cache.remaps.is_in_flight(parent));
        let (handle, _) = cache.get_object(parent).expect("get parent");
        assert!(handle.read().expect("read").is_dirty());
        drop(pinned);
    }

    #[test]
    fn test_clean_object_settles_to_origin() {
        let mut cache = cache(8, 8);
        let loc = cache.create_object(leaf(&[1]));
        let stored = cache.relocate(loc).expect("relocate");
        assert_eq!(cache.state().writes, 1);

        let (_, moved) = cache.get_object(stored).expect("load");
        let fresh = moved.expect("new locator");
        let again = cache.relocate(fresh).expect("relocate clean");

        assert_eq!(again, stored);
        assert_eq!(cache.state().writes, 1);
    }

    #[test]
    fn test_rewrite_releases_previous_origin() {
        let mut cache = cache(8, 8);
        let loc = cache.create_object(leaf(&[1]));
        let stored = cache.relocate(loc).expect("relocate");

        let (handle, moved) = cache.get_object(stored).expect("load");
        let fresh = moved.expect("new locator");
        handle
            .write()
            .expect("write")
            .payload_mut()
            .as_data_mut()
            .expect("data")
            .insert(2, 200, 16)
            .expect("insert");
        drop(handle);

        let rewritten = cache.relocate(fresh).expect("relocate dirty");
        assert_ne!(rewritten, stored);
        assert!(!cache.storage().contains(stored));
        assert!(cache.storage().contains(rewritten));
        assert_eq!(cache.storage().object_count(), 1);
    }

    #[test]
    fn test_remove_releases_storage() {
        let mut cache = cache(8, 8);
        let loc = cache.create_object(leaf(&[1]));
        let stored = cache.relocate(loc).expect("relocate");
        let (_, moved) = cache.get_object(stored).expect("load");
        let fresh = moved.expect("new locator");

        cache.remove(fresh).expect("remove");
        assert!(!cache.contains(fresh));
        assert_eq!(cache.storage().object_count(), 0);

        // Removing an unknown locator is a no-op
        cache.remove(Locator::Transient(999)).expect("remove unknown");
    }

    #[test]
    fn test_remove_settled_locator() {
        let mut cache = cache(1, 8);
        let a = cache.create_object(leaf(&[1]));
        let _b = cache.create_object(leaf(&[2]));
        assert_eq!(cache.state().pending_remaps, 1);

        cache.remove(a).expect("remove");
        assert_eq!(cache.state().pending_remaps, 0);
        assert_eq!(cache.storage().object_count(), 0);
    }

    #[test]
    fn test_reorder_promotes_and_checks_presence() {
        let mut cache = cache(2, 0);
        let a = cache.create_object(leaf(&[1]));
        let b = cache.create_object(leaf(&[2]));

        // Make `a` the most recent so `b` is evicted next
        cache.reorder([b, a], true).expect("reorder");
        let _c = cache.create_object(leaf(&[3]));
        assert!(cache.contains(a));
        assert!(!cache.contains(b));

        let result = cache.reorder([b], true);
        assert!(matches!(result, Err(CacheError::MissingFromPath(l)) if l == b));
        cache.reorder([b], false).expect("lenient reorder");
    }

    /// Storage that refuses every write.
    #[derive(Debug)]
    struct ReadOnlyStorage(MemoryStorage);

    impl StorageBackend for ReadOnlyStorage {
        fn init(&mut self) -> Result<StorageInit, StorageError> {
            self.0.init()
        }

        fn get_object(&mut self, locator: Locator) -> Result<Vec<u8>, StorageError> {
            self.0.get_object(locator)
        }

        fn add_object(&mut self, _: Option<Locator>, _: &[u8]) -> Result<Locator, StorageError> {
            Err(StorageError::InjectedFault("read-only".to_string()))
        }

        fn remove(&mut self, locator: Locator) -> Result<(), StorageError> {
            self.0.remove(locator)
        }

        fn write_position(&self) -> u32 {
            self.0.write_position()
        }

        fn block_size(&self) -> u32 {
            self.0.block_size()
        }

        fn media_tag(&self) -> LocatorTag {
            self.0.media_tag()
        }

        fn commit(&mut self, root: Locator, degree: usize, capacity: usize) -> Result<(), StorageError> {
            self.0.commit(root, degree, capacity)
        }
    }

    #[test]
    fn test_failed_persist_keeps_object_resident() {
        let mut cache: ObjectCache<u64, u64, ReadOnlyStorage> =
            ObjectCache::new(ReadOnlyStorage(MemoryStorage::new(64)), 1, 8);
        let a = cache.create_object(leaf(&[1]));
        let b = cache.create_object(leaf(&[2]));

        let state = cache.state();
        assert_eq!(state.resident, 2);
        assert_eq!(state.failed_evictions, 1);
        assert_eq!(state.pending_remaps, 0);

        let (handle, moved) = cache.get_object(a).expect("still resident");
        assert!(moved.is_none());
        assert_eq!(handle.read().expect("read").payload().len(), 1);
        assert!(cache.contains(b));
    }
}
