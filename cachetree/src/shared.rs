//! Thread-safe handle to a tree.
//!
//! Every operation takes the tree's mutex for its full duration, so a
//! relocation handoff is never observed half done by another thread.

use std::ops::RangeBounds;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::{CacheError, CacheState};
use crate::locator::Locator;
use crate::node::{TreeKey, TreeValue};
use crate::storage::StorageBackend;
use crate::tree::{BPlusTree, TreeError};

/// Cloneable handle sharing one `BPlusTree` between threads.
pub struct SharedTree<K, V, S> {
    inner: Arc<Mutex<BPlusTree<K, V, S>>>,
}

impl<K, V, S> Clone for SharedTree<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: TreeKey, V: TreeValue, S: StorageBackend> SharedTree<K, V, S> {
    /// Wrap a tree for shared use.
    #[must_use]
    pub fn new(tree: BPlusTree<K, V, S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tree)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BPlusTree<K, V, S>>, TreeError> {
        self.inner
            .lock()
            .map_err(|_| TreeError::Cache(CacheError::LockPoisoned))
    }

    /// See [`BPlusTree::insert`].
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>, TreeError> {
        self.lock()?.insert(key, value)
    }

    /// See [`BPlusTree::search`].
    pub fn search(&self, key: &K) -> Result<V, TreeError> {
        self.lock()?.search(key)
    }

    /// See [`BPlusTree::contains`].
    pub fn contains(&self, key: &K) -> Result<bool, TreeError> {
        self.lock()?.contains(key)
    }

    /// See [`BPlusTree::remove`].
    pub fn remove(&self, key: &K) -> Result<V, TreeError> {
        self.lock()?.remove(key)
    }

    /// See [`BPlusTree::scan`].
    pub fn scan<R: RangeBounds<K>>(&self, range: R) -> Result<Vec<(K, V)>, TreeError> {
        self.lock()?.scan(range)
    }

    /// See [`BPlusTree::len`].
    pub fn len(&self) -> Result<usize, TreeError> {
        self.lock()?.len()
    }

    /// See [`BPlusTree::is_empty`].
    pub fn is_empty(&self) -> Result<bool, TreeError> {
        self.lock()?.is_empty()
    }

    /// See [`BPlusTree::flush`].
    pub fn flush(&self) -> Result<Locator, TreeError> {
        self.lock()?.flush()
    }

    /// See [`BPlusTree::cache_state`].
    pub fn cache_state(&self) -> Result<CacheState, TreeError> {
        Ok(self.lock()?.cache_state())
    }

    /// Take the tree back once every other handle is gone.
    ///
    /// Returns the handle unchanged while it is still shared.
    pub fn try_into_inner(self) -> Result<BPlusTree<K, V, S>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner)),
            Err(inner) => Err(Self { inner }),
        }
    }
}
