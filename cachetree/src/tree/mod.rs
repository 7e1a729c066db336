//! B+-tree over the object cache.
//!
//! Nodes are reached only through `ObjectCache`, so any child locator may be
//! stale by the time it is followed. Every load goes through `load`, which
//! writes a superseding locator back into whoever held the old one (the
//! parent's child slot, or the root) before the new locator is used.
//!
//! Each operation keeps two lists while descending:
//! - the full path of visited nodes, whose handles pin them in the cache
//!   until the operation ends and which is promoted to MRU at the end
//! - the chain of ancestors that may still split (insert) or underflow
//!   (remove), restarted at every safe node
//!
//! Nodes carry no sibling links. A second holder of a locator would have no
//! way to learn about a relocation, so in-order traversal goes through the
//! parents instead.

mod inspect;
mod rebalance;

pub use inspect::TreeStats;

use tracing::{debug, info};

use crate::cache::{CacheError, CacheState, ObjectCache, ObjectHandle};
use crate::config::{ConfigError, TreeConfig};
use crate::locator::Locator;
use crate::node::{DataNode, IndexNode, NodeError, NodePayload, TreeKey, TreeValue};
use crate::storage::{StorageBackend, StorageError};

/// Whoever holds the locator being followed.
pub(crate) enum Holder<K, V> {
    /// The tree's root reference.
    Root,
    /// Child slot `index` of an index node.
    Slot {
        parent: ObjectHandle<K, V>,
        index: usize,
    },
}

/// Resident nodes visited by one operation, root first.
type Path<K, V> = Vec<(Locator, ObjectHandle<K, V>)>;

/// Result of a root-to-leaf descent.
struct Descent<K, V> {
    path: Path<K, V>,
    /// Path indices of index nodes that may still be affected.
    chain: Vec<usize>,
    /// Whether `chain` still starts at the root.
    reaches_root: bool,
}

/// An ordered key-value index whose nodes live in an `ObjectCache`.
pub struct BPlusTree<K, V, S> {
    cache: ObjectCache<K, V, S>,
    root: Locator,
    degree: usize,
}

impl<K: TreeKey, V: TreeValue, S: StorageBackend> BPlusTree<K, V, S> {
    /// Open a tree over `storage`.
    ///
    /// A store that was committed before keeps its root and degree; the
    /// cache is sized from `config`. A fresh store gets an empty data root.
    pub fn open(config: TreeConfig, mut storage: S) -> Result<Self, TreeError> {
        config.validate()?;
        let init = storage.init()?;

        let degree = match init.degree {
            Some(stored) if stored != config.degree => {
                info!(stored, configured = config.degree, "using stored degree");
                stored
            }
            Some(stored) => stored,
            None => config.degree,
        };

        let mut cache =
            ObjectCache::new(storage, config.cache_capacity, config.eviction_lookahead);
        let root = match init.root {
            Some(root) => root,
            None => cache.create_object(NodePayload::Data(DataNode::new())),
        };

        info!(
            degree,
            cache_capacity = config.cache_capacity,
            %root,
            reopened = init.root.is_some(),
            "opened tree"
        );
        Ok(Self {
            cache,
            root,
            degree,
        })
    }

    /// Insert or update a key.
    ///
    /// Returns the previous value if the key was already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, TreeError> {
        let Descent {
            path,
            mut chain,
            reaches_root,
        } = self.descend(&key, NodePayload::is_safe_for_insert)?;
        let leaf_index = path.len() - 1;

        let (previous, overflow) = {
            let mut leaf = path[leaf_index].1.write()?;
            let data = leaf
                .payload_mut()
                .as_data_mut()
                .ok_or_else(|| TreeError::invariant("descent ended on an index node"))?;
            let previous = data
                .insert(key, value, self.degree)
                .map_err(TreeError::InsertFailed)?;
            (previous, leaf.payload().requires_split(self.degree))
        };

        if overflow {
            chain.push(leaf_index);
        } else {
            chain.clear();
        }

        // Unwind, each node absorbing the sibling split off below it
        let mut pending: Option<(K, Locator)> = None;
        while let Some(index) = chain.pop() {
            let split = {
                let mut object = path[index].1.write()?;
                if let Some((pivot, sibling)) = pending.take() {
                    object
                        .payload_mut()
                        .as_index_mut()
                        .ok_or_else(|| TreeError::invariant("split propagated into a leaf"))?
                        .insert(pivot, sibling);
                }
                if object.payload().requires_split(self.degree) {
                    Some(object.payload_mut().split())
                } else {
                    None
                }
            };

            let Some((pivot, right)) = split else {
                break;
            };
            let sibling = self.cache.create_object(right);
            debug!(node = %path[index].0, %sibling, ?pivot, "split node");
            pending = Some((pivot, sibling));
        }

        if let Some((pivot, sibling)) = pending {
            if !reaches_root {
                return Err(TreeError::invariant("split propagated past a safe node"));
            }
            let old_root = self.root;
            self.root = self.cache.create_object(NodePayload::Index(IndexNode::with_children(
                old_root, pivot, sibling,
            )));
            debug!(%old_root, new_root = %self.root, "grew new root");
        }

        self.finish(path, &[])?;
        Ok(previous)
    }

    /// Look up a key.
    pub fn search(&mut self, key: &K) -> Result<V, TreeError> {
        let Descent { path, .. } = self.descend(key, |_, _| true)?;
        let found = {
            let leaf = path[path.len() - 1].1.read()?;
            leaf.payload()
                .as_data()
                .and_then(|data| data.get(key).cloned())
        };

        self.finish(path, &[])?;
        found.ok_or(TreeError::KeyDoesNotExist)
    }

    /// Check whether a key is present.
    pub fn contains(&mut self, key: &K) -> Result<bool, TreeError> {
        match self.search(key) {
            Ok(_) => Ok(true),
            Err(TreeError::KeyDoesNotExist) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Result<V, TreeError> {
        let Descent {
            path, mut chain, ..
        } = self.descend(key, NodePayload::is_safe_for_remove)?;
        let leaf_index = path.len() - 1;

        let present = path[leaf_index]
            .1
            .read()?
            .payload()
            .as_data()
            .is_some_and(|data| data.get(key).is_some());
        if !present {
            self.finish(path, &[])?;
            return Err(TreeError::KeyDoesNotExist);
        }

        let (removed, underflow) = {
            let mut leaf = path[leaf_index].1.write()?;
            let removed = leaf
                .payload_mut()
                .as_data_mut()
                .and_then(|data| data.remove(key))
                .ok_or_else(|| TreeError::invariant("key vanished after presence check"))?;
            (
                removed,
                leaf_index > 0 && leaf.payload().is_underflow(self.degree),
            )
        };

        if underflow {
            chain.push(leaf_index);
        } else {
            chain.clear();
        }

        let mut deleted = Vec::new();
        while chain.len() >= 2 {
            let Some(child_index) = chain.pop() else {
                break;
            };
            let Some(&parent_index) = chain.last() else {
                break;
            };

            let (child_locator, child) = &path[child_index];
            if !child.read()?.payload().is_underflow(self.degree) {
                break;
            }
            let parent = &path[parent_index].1;
            if let Some(gone) = self.rebalance(parent, *child_locator, child)? {
                self.cache.remove(gone)?;
                deleted.push(gone);
            }
        }

        // An index root left with a single child hands the root over to it
        let only_child = {
            let root = path[0].1.read()?;
            match root.payload() {
                NodePayload::Index(node) if node.pivots.is_empty() => node.children.first().copied(),
                _ => None,
            }
        };
        if let Some(child) = only_child {
            let old_root = self.root;
            self.root = child;
            self.cache.remove(old_root)?;
            deleted.push(old_root);
            debug!(%old_root, new_root = %child, "collapsed root");
        }

        self.finish(path, &deleted)?;
        Ok(removed)
    }

    /// Persist every resident node and record the root in storage.
    ///
    /// Afterwards nothing is resident; the next operation loads the root
    /// back.
    pub fn flush(&mut self) -> Result<Locator, TreeError> {
        let root = self.cache.relocate(self.root)?;
        self.root = root;

        let capacity = self.cache.capacity();
        self.cache
            .storage_mut()
            .commit(root, self.degree, capacity)?;
        info!(%root, state = %self.cache.state(), "flushed tree");
        Ok(root)
    }

    /// Flush and hand back the storage backend.
    pub fn into_storage(mut self) -> Result<S, TreeError> {
        self.flush()?;
        Ok(self.cache.into_storage())
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    /// Current root locator.
    #[must_use]
    pub const fn root(&self) -> Locator {
        self.root
    }

    /// Maximum entries per node.
    #[must_use]
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Get a reference to the storage backend.
    #[must_use]
    pub const fn storage(&self) -> &S {
        self.cache.storage()
    }

    /// Load a node, fixing up its holder if the locator was superseded.
    ///
    /// Returns the locator the node is resident under now.
    pub(crate) fn load(
        &mut self,
        holder: &Holder<K, V>,
        locator: Locator,
    ) -> Result<(Locator, ObjectHandle<K, V>), TreeError> {
        let (handle, moved) = self.cache.get_object(locator)?;
        match moved {
            Some(new) => {
                self.relink(holder, new)?;
                Ok((new, handle))
            }
            None => Ok((locator, handle)),
        }
    }

    /// Point `holder` at `new`, marking a parent dirty.
    pub(crate) fn relink(&mut self, holder: &Holder<K, V>, new: Locator) -> Result<(), TreeError> {
        match holder {
            Holder::Root => {
                self.root = new;
            }
            Holder::Slot { parent, index } => {
                if !parent.write()?.set_child(*index, new) {
                    return Err(TreeError::Invariant(format!(
                        "parent has no child slot {index}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Walk from the root to the leaf responsible for `key`.
    ///
    /// `is_safe` decides where the ancestor chain restarts.
    fn descend(
        &mut self,
        key: &K,
        is_safe: fn(&NodePayload<K, V>, usize) -> bool,
    ) -> Result<Descent<K, V>, TreeError> {
        let mut path = Vec::new();
        let mut chain = Vec::new();
        let mut reaches_root = true;

        let root = self.root;
        let (mut locator, mut handle) = self.load(&Holder::Root, root)?;
        loop {
            let next = {
                let object = handle.read()?;
                match object.payload() {
                    NodePayload::Index(node) => {
                        if is_safe(object.payload(), self.degree) {
                            chain.clear();
                            reaches_root = false;
                        }
                        chain.push(path.len());
                        let index = node.child_index(key);
                        Some((index, node.children[index]))
                    }
                    NodePayload::Data(_) => None,
                }
            };

            path.push((locator, handle.clone()));
            let Some((index, child)) = next else {
                break;
            };
            let holder = Holder::Slot {
                parent: handle,
                index,
            };
            (locator, handle) = self.load(&holder, child)?;
        }

        Ok(Descent {
            path,
            chain,
            reaches_root,
        })
    }

    /// Promote the path to MRU (root last), release it and trim the cache.
    fn finish(&mut self, path: Path<K, V>, deleted: &[Locator]) -> Result<(), TreeError> {
        let locators: Vec<Locator> = path
            .iter()
            .rev()
            .map(|(locator, _)| *locator)
            .filter(|locator| !deleted.contains(locator))
            .collect();
        drop(path);

        self.cache.reorder(locators, true)?;
        self.cache.trim();
        Ok(())
    }
}

impl<K, V, S: std::fmt::Debug> std::fmt::Debug for BPlusTree<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("root", &self.root)
            .field("degree", &self.degree)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Errors that can occur in tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// The key is not in the tree.
    KeyDoesNotExist,
    /// The leaf rejected the entry.
    InsertFailed(NodeError),
    /// Cache error.
    Cache(CacheError),
    /// Storage error.
    Storage(StorageError),
    /// Invalid configuration.
    Config(ConfigError),
    /// The tree structure contradicts itself; the operation was abandoned.
    Invariant(String),
    /// Writing a listing failed.
    Io(std::io::Error),
}

impl TreeError {
    fn invariant(message: &str) -> Self {
        Self::Invariant(message.to_string())
    }
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyDoesNotExist => write!(f, "key does not exist"),
            Self::InsertFailed(e) => write!(f, "insert failed: {e}"),
            Self::Cache(e) => write!(f, "cache error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Invariant(msg) => write!(f, "tree invariant violated: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InsertFailed(e) => Some(e),
            Self::Cache(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::KeyDoesNotExist | Self::Invariant(_) => None,
        }
    }
}

impl From<CacheError> for TreeError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::UnknownLocator(_)
            | CacheError::RelocationInFlight(_)
            | CacheError::MissingFromPath(_)
            | CacheError::Pinned(_) => Self::Invariant(e.to_string()),
            other => Self::Cache(other),
        }
    }
}

impl From<StorageError> for TreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for TreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for TreeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
