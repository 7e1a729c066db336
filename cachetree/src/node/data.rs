//! Data (leaf) nodes.

use crate::node::{NodeError, TreeKey, TreeValue};

/// A key/value entry in a data node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry<K, V> {
    pub key: K,
    pub value: V,
}

/// A leaf node: entries sorted and unique by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNode<K, V> {
    pub entries: Vec<DataEntry<K, V>>,
}

impl<K: TreeKey, V: TreeValue> DataNode<K, V> {
    /// Create a new empty data node.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create a data node from entries already sorted by key.
    #[must_use]
    pub fn from_entries(entries: Vec<DataEntry<K, V>>) -> Self {
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the node has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest key in the node.
    #[must_use]
    pub fn first_key(&self) -> Option<&K> {
        self.entries.first().map(|e| &e.key)
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &K) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.cmp(key))
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_index(key).ok().map(|i| &self.entries[i].value)
    }

    /// Insert or update an entry.
    ///
    /// Returns the old value if updating, None if inserting. A node that is
    /// already past its degree rejects new keys; the tree splits nodes as
    /// soon as they overflow, so this only fires on a broken caller.
    pub fn insert(&mut self, key: K, value: V, degree: usize) -> Result<Option<V>, NodeError> {
        match self.find_index(&key) {
            Ok(i) => Ok(Some(std::mem::replace(&mut self.entries[i].value, value))),
            Err(i) => {
                if self.entries.len() > degree {
                    return Err(NodeError::NodeFull {
                        len: self.entries.len(),
                        degree,
                    });
                }
                self.entries.insert(i, DataEntry { key, value });
                Ok(None)
            }
        }
    }

    /// Remove an entry by key.
    ///
    /// Returns the removed value if found.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.find_index(key)
            .ok()
            .map(|i| self.entries.remove(i).value)
    }

    /// Split the node, returning the split key and the new right node.
    ///
    /// The right node receives the tail half; its first key becomes the
    /// parent pivot.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        let mid = self.entries.len() / 2;
        let right_entries: Vec<DataEntry<K, V>> = self.entries.drain(mid..).collect();
        let split_key = right_entries[0].key.clone();

        (split_key, Self::from_entries(right_entries))
    }

    /// Append every entry of `right`, which must hold strictly larger keys.
    pub fn absorb(&mut self, right: Self) {
        debug_assert!(match (self.entries.last(), right.entries.first()) {
            (Some(a), Some(b)) => a.key < b.key,
            _ => true,
        });
        self.entries.extend(right.entries);
    }
}

impl<K: TreeKey, V: TreeValue> Default for DataNode<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
