//! Whole-tree traversals: range scans, structure statistics and listings.

use std::io::Write;
use std::ops::{Bound, RangeBounds};

use crate::locator::Locator;
use crate::node::{NodePayload, TreeKey, TreeValue};
use crate::storage::StorageBackend;
use crate::tree::{BPlusTree, Holder, TreeError};

/// Shape of the tree, gathered by a full traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Levels from the root to the deepest leaf, counting both.
    pub depth: usize,
    /// Whether every leaf sits at the same depth.
    pub uniform_depth: bool,
    /// Total key/value entries.
    pub entries: usize,
    pub data_nodes: usize,
    pub index_nodes: usize,
    /// Entry counts of the leaves, in key order.
    pub leaf_sizes: Vec<usize>,
    /// Non-root nodes holding fewer entities than the minimum.
    pub underfull_nodes: usize,
    /// Nodes holding more entities than the degree.
    pub overfull_nodes: usize,
}

impl TreeStats {
    /// Smallest leaf, if any.
    #[must_use]
    pub fn min_leaf_size(&self) -> Option<usize> {
        self.leaf_sizes.iter().copied().min()
    }

    /// Largest leaf, if any.
    #[must_use]
    pub fn max_leaf_size(&self) -> Option<usize> {
        self.leaf_sizes.iter().copied().max()
    }
}

impl<K: TreeKey, V: TreeValue, S: StorageBackend> BPlusTree<K, V, S> {
    /// Collect the entries whose keys fall in `range`, in key order.
    pub fn scan<R: RangeBounds<K>>(&mut self, range: R) -> Result<Vec<(K, V)>, TreeError> {
        let mut found = Vec::new();
        self.walk(
            |pivots, index| child_overlaps(pivots, index, &range),
            |_, _, payload| {
                if let NodePayload::Data(node) = payload {
                    found.extend(
                        node.entries
                            .iter()
                            .filter(|entry| range.contains(&entry.key))
                            .map(|entry| (entry.key.clone(), entry.value.clone())),
                    );
                }
                Ok(())
            },
        )?;
        Ok(found)
    }

    /// Number of entries.
    pub fn len(&mut self) -> Result<usize, TreeError> {
        Ok(self.stats()?.entries)
    }

    /// Check whether the tree holds no entries.
    pub fn is_empty(&mut self) -> Result<bool, TreeError> {
        let root = self.root;
        let (_, handle) = self.load(&Holder::Root, root)?;
        let empty = handle.read()?.payload().as_data().is_some_and(|node| node.is_empty());
        drop(handle);
        self.cache.trim();
        Ok(empty)
    }

    /// Gather structure statistics.
    pub fn stats(&mut self) -> Result<TreeStats, TreeError> {
        let degree = self.degree;
        let mut stats = TreeStats {
            uniform_depth: true,
            ..TreeStats::default()
        };
        let mut leaf_depth = None;

        self.walk(
            |_, _| true,
            |depth, _, payload| {
                if depth > 0 && payload.is_underflow(degree) {
                    stats.underfull_nodes += 1;
                }
                if payload.requires_split(degree) {
                    stats.overfull_nodes += 1;
                }
                stats.depth = stats.depth.max(depth + 1);

                match payload {
                    NodePayload::Data(node) => {
                        stats.data_nodes += 1;
                        stats.entries += node.len();
                        stats.leaf_sizes.push(node.len());
                        match leaf_depth {
                            None => leaf_depth = Some(depth),
                            Some(expected) if expected != depth => stats.uniform_depth = false,
                            Some(_) => {}
                        }
                    }
                    NodePayload::Index(_) => stats.index_nodes += 1,
                }
                Ok(())
            },
        )?;
        Ok(stats)
    }

    /// Write an indented pre-order listing of every node.
    pub fn print<W: Write>(&mut self, out: &mut W) -> Result<(), TreeError> {
        self.walk(
            |_, _| true,
            |depth, locator, payload| {
                let indent = depth * 2;
                match payload {
                    NodePayload::Index(node) => {
                        writeln!(out, "{:indent$}index {locator} {:?}", "", node.pivots)?;
                    }
                    NodePayload::Data(node) => {
                        let keys: Vec<&K> = node.entries.iter().map(|entry| &entry.key).collect();
                        writeln!(out, "{:indent$}data {locator} {keys:?}", "")?;
                    }
                }
                Ok(())
            },
        )
    }

    /// Visit nodes depth first, children in key order.
    ///
    /// `follow(pivots, index)` decides whether child `index` is entered.
    /// Loads go through `load`, so superseded locators are relinked on the
    /// way.
    fn walk<F, G>(&mut self, follow: F, mut visit: G) -> Result<(), TreeError>
    where
        F: Fn(&[K], usize) -> bool,
        G: FnMut(usize, Locator, &NodePayload<K, V>) -> Result<(), TreeError>,
    {
        let mut stack = vec![(Holder::Root, self.root, 0)];
        while let Some((holder, locator, depth)) = stack.pop() {
            let (locator, handle) = self.load(&holder, locator)?;
            drop(holder);

            let object = handle.read()?;
            visit(depth, locator, object.payload())?;
            if let NodePayload::Index(node) = object.payload() {
                for index in (0..node.children.len()).rev() {
                    if follow(&node.pivots, index) {
                        let holder = Holder::Slot {
                            parent: handle.clone(),
                            index,
                        };
                        stack.push((holder, node.children[index], depth + 1));
                    }
                }
            }
        }

        self.cache.trim();
        Ok(())
    }
}

/// Check whether child `index`'s key span can intersect `range`.
fn child_overlaps<K: Ord, R: RangeBounds<K>>(pivots: &[K], index: usize, range: &R) -> bool {
    let below = index
        .checked_sub(1)
        .and_then(|i| pivots.get(i))
        .is_some_and(|lower| match range.end_bound() {
            Bound::Included(end) => end < lower,
            Bound::Excluded(end) => end <= lower,
            Bound::Unbounded => false,
        });
    let above = pivots
        .get(index)
        .is_some_and(|upper| match range.start_bound() {
            Bound::Included(start) | Bound::Excluded(start) => start >= upper,
            Bound::Unbounded => false,
        });
    !below && !above
}
