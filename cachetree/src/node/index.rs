//! Index (internal) nodes.

use crate::locator::Locator;
use crate::node::TreeKey;

/// An internal node.
///
/// Stores P pivots and P+1 child locators.
/// `children[i]` holds keys < `pivots[i]`
/// `children[i+1]` holds keys >= `pivots[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode<K> {
    /// Pivots in sorted order.
    pub pivots: Vec<K>,
    /// Child locators. `children.len()` == `pivots.len()` + 1
    pub children: Vec<Locator>,
}

impl<K: TreeKey> IndexNode<K> {
    /// Create an index node with two children, as produced by a root split.
    #[must_use]
    pub fn with_children(left_child: Locator, pivot: K, right_child: Locator) -> Self {
        Self {
            pivots: vec![pivot],
            children: vec![left_child, right_child],
        }
    }

    /// Create an index node from its parts.
    #[must_use]
    pub fn from_parts(pivots: Vec<K>, children: Vec<Locator>) -> Self {
        debug_assert_eq!(children.len(), pivots.len() + 1);
        Self { pivots, children }
    }

    /// Find the child index for a given key.
    #[must_use]
    pub fn child_index(&self, key: &K) -> usize {
        match self.pivots.binary_search(key) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,
        }
    }

    /// Find the slot holding `locator`.
    #[must_use]
    pub fn position_of(&self, locator: Locator) -> Option<usize> {
        self.children.iter().position(|&c| c == locator)
    }

    /// Insert a pivot and the child to its right.
    pub fn insert(&mut self, pivot: K, right_child: Locator) {
        let idx = self.child_index(&pivot);
        self.pivots.insert(idx, pivot);
        self.children.insert(idx + 1, right_child);
    }

    /// Split the node, returning the promoted pivot and the new right node.
    ///
    /// The midpoint pivot moves up to the parent and is kept by neither half.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        let mid = self.pivots.len() / 2;

        let right_pivots: Vec<K> = self.pivots.drain(mid + 1..).collect();
        let right_children: Vec<Locator> = self.children.drain(mid + 1..).collect();

        // The remaining tail element is the promoted pivot
        let promoted = self.pivots.remove(mid);

        (promoted, Self::from_parts(right_pivots, right_children))
    }

    /// Append `right` behind this node, pulling `separator` down between them.
    pub fn absorb(&mut self, separator: K, right: Self) {
        self.pivots.push(separator);
        self.pivots.extend(right.pivots);
        self.children.extend(right.children);
    }
}
