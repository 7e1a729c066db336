//! Underflow repair: borrow from a sibling or merge with one.

use std::mem;

use tracing::debug;

use crate::cache::ObjectHandle;
use crate::locator::Locator;
use crate::node::{CacheObject, DataNode, IndexNode, NodePayload, TreeKey, TreeValue};
use crate::storage::StorageBackend;
use crate::tree::{BPlusTree, Holder, TreeError};

impl<K: TreeKey, V: TreeValue, S: StorageBackend> BPlusTree<K, V, S> {
    /// Repair the underflowing `child` of `parent`.
    ///
    /// Tries the left sibling, then the right one, for a borrow; otherwise
    /// merges. Returns the locator of the node emptied by a merge, which the
    /// caller deletes.
    pub(super) fn rebalance(
        &mut self,
        parent: &ObjectHandle<K, V>,
        child_locator: Locator,
        child: &ObjectHandle<K, V>,
    ) -> Result<Option<Locator>, TreeError> {
        let (slot, left, right) = {
            let object = parent.read()?;
            let node = object
                .payload()
                .as_index()
                .ok_or_else(|| TreeError::invariant("parent is not an index node"))?;
            let slot = node.position_of(child_locator).ok_or_else(|| {
                TreeError::Invariant(format!("{child_locator} is not a child of its parent"))
            })?;
            let left = slot.checked_sub(1).map(|i| (i, node.children[i]));
            let right = node.children.get(slot + 1).map(|&loc| (slot + 1, loc));
            (slot, left, right)
        };

        let left = match left {
            Some((index, locator)) => Some(self.load_sibling(parent, index, locator)?),
            None => None,
        };
        let borrowable = match &left {
            Some((_, sibling)) => sibling.read()?.payload().is_borrowable(self.degree),
            None => false,
        };
        if let (true, Some((_, sibling))) = (borrowable, &left) {
            borrow_from_left(parent, slot, sibling, child)?;
            debug!(node = %child_locator, "borrowed from left sibling");
            return Ok(None);
        }

        let right = match right {
            Some((index, locator)) => Some(self.load_sibling(parent, index, locator)?),
            None => None,
        };
        let borrowable = match &right {
            Some((_, sibling)) => sibling.read()?.payload().is_borrowable(self.degree),
            None => false,
        };
        if let (true, Some((_, sibling))) = (borrowable, &right) {
            borrow_from_right(parent, slot, child, sibling)?;
            debug!(node = %child_locator, "borrowed from right sibling");
            return Ok(None);
        }

        if let Some((left_locator, sibling)) = left {
            merge(parent, slot - 1, &sibling, child)?;
            debug!(from = %child_locator, into = %left_locator, "merged into left sibling");
            return Ok(Some(child_locator));
        }
        if let Some((right_locator, sibling)) = right {
            merge(parent, slot, child, &sibling)?;
            debug!(from = %right_locator, into = %child_locator, "merged right sibling");
            return Ok(Some(right_locator));
        }

        Err(TreeError::Invariant(format!(
            "{child_locator} has no sibling to rebalance with"
        )))
    }

    fn load_sibling(
        &mut self,
        parent: &ObjectHandle<K, V>,
        index: usize,
        locator: Locator,
    ) -> Result<(Locator, ObjectHandle<K, V>), TreeError> {
        let holder = Holder::Slot {
            parent: parent.clone(),
            index,
        };
        self.load(&holder, locator)
    }
}

fn index_mut<K: TreeKey, V: TreeValue>(
    object: &mut CacheObject<K, V>,
) -> Result<&mut IndexNode<K>, TreeError> {
    object
        .payload_mut()
        .as_index_mut()
        .ok_or_else(|| TreeError::invariant("parent is not an index node"))
}

fn mixed_kinds() -> TreeError {
    TreeError::invariant("siblings hold different node kinds")
}

/// Move the left sibling's last entity to the front of `child`.
///
/// The separator is `pivots[slot - 1]` of the parent.
fn borrow_from_left<K: TreeKey, V: TreeValue>(
    parent: &ObjectHandle<K, V>,
    slot: usize,
    left: &ObjectHandle<K, V>,
    child: &ObjectHandle<K, V>,
) -> Result<(), TreeError> {
    let mut parent_object = parent.write()?;
    let mut left_object = left.write()?;
    let mut child_object = child.write()?;
    let separator = &mut index_mut(&mut parent_object)?.pivots[slot - 1];

    match (left_object.payload_mut(), child_object.payload_mut()) {
        (NodePayload::Data(from), NodePayload::Data(to)) => {
            let entry = from
                .entries
                .pop()
                .ok_or_else(|| TreeError::invariant("borrowed from an empty sibling"))?;
            *separator = entry.key.clone();
            to.entries.insert(0, entry);
        }
        (NodePayload::Index(from), NodePayload::Index(to)) => {
            let (Some(pivot), Some(moved)) = (from.pivots.pop(), from.children.pop()) else {
                return Err(TreeError::invariant("borrowed from an empty sibling"));
            };
            to.pivots.insert(0, mem::replace(separator, pivot));
            to.children.insert(0, moved);
        }
        _ => return Err(mixed_kinds()),
    }
    Ok(())
}

/// Move the right sibling's first entity to the back of `child`.
///
/// The separator is `pivots[slot]` of the parent.
fn borrow_from_right<K: TreeKey, V: TreeValue>(
    parent: &ObjectHandle<K, V>,
    slot: usize,
    child: &ObjectHandle<K, V>,
    right: &ObjectHandle<K, V>,
) -> Result<(), TreeError> {
    let mut parent_object = parent.write()?;
    let mut child_object = child.write()?;
    let mut right_object = right.write()?;
    let separator = &mut index_mut(&mut parent_object)?.pivots[slot];

    match (child_object.payload_mut(), right_object.payload_mut()) {
        (NodePayload::Data(to), NodePayload::Data(from)) => {
            if from.entries.len() < 2 {
                return Err(TreeError::invariant("borrowed from an empty sibling"));
            }
            let entry = from.entries.remove(0);
            to.entries.push(entry);
            *separator = from.entries[0].key.clone();
        }
        (NodePayload::Index(to), NodePayload::Index(from)) => {
            if from.pivots.is_empty() {
                return Err(TreeError::invariant("borrowed from an empty sibling"));
            }
            let pivot = from.pivots.remove(0);
            let moved = from.children.remove(0);
            to.pivots.push(mem::replace(separator, pivot));
            to.children.push(moved);
        }
        _ => return Err(mixed_kinds()),
    }
    Ok(())
}

/// Fold `right` into `left`, dropping `pivots[left_slot]` and the right
/// child slot from the parent.
fn merge<K: TreeKey, V: TreeValue>(
    parent: &ObjectHandle<K, V>,
    left_slot: usize,
    left: &ObjectHandle<K, V>,
    right: &ObjectHandle<K, V>,
) -> Result<(), TreeError> {
    let mut parent_object = parent.write()?;
    let mut left_object = left.write()?;
    let mut right_object = right.write()?;

    if left_object.payload().kind() != right_object.payload().kind() {
        return Err(mixed_kinds());
    }
    let parent_node = index_mut(&mut parent_object)?;
    let separator = parent_node.pivots.remove(left_slot);
    parent_node.children.remove(left_slot + 1);

    let taken = mem::replace(
        right_object.payload_mut(),
        NodePayload::Data(DataNode::new()),
    );
    match (left_object.payload_mut(), taken) {
        (NodePayload::Data(into), NodePayload::Data(from)) => into.absorb(from),
        (NodePayload::Index(into), NodePayload::Index(from)) => into.absorb(separator, from),
        _ => return Err(mixed_kinds()),
    }
    Ok(())
}
