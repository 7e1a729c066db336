//! Locators handed out by the cache stay valid until their object leaves.

use crate::cache::{CacheError, ObjectCache};
use crate::node::{DataNode, NodePayload};
use crate::storage::MemoryStorage;

fn leaf(key: u64) -> NodePayload<u64, u64> {
    let mut node = DataNode::new();
    node.insert(key, key, 8).expect("insert");
    NodePayload::Data(node)
}

#[test]
fn test_resident_locator_is_stable() {
    let mut cache: ObjectCache<u64, u64, MemoryStorage> =
        ObjectCache::new(MemoryStorage::new(64), 3, 8);
    let a = cache.create_object(leaf(1));

    for _ in 0..5 {
        let (_, moved) = cache.get_object(a).expect("get");
        assert!(moved.is_none());
    }

    // Pushing `a` to the LRU end and past capacity retires it
    let _b = cache.create_object(leaf(2));
    let _c = cache.create_object(leaf(3));
    let _d = cache.create_object(leaf(4));
    assert!(!cache.contains(a));

    let (handle, moved) = cache.get_object(a).expect("reload");
    let fresh = moved.expect("superseded");
    assert_eq!(handle.read().expect("read").payload().len(), 1);
    drop(handle);

    // The old locator is gone for good once its holder has the new one
    assert!(matches!(
        cache.get_object(a),
        Err(CacheError::UnknownLocator(_))
    ));
    let (_, moved) = cache.get_object(fresh).expect("get fresh");
    assert!(moved.is_none());
}

#[test]
fn test_every_relocation_changes_the_locator() {
    let mut cache: ObjectCache<u64, u64, MemoryStorage> =
        ObjectCache::new(MemoryStorage::new(64), 1, 8);
    let mut current = cache.create_object(leaf(1));
    let mut seen = vec![current];

    for round in 0..5 {
        // Force the object out, then bring it back
        let filler = cache.create_object(leaf(100 + round));
        cache.remove(filler).expect("remove filler");
        let relocated = cache.relocate(current).expect("relocate");
        let (_, moved) = cache.get_object(relocated).expect("load");
        current = moved.expect("loaded under a transient locator");
        assert!(!seen.contains(&current));
        seen.push(current);
    }
}
