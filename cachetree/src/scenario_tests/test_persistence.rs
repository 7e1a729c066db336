//! Flushed trees come back intact.

use crate::config::TreeConfig;
use crate::storage::{MemoryStorage, StorageBackend};
use crate::testing::{file_tree, memory_tree, temp_path};
use crate::tree::{BPlusTree, TreeError};

#[test]
fn test_file_flush_and_reopen() {
    let (_dir, path) = temp_path("reopen.ctree");
    let config = TreeConfig::new(6)
        .with_cache_capacity(5)
        .with_block_size(256);

    let root = {
        let mut tree = file_tree(config, &path);
        for k in 0..500 {
            tree.insert(k, k * k).expect("insert");
        }
        for k in (0..500).step_by(3) {
            tree.remove(&k).expect("remove");
        }
        tree.flush().expect("flush")
    };

    let mut tree = file_tree(config, &path);
    assert_eq!(tree.root(), root);
    for k in 0..500 {
        let result = tree.search(&k);
        if k % 3 == 0 {
            assert!(matches!(result, Err(TreeError::KeyDoesNotExist)));
        } else {
            assert_eq!(result.expect("search"), k * k);
        }
    }
    assert!(tree.stats().expect("stats").uniform_depth);
}

#[test]
fn test_reopen_keeps_writing() {
    let (_dir, path) = temp_path("twice.ctree");
    let config = TreeConfig::new(4)
        .with_cache_capacity(4)
        .with_block_size(128);

    {
        let mut tree = file_tree(config, &path);
        for k in 0..100 {
            tree.insert(k, 1).expect("insert");
        }
        tree.flush().expect("flush");
    }
    {
        let mut tree = file_tree(config, &path);
        for k in 100..200 {
            tree.insert(k, 2).expect("insert");
        }
        tree.flush().expect("flush");
    }

    let mut tree = file_tree(config, &path);
    assert_eq!(tree.len().expect("len"), 200);
    assert_eq!(tree.search(&50).expect("search"), 1);
    assert_eq!(tree.search(&150).expect("search"), 2);
}

#[test]
fn test_reopen_after_unflushed_work_sees_last_commit() {
    let (_dir, path) = temp_path("unflushed.ctree");
    let config = TreeConfig::new(3)
        .with_cache_capacity(2)
        .with_block_size(64);

    {
        let mut tree = file_tree(config, &path);
        for k in 0..200 {
            tree.insert(k, k).expect("insert");
        }
        tree.flush().expect("flush");

        // Evictions rewrite committed nodes, but nothing is committed again
        for k in 0..200 {
            tree.insert(k, k + 1_000).expect("update");
        }
        for k in 200..400 {
            tree.insert(k, k).expect("insert");
        }
        assert!(tree.cache_state().evictions > 0);
        assert!(tree.storage().pending_free_blocks() > 0);
    }

    let mut tree = file_tree(config, &path);
    for k in 0..200 {
        assert_eq!(tree.search(&k).expect("committed key"), k);
    }
    for k in 200..400 {
        assert!(matches!(tree.search(&k), Err(TreeError::KeyDoesNotExist)));
    }
    assert_eq!(tree.len().expect("len"), 200);

    // The reopened tree keeps working on top of the reclaimed space
    for k in 0..50 {
        tree.insert(k, 7).expect("insert");
    }
    tree.flush().expect("flush");
    assert_eq!(tree.storage().pending_free_blocks(), 0);
    assert_eq!(tree.search(&10).expect("search"), 7);
    assert_eq!(tree.search(&150).expect("search"), 150);
}

#[test]
fn test_stored_degree_wins() {
    let (_dir, path) = temp_path("degree.ctree");
    {
        let mut tree = file_tree(TreeConfig::new(5).with_block_size(128), &path);
        tree.insert(1, 1).expect("insert");
        tree.flush().expect("flush");
    }

    let tree = file_tree(TreeConfig::new(9).with_block_size(128), &path);
    assert_eq!(tree.degree(), 5);
}

#[test]
fn test_memory_into_storage_round_trip() {
    let config = TreeConfig::new(4).with_cache_capacity(3);
    let mut tree = memory_tree(config);
    for k in 0..120 {
        tree.insert(k, k + 7).expect("insert");
    }
    let mut storage = tree.into_storage().expect("into storage");
    assert!(storage.init().expect("init").root.is_some());

    let mut tree = BPlusTree::<u64, u64, _>::open(config, storage).expect("reopen");
    assert_eq!(tree.search(&119).expect("search"), 126);
    assert_eq!(tree.len().expect("len"), 120);
}

#[test]
fn test_storage_released_after_removing_everything() {
    let config = TreeConfig::new(3).with_cache_capacity(4);
    let mut tree = memory_tree(config);
    for k in 0..300 {
        tree.insert(k, k).expect("insert");
    }
    tree.flush().expect("flush");
    assert!(tree.storage().object_count() > 100);

    for k in 0..300 {
        tree.remove(&k).expect("remove");
    }
    tree.flush().expect("flush");

    // Only the empty root is left
    let storage: &MemoryStorage = tree.storage();
    assert_eq!(storage.object_count(), 1);
}
