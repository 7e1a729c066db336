//! Insertion order must not affect the mapping or the node size bounds.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::TreeConfig;
use crate::node::min_data_entries;
use crate::testing::{MemoryTree, memory_tree};

fn check_shape(tree: &mut MemoryTree, degree: usize, count: usize) {
    let stats = tree.stats().expect("stats");
    assert_eq!(stats.entries, count);
    assert!(stats.uniform_depth, "degree {degree}: leaves at different depths");
    assert_eq!(stats.underfull_nodes, 0, "degree {degree}");
    assert_eq!(stats.overfull_nodes, 0, "degree {degree}");
    if stats.data_nodes > 1 {
        assert!(
            stats
                .min_leaf_size()
                .is_some_and(|n| n >= min_data_entries(degree))
        );
    }
    assert!(stats.max_leaf_size().is_some_and(|n| n <= degree));
}

fn insert_all(degree: usize, keys: &[u64]) {
    let mut tree = memory_tree(TreeConfig::new(degree).with_cache_capacity(16));
    for &k in keys {
        assert_eq!(tree.insert(k, k * 3).expect("insert"), None);
    }
    check_shape(&mut tree, degree, keys.len());
    for &k in keys {
        assert_eq!(tree.search(&k).expect("search"), k * 3);
    }
}

#[test]
fn test_ascending() {
    let keys: Vec<u64> = (0..300).collect();
    for degree in 3..=7 {
        insert_all(degree, &keys);
    }
}

#[test]
fn test_descending() {
    let keys: Vec<u64> = (0..300).rev().collect();
    for degree in 3..=7 {
        insert_all(degree, &keys);
    }
}

#[test]
fn test_shuffled() {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut keys: Vec<u64> = (0..300).collect();
    for degree in 3..=7 {
        keys.shuffle(&mut rng);
        insert_all(degree, &keys);
    }
}

#[test]
fn test_upsert_keeps_single_entry() {
    let mut tree = memory_tree(TreeConfig::new(4));
    for k in 0..50 {
        tree.insert(k, 1).expect("insert");
    }
    for k in 0..50 {
        assert_eq!(tree.insert(k, 2).expect("upsert"), Some(1));
    }

    assert_eq!(tree.len().expect("len"), 50);
    assert!(tree.scan(..).expect("scan").iter().all(|&(_, v)| v == 2));
}
