//! Insert a range, then delete it in different orders.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::TreeConfig;
use crate::testing::memory_tree;
use crate::tree::TreeError;

fn insert_then_remove(degree: usize, capacity: usize, order: &[u64]) {
    let mut tree = memory_tree(TreeConfig::new(degree).with_cache_capacity(capacity));
    let count = order.len() as u64;
    for k in 0..count {
        tree.insert(k, k).expect("insert");
    }

    for (i, &k) in order.iter().enumerate() {
        assert_eq!(tree.remove(&k).expect("remove"), k);
        if i % 25 == 0 {
            let stats = tree.stats().expect("stats");
            assert!(stats.uniform_depth);
            assert_eq!(stats.underfull_nodes, 0);
            assert_eq!(stats.entries, order.len() - i - 1);
        }
    }

    for k in 0..count {
        assert!(matches!(tree.search(&k), Err(TreeError::KeyDoesNotExist)));
    }
    let stats = tree.stats().expect("stats");
    assert_eq!(stats.index_nodes, 0);
    assert_eq!(stats.data_nodes, 1);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_remove_ascending() {
    let order: Vec<u64> = (0..200).collect();
    for degree in [3, 4, 5] {
        insert_then_remove(degree, 32, &order);
    }
}

#[test]
fn test_remove_descending() {
    let order: Vec<u64> = (0..200).rev().collect();
    for degree in [3, 4, 5] {
        insert_then_remove(degree, 32, &order);
    }
}

#[test]
fn test_remove_shuffled_under_eviction() {
    let mut rng = StdRng::seed_from_u64(17);
    let mut order: Vec<u64> = (0..200).collect();
    for degree in [3, 4, 6] {
        order.shuffle(&mut rng);
        insert_then_remove(degree, 3, &order);
    }
}
