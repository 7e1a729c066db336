//! Small tree of degree 3, small enough to check node by node.

use crate::config::TreeConfig;
use crate::testing::memory_tree;
use crate::tree::TreeError;

#[test]
fn test_five_keys_split_root_once() {
    let mut tree = memory_tree(TreeConfig::new(3));
    for k in 1..=5 {
        tree.insert(k, k).expect("insert");
    }

    let stats = tree.stats().expect("stats");
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.index_nodes, 1);
    assert_eq!(stats.leaf_sizes, vec![2, 3]);

    let mut out = Vec::new();
    tree.print(&mut out).expect("print");
    let listing = String::from_utf8(out).expect("utf8");
    assert!(listing.lines().next().is_some_and(|l| l.ends_with("[3]")));
}

#[test]
fn test_seven_keys_give_two_pivot_root() {
    let mut tree = memory_tree(TreeConfig::new(3));
    for k in 1..=7 {
        tree.insert(k, k).expect("insert");
    }

    // Two leaves hold at most six keys, so the seventh forces a third leaf
    let stats = tree.stats().expect("stats");
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.index_nodes, 1);

    let mut out = Vec::new();
    tree.print(&mut out).expect("print");
    let listing = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("index ") && lines[0].ends_with("[3, 5]"));
    assert!(lines[1].trim_start().starts_with("data ") && lines[1].ends_with("[1, 2]"));
    assert!(lines[2].ends_with("[3, 4]"));
    assert!(lines[3].ends_with("[5, 6, 7]"));
}

#[test]
fn test_seven_keys_then_remove_everything() {
    let mut tree = memory_tree(TreeConfig::new(3));
    for k in 1..=7 {
        tree.insert(k, k).expect("insert");
    }

    let stats = tree.stats().expect("stats");
    assert!(stats.uniform_depth);
    assert!(stats.max_leaf_size().is_some_and(|n| n <= 3));
    assert_eq!(stats.leaf_sizes, vec![2, 2, 3]);

    assert_eq!(tree.search(&4).expect("search"), 4);
    assert_eq!(tree.remove(&4).expect("remove"), 4);
    assert!(matches!(tree.search(&4), Err(TreeError::KeyDoesNotExist)));
    assert!(matches!(tree.remove(&4), Err(TreeError::KeyDoesNotExist)));

    for k in [1, 2, 3, 5, 6, 7] {
        assert_eq!(tree.remove(&k).expect("remove"), k);
        let stats = tree.stats().expect("stats");
        assert!(stats.uniform_depth);
        assert_eq!(stats.underfull_nodes, 0);
    }

    let stats = tree.stats().expect("stats");
    assert_eq!(stats.index_nodes, 0);
    assert_eq!(stats.data_nodes, 1);
    assert!(tree.is_empty().expect("is_empty"));
}
