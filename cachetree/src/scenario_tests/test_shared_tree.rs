//! Many threads, one tree.

use std::thread;

use crate::config::TreeConfig;
use crate::shared::SharedTree;
use crate::testing::memory_tree;

#[test]
fn test_concurrent_disjoint_inserts() {
    let tree = SharedTree::new(memory_tree(TreeConfig::new(5).with_cache_capacity(6)));

    let workers: Vec<_> = (0..4u64)
        .map(|worker| {
            let tree = tree.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    let key = i * 4 + worker;
                    tree.insert(key, key + 1).expect("insert");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert_eq!(tree.len().expect("len"), 1_000);
    for key in 0..1_000 {
        assert_eq!(tree.search(&key).expect("search"), key + 1);
    }
    assert!(tree.cache_state().expect("state").evictions > 0);
}

#[test]
fn test_readers_and_writers() {
    let tree = SharedTree::new(memory_tree(TreeConfig::new(4).with_cache_capacity(4)));
    for key in 0..200 {
        tree.insert(key, key).expect("insert");
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            for key in (0..200).filter(|k| k % 2 == 0) {
                tree.remove(&key).expect("remove");
            }
        })
    };
    let reader = {
        let tree = tree.clone();
        thread::spawn(move || {
            // Odd keys are never touched by the writer
            for _ in 0..3 {
                for key in (0..200).filter(|k| k % 2 == 1) {
                    assert_eq!(tree.search(&key).expect("search"), key);
                }
            }
        })
    };
    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");

    assert_eq!(tree.len().expect("len"), 100);
    assert_eq!(tree.scan(..10).expect("scan"), vec![(1, 1), (3, 3), (5, 5), (7, 7), (9, 9)]);
}
