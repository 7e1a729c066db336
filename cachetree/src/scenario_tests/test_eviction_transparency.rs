//! A cache far smaller than the tree must not change what the tree returns.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TreeConfig;
use crate::simulation::{FaultConfig, FaultyStorage, Simulator, SimulatorConfig};
use crate::storage::{MemoryStorage, StorageBackend};
use crate::testing::{file_tree, init_tracing, memory_tree, temp_path};
use crate::tree::{BPlusTree, TreeError};

fn run_against_oracle<S: StorageBackend>(tree: &mut BPlusTree<u64, u64, S>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut oracle = BTreeMap::new();

    for _ in 0..1_500 {
        let key = rng.random_range(0..400u64);
        if rng.random_bool(0.7) {
            let value = rng.random::<u64>();
            assert_eq!(tree.insert(key, value).expect("insert"), oracle.insert(key, value));
        } else {
            let removed = match tree.remove(&key) {
                Ok(value) => Some(value),
                Err(TreeError::KeyDoesNotExist) => None,
                Err(e) => panic!("remove {key}: {e}"),
            };
            assert_eq!(removed, oracle.remove(&key));
        }
    }

    for (key, value) in &oracle {
        assert_eq!(tree.search(key).expect("search"), *value);
    }
    let scanned = tree.scan(..).expect("scan");
    assert_eq!(scanned, oracle.into_iter().collect::<Vec<_>>());
}

#[test]
fn test_tiny_cache_memory_backend() {
    let mut tree = memory_tree(TreeConfig::new(4).with_cache_capacity(2));
    run_against_oracle(&mut tree, 1);

    let state = tree.cache_state();
    assert!(state.evictions > 0);
    assert!(state.loads > 0);
    assert!(state.resident <= 2);
}

#[test]
fn test_no_lookahead() {
    let config = TreeConfig::new(3)
        .with_cache_capacity(1)
        .with_eviction_lookahead(0);
    let mut tree = memory_tree(config);
    run_against_oracle(&mut tree, 2);
    assert!(tree.cache_state().evictions > 0);
}

#[test]
fn test_tiny_cache_file_backend() {
    let (_dir, path) = temp_path("transparency.ctree");
    let config = TreeConfig::new(5)
        .with_cache_capacity(4)
        .with_block_size(128);
    let mut tree = file_tree(config, &path);
    run_against_oracle(&mut tree, 3);
    assert!(tree.cache_state().writes > 0);
}

#[test]
fn test_write_faults_fail_closed() {
    init_tracing();
    let storage = FaultyStorage::new(MemoryStorage::new(64), 5, FaultConfig::write_faults(0.3));
    let config = TreeConfig::new(4).with_cache_capacity(3);
    let mut tree = BPlusTree::open(config, storage).expect("open");
    run_against_oracle(&mut tree, 4);

    assert!(tree.storage().stats().injected_write_errors > 0);
    assert!(tree.cache_state().failed_evictions > 0);
}

#[test]
fn test_simulated_workload_on_file_backend() {
    let (_dir, path) = temp_path("simulation.ctree");
    let storage = crate::storage::FileStorage::create(&path, 256).expect("create");
    let config = SimulatorConfig::new(31)
        .with_tree(TreeConfig::new(5).with_cache_capacity(6))
        .with_write_fault_rate(0.1)
        .with_flush_every(300);

    let result = Simulator::new(config).run_with(storage, 1_500);
    assert!(result.passed(), "{result:?}");
}
