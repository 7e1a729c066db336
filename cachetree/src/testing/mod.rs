//! Test helpers.

#![allow(clippy::expect_used)]

use std::path::PathBuf;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::config::TreeConfig;
use crate::storage::{FileStorage, MemoryStorage};
use crate::tree::BPlusTree;

pub type MemoryTree = BPlusTree<u64, u64, MemoryStorage>;
pub type FileTree = BPlusTree<u64, u64, FileStorage>;

/// Route `tracing` output through the test harness.
///
/// Filtered by `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A path named `name` inside a fresh temporary directory.
///
/// The directory is removed when the returned guard drops.
pub fn temp_path(name: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// Open a tree over a fresh in-memory store.
pub fn memory_tree(config: TreeConfig) -> MemoryTree {
    init_tracing();
    BPlusTree::open(config, MemoryStorage::new(config.block_size)).expect("open memory tree")
}

/// Open a tree over the block file at `path`, creating it if needed.
pub fn file_tree(config: TreeConfig, path: &std::path::Path) -> FileTree {
    init_tracing();
    let storage = FileStorage::open_or_create(path, config.block_size).expect("open block file");
    BPlusTree::open(config, storage).expect("open file tree")
}
