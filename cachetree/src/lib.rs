// Layers, bottom up:
//  - storage: byte objects behind a `StorageBackend` (memory or block file)
//  - node: data/index node payloads and their binary encoding
//  - cache: bounded set of resident nodes, relocating evicted ones to storage
//  - tree: the B+ tree, addressing its children only through the cache
//
// Every operation on the tree:
// 1. Descends from the root, pinning each node on the path
// 2. Mutates the leaf and splits or rebalances upward as needed
// 3. Reorders the path in the cache and trims it back to capacity

pub mod cache;
pub mod config;
pub mod locator;
pub mod node;
pub mod shared;
pub mod simulation;
pub mod storage;
pub mod tree;

#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
mod testing;

pub use cache::{CacheError, CacheState, ObjectCache};
pub use config::{ConfigError, TreeConfig};
pub use locator::Locator;
pub use shared::SharedTree;
pub use storage::{FileStorage, MemoryStorage, StorageBackend, StorageError};
pub use tree::{BPlusTree, TreeError, TreeStats};
