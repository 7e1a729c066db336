//! End-to-end scenarios through the public tree API.
//!
//! Each file covers one scenario with deterministic inputs.

#![cfg(test)]

mod test_degree_three;
mod test_eviction_transparency;
mod test_insert_orders;
mod test_locator_stability;
mod test_persistence;
mod test_remove_all;
mod test_shared_tree;
