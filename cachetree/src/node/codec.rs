//! Node wire format.
//!
//! Layout:
//! - `node_kind`: 1 byte (1 = data, 2 = index)
//! - `count`: 4 bytes LE (entries for data nodes, pivots for index nodes)
//! - data node: `count` keys, then `count` values
//! - index node: `count` pivots, then `count + 1` locators (9 bytes each)
//! - `checksum`: 4 bytes LE, CRC32 of everything before it

// Node sizes are bounded by the degree, far below u32::MAX.
#![allow(clippy::cast_possible_truncation)]

use crate::locator::{LOCATOR_SIZE, Locator};
use crate::node::{
    DataEntry, DataNode, IndexNode, NodeError, NodeKind, NodePayload, TreeKey, TreeValue,
};

/// Size of the fixed node header (kind + count).
const HEADER_SIZE: usize = 5;

/// Size of the checksum trailer.
const CHECKSUM_SIZE: usize = 4;

/// Serialize a node payload.
///
/// Fails if an index node still references a transient child: bytes handed
/// to a storage backend must stay meaningful after the cache forgets them.
pub fn encode<K: TreeKey, V: TreeValue>(payload: &NodePayload<K, V>) -> Result<Vec<u8>, NodeError> {
    let mut buf = Vec::with_capacity(encoded_len(payload));
    buf.push(payload.kind() as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());

    match payload {
        NodePayload::Data(node) => {
            for entry in &node.entries {
                entry.key.write_to(&mut buf);
            }
            for entry in &node.entries {
                entry.value.write_to(&mut buf);
            }
        }
        NodePayload::Index(node) => {
            for pivot in &node.pivots {
                pivot.write_to(&mut buf);
            }
            for &child in &node.children {
                if child.is_transient() {
                    return Err(NodeError::TransientChild(child));
                }
                buf.extend_from_slice(&child.to_bytes());
            }
        }
    }

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Deserialize a node payload, verifying its checksum.
pub fn decode<K: TreeKey, V: TreeValue>(bytes: &[u8]) -> Result<NodePayload<K, V>, NodeError> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(NodeError::Truncated {
            expected: HEADER_SIZE + CHECKSUM_SIZE,
            actual: bytes.len(),
        });
    }

    let kind = NodeKind::try_from(bytes[0]).map_err(NodeError::InvalidNodeType)?;
    let count = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;

    let body_len = match kind {
        NodeKind::Data => count * (K::SIZE + V::SIZE),
        NodeKind::Index => count * K::SIZE + (count + 1) * LOCATOR_SIZE,
    };
    let expected = HEADER_SIZE + body_len + CHECKSUM_SIZE;
    if bytes.len() < expected {
        return Err(NodeError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    let content_end = HEADER_SIZE + body_len;
    let stored = u32::from_le_bytes([
        bytes[content_end],
        bytes[content_end + 1],
        bytes[content_end + 2],
        bytes[content_end + 3],
    ]);
    let actual = crc32fast::hash(&bytes[..content_end]);
    if stored != actual {
        return Err(NodeError::ChecksumMismatch {
            expected: stored,
            actual,
        });
    }

    let mut offset = HEADER_SIZE;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(K::read_from(&bytes[offset..]));
        offset += K::SIZE;
    }

    match kind {
        NodeKind::Data => {
            let mut entries = Vec::with_capacity(count);
            for key in keys {
                let value = V::read_from(&bytes[offset..]);
                offset += V::SIZE;
                entries.push(DataEntry { key, value });
            }
            Ok(NodePayload::Data(DataNode::from_entries(entries)))
        }
        NodeKind::Index => {
            let mut children = Vec::with_capacity(count + 1);
            for _ in 0..=count {
                let mut raw = [0u8; LOCATOR_SIZE];
                raw.copy_from_slice(&bytes[offset..offset + LOCATOR_SIZE]);
                children.push(Locator::from_bytes(&raw).map_err(NodeError::InvalidLocatorTag)?);
                offset += LOCATOR_SIZE;
            }
            Ok(NodePayload::Index(IndexNode::from_parts(keys, children)))
        }
    }
}

/// Exact size of the encoded form of `payload`.
#[must_use]
pub fn encoded_len<K: TreeKey, V: TreeValue>(payload: &NodePayload<K, V>) -> usize {
    let body = match payload {
        NodePayload::Data(node) => node.len() * (K::SIZE + V::SIZE),
        NodePayload::Index(node) => {
            node.pivots.len() * K::SIZE + node.children.len() * LOCATOR_SIZE
        }
    };
    HEADER_SIZE + body + CHECKSUM_SIZE
}
