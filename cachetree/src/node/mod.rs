//! Tree node payloads and the cache wrapper that carries them.
//!
//! # Structure
//!
//! - `DataNode`: sorted key/value entries (the leaves)
//! - `IndexNode`: P pivots and P+1 child locators
//! - `NodePayload`: closed sum of the two, matched at every access site
//! - `CacheObject`: payload + dirty flag + the persistent locator it was
//!   loaded from
//!
//! # Capacity
//!
//! For a tree of degree D:
//! - a data node overflows above D entries and underflows below ⌈D/2⌉
//! - an index node overflows above D pivots and underflows below ⌊D/2⌋
//!
//! Both bounds are chosen so that an overflowing node splits into two
//! halves that are each at least minimal, and two minimal siblings (plus
//! the separator, for index nodes) always fit in one node after a merge.

mod codec;
mod data;
mod index;

pub use codec::{decode, encode, encoded_len};
pub use data::{DataEntry, DataNode};
pub use index::IndexNode;

use crate::locator::Locator;

/// A fixed-width element that can be stored in a node.
///
/// Keys and values are serialized as `SIZE` raw bytes each, which keeps the
/// node wire format a plain sequence of arrays.
pub trait FixedSize: Sized {
    /// Serialized width in bytes.
    const SIZE: usize;

    /// Append the serialized form to `out`.
    fn write_to(&self, out: &mut Vec<u8>);

    /// Read an element from the first `SIZE` bytes of `bytes`.
    ///
    /// Callers guarantee `bytes.len() >= SIZE`.
    fn read_from(bytes: &[u8]) -> Self;
}

macro_rules! impl_fixed_size_int {
    ($($t:ty),*) => {
        $(
            impl FixedSize for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn write_to(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_from(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    Self::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_fixed_size_int!(u16, u32, u64, i32, i64);

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&bytes[..N]);
        buf
    }
}

/// Bound for key types.
pub trait TreeKey: FixedSize + Ord + Clone + std::fmt::Debug + Send + Sync + 'static {}

impl<T> TreeKey for T where T: FixedSize + Ord + Clone + std::fmt::Debug + Send + Sync + 'static {}

/// Bound for value types.
pub trait TreeValue: FixedSize + Clone + std::fmt::Debug + Send + Sync + 'static {}

impl<T> TreeValue for T where T: FixedSize + Clone + std::fmt::Debug + Send + Sync + 'static {}

/// Minimum number of entries in a non-root data node.
#[must_use]
pub const fn min_data_entries(degree: usize) -> usize {
    degree.div_ceil(2)
}

/// Minimum number of pivots in a non-root index node.
#[must_use]
pub const fn min_index_pivots(degree: usize) -> usize {
    degree / 2
}

/// Node type discriminant, also the first byte of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Data = 1,
    Index = 2,
}

impl TryFrom<u8> for NodeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Data),
            2 => Ok(Self::Index),
            _ => Err(value),
        }
    }
}

/// The payload of a tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodePayload<K, V> {
    Data(DataNode<K, V>),
    Index(IndexNode<K>),
}

impl<K: TreeKey, V: TreeValue> NodePayload<K, V> {
    /// Get the node kind.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Data(_) => NodeKind::Data,
            Self::Index(_) => NodeKind::Index,
        }
    }

    /// Number of entities: entries for data nodes, pivots for index nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Data(node) => node.len(),
            Self::Index(node) => node.pivots.len(),
        }
    }

    /// Check whether the node holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Minimum entity count for a non-root node of this kind.
    #[must_use]
    pub const fn min_len(&self, degree: usize) -> usize {
        match self {
            Self::Data(_) => min_data_entries(degree),
            Self::Index(_) => min_index_pivots(degree),
        }
    }

    /// Check whether the node holds more entities than the degree allows.
    #[must_use]
    pub fn requires_split(&self, degree: usize) -> bool {
        self.len() > degree
    }

    /// Check whether one more insertion below this node can never split it.
    #[must_use]
    pub fn is_safe_for_insert(&self, degree: usize) -> bool {
        self.len() < degree
    }

    /// Check whether one more removal below this node can never underflow it.
    #[must_use]
    pub fn is_safe_for_remove(&self, degree: usize) -> bool {
        self.len() > self.min_len(degree)
    }

    /// Check whether a non-root node holds fewer entities than allowed.
    #[must_use]
    pub fn is_underflow(&self, degree: usize) -> bool {
        self.len() < self.min_len(degree)
    }

    /// Check whether a sibling can donate one entity without underflowing.
    #[must_use]
    pub fn is_borrowable(&self, degree: usize) -> bool {
        self.len() > self.min_len(degree)
    }

    /// Child locators (empty for data nodes).
    #[must_use]
    pub fn children(&self) -> &[Locator] {
        match self {
            Self::Data(_) => &[],
            Self::Index(node) => &node.children,
        }
    }

    /// Split the node at its midpoint.
    ///
    /// Returns the pivot for the parent and the new right sibling.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        match self {
            Self::Data(node) => {
                let (pivot, right) = node.split();
                (pivot, Self::Data(right))
            }
            Self::Index(node) => {
                let (pivot, right) = node.split();
                (pivot, Self::Index(right))
            }
        }
    }

    /// Borrow the data node, if this is one.
    #[must_use]
    pub const fn as_data(&self) -> Option<&DataNode<K, V>> {
        match self {
            Self::Data(node) => Some(node),
            Self::Index(_) => None,
        }
    }

    /// Mutably borrow the data node, if this is one.
    pub const fn as_data_mut(&mut self) -> Option<&mut DataNode<K, V>> {
        match self {
            Self::Data(node) => Some(node),
            Self::Index(_) => None,
        }
    }

    /// Borrow the index node, if this is one.
    #[must_use]
    pub const fn as_index(&self) -> Option<&IndexNode<K>> {
        match self {
            Self::Index(node) => Some(node),
            Self::Data(_) => None,
        }
    }

    /// Mutably borrow the index node, if this is one.
    pub const fn as_index_mut(&mut self) -> Option<&mut IndexNode<K>> {
        match self {
            Self::Index(node) => Some(node),
            Self::Data(_) => None,
        }
    }
}

/// A node as held by the object cache.
///
/// Any mutable access to the payload marks the object dirty.
#[derive(Debug)]
pub struct CacheObject<K, V> {
    payload: NodePayload<K, V>,
    dirty: bool,
    /// Persistent locator whose bytes match this object while it is clean.
    origin: Option<Locator>,
}

impl<K: TreeKey, V: TreeValue> CacheObject<K, V> {
    /// Wrap a freshly built payload. New objects start dirty.
    #[must_use]
    pub const fn new(payload: NodePayload<K, V>) -> Self {
        Self {
            payload,
            dirty: true,
            origin: None,
        }
    }

    /// Wrap a payload that was just decoded from `origin`.
    #[must_use]
    pub const fn loaded(payload: NodePayload<K, V>, origin: Locator) -> Self {
        Self {
            payload,
            dirty: false,
            origin: Some(origin),
        }
    }

    /// Borrow the payload.
    #[must_use]
    pub const fn payload(&self) -> &NodePayload<K, V> {
        &self.payload
    }

    /// Mutably borrow the payload, marking the object dirty.
    pub const fn payload_mut(&mut self) -> &mut NodePayload<K, V> {
        self.dirty = true;
        &mut self.payload
    }

    /// Check whether the object differs from its persisted bytes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persistent locator this object was loaded from or last written to.
    #[must_use]
    pub const fn origin(&self) -> Option<Locator> {
        self.origin
    }

    /// Record that the payload now matches the bytes at `origin`.
    pub const fn mark_persisted(&mut self, origin: Locator) {
        self.dirty = false;
        self.origin = Some(origin);
    }

    /// Replace the child locator at `index`, marking the object dirty.
    ///
    /// Returns false if this is not an index node or the slot does not exist.
    pub fn set_child(&mut self, index: usize, locator: Locator) -> bool {
        let Some(node) = self.payload.as_index_mut() else {
            return false;
        };
        let Some(slot) = node.children.get_mut(index) else {
            return false;
        };
        *slot = locator;
        self.dirty = true;
        true
    }
}

/// Errors that can occur when working with nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Buffer ended before the node did.
    Truncated { expected: usize, actual: usize },
    /// Unknown node type byte.
    InvalidNodeType(u8),
    /// Unknown locator tag byte inside an index node.
    InvalidLocatorTag(u8),
    /// Stored checksum does not match the content.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Attempt to serialize a node that still references a transient locator.
    TransientChild(Locator),
    /// Node is already past its degree and cannot take another entry.
    NodeFull { len: usize, degree: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { expected, actual } => {
                write!(f, "node truncated: need {expected} bytes, have {actual}")
            }
            Self::InvalidNodeType(v) => write!(f, "invalid node type: 0x{v:02x}"),
            Self::InvalidLocatorTag(v) => write!(f, "invalid locator tag: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::TransientChild(loc) => {
                write!(f, "cannot serialize transient child locator {loc}")
            }
            Self::NodeFull { len, degree } => {
                write!(f, "node full: {len} entries at degree {degree}")
            }
        }
    }
}

impl std::error::Error for NodeError {}
