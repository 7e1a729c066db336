//! Node locators.
//!
//! A locator is the indirect identity of a tree node. It is not permanent:
//! a node gets a new locator every time it is relocated between the cache
//! and a storage backend, so every holder must be ready to replace the one
//! it has.
//!
//! # Wire Format
//!
//! A locator serializes to 9 bytes:
//! - `tag`: 1 byte (0 = transient, 1 = persistent)
//! - `lo`: 4 bytes LE (block offset, or low half of a transient id)
//! - `hi`: 4 bytes LE (byte length, or high half of a transient id)

// The transient id is split into two u32 halves on purpose.
#![allow(clippy::cast_possible_truncation)]

/// Size of a serialized locator in bytes.
pub const LOCATOR_SIZE: usize = 9;

/// The medium a locator points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LocatorTag {
    /// Resident in the object cache only.
    Transient = 0,
    /// Written to a storage backend.
    Persistent = 1,
}

impl TryFrom<u8> for LocatorTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Transient),
            1 => Ok(Self::Persistent),
            _ => Err(value),
        }
    }
}

/// Identity of a tree node.
///
/// Ordering and hashing compare the tag first, then the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Locator {
    /// Process-local identity, valid only while the object is cache-resident.
    Transient(u64),
    /// Location of a serialized node inside a storage backend.
    Persistent {
        /// Offset in block-size units.
        offset: u32,
        /// Length of the serialized node in bytes.
        len: u32,
    },
}

impl Locator {
    /// Get the tag of this locator.
    #[must_use]
    pub const fn tag(&self) -> LocatorTag {
        match self {
            Self::Transient(_) => LocatorTag::Transient,
            Self::Persistent { .. } => LocatorTag::Persistent,
        }
    }

    /// Check whether this locator is only valid inside the cache.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Number of blocks covered by a persistent locator.
    ///
    /// Transient locators cover no blocks.
    #[must_use]
    pub const fn block_span(&self, block_size: u32) -> u32 {
        match self {
            Self::Transient(_) => 0,
            Self::Persistent { len, .. } => len.div_ceil(block_size),
        }
    }

    /// Serialize to the 9-byte wire form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; LOCATOR_SIZE] {
        let (lo, hi) = match self {
            Self::Transient(id) => (id as u32, (id >> 32) as u32),
            Self::Persistent { offset, len } => (offset, len),
        };

        let mut buf = [0u8; LOCATOR_SIZE];
        buf[0] = self.tag() as u8;
        buf[1..5].copy_from_slice(&lo.to_le_bytes());
        buf[5..9].copy_from_slice(&hi.to_le_bytes());
        buf
    }

    /// Deserialize from the 9-byte wire form.
    ///
    /// Returns the offending tag byte if it is not a known tag.
    pub fn from_bytes(bytes: &[u8; LOCATOR_SIZE]) -> Result<Self, u8> {
        let tag = LocatorTag::try_from(bytes[0])?;
        let lo = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let hi = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

        Ok(match tag {
            LocatorTag::Transient => Self::Transient(u64::from(lo) | (u64::from(hi) << 32)),
            LocatorTag::Persistent => Self::Persistent {
                offset: lo,
                len: hi,
            },
        })
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(id) => write!(f, "T#{id}"),
            Self::Persistent { offset, len } => write!(f, "P@{offset}+{len}"),
        }
    }
}
