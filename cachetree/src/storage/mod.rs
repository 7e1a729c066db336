//! Storage backends for relocated nodes.
//!
//! The object cache hands serialized nodes to a `StorageBackend` when it
//! evicts them and reads them back on demand. Backends address objects by
//! persistent locators: a block offset plus a byte length.
//!
//! # Backends
//!
//! - `MemoryStorage`: block-addressed map, lives as long as the process
//! - `FileStorage`: single file with a header block and a bitmap allocation
//!   table, survives reopening once committed
//!
//! # Usage
//!
//! ```
//! use cachetree::locator::Locator;
//! use cachetree::storage::{MemoryStorage, StorageBackend};
//!
//! let mut storage = MemoryStorage::new(64);
//! let loc = storage.add_object(None, b"node bytes").expect("add");
//! assert!(matches!(loc, Locator::Persistent { len: 10, .. }));
//! assert_eq!(storage.get_object(loc).expect("get"), b"node bytes");
//! ```

mod allocator;
mod file;
mod header;
mod memory;

pub use allocator::BlockAllocator;
pub use file::FileStorage;
pub use header::{FORMAT_VERSION, HEADER_LEN, Header, HeaderError, MAGIC};
pub use memory::MemoryStorage;

use crate::locator::{Locator, LocatorTag};

/// What a backend remembers from its last commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageInit {
    /// Root locator recorded by the last commit, if any.
    pub root: Option<Locator>,
    /// Degree recorded by the last commit, if any.
    pub degree: Option<usize>,
    /// Cache capacity recorded by the last commit, if any.
    pub cache_capacity: Option<usize>,
}

/// Contract between the object cache and a persistent medium.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `get_object` returns exactly the bytes passed to the `add_object` call
///   that produced the locator, until that locator is removed
/// - `add_object` never returns a locator that overlaps a live object
/// - `remove` of an already-released locator is a no-op
/// - space reachable from the last commit is not reused before the next
///   commit, even once removed
/// - `commit` makes the root and every live object durable
pub trait StorageBackend: Send {
    /// Prepare the backend and report what the last commit recorded.
    fn init(&mut self) -> Result<StorageInit, StorageError>;

    /// Read the bytes stored under `locator`.
    fn get_object(&mut self, locator: Locator) -> Result<Vec<u8>, StorageError>;

    /// Store `bytes` and return the locator they now live under.
    ///
    /// `hint` proposes a location; it is used when its blocks are free.
    fn add_object(&mut self, hint: Option<Locator>, bytes: &[u8]) -> Result<Locator, StorageError>;

    /// Release the space held by `locator`.
    fn remove(&mut self, locator: Locator) -> Result<(), StorageError>;

    /// Block offset where the next allocation is expected to land.
    ///
    /// The cache hints its first write of a relocation pass here.
    fn write_position(&self) -> u32;

    /// Allocation unit in bytes.
    ///
    /// The cache uses it to hint each further write of a pass at the block
    /// just past the previous one.
    fn block_size(&self) -> u32;

    /// Tag of the locators this backend produces.
    fn media_tag(&self) -> LocatorTag;

    /// Durably record the root and sizing parameters.
    fn commit(
        &mut self,
        root: Locator,
        degree: usize,
        cache_capacity: usize,
    ) -> Result<(), StorageError>;
}

impl<S: StorageBackend + ?Sized> StorageBackend for Box<S> {
    fn init(&mut self) -> Result<StorageInit, StorageError> {
        (**self).init()
    }

    fn get_object(&mut self, locator: Locator) -> Result<Vec<u8>, StorageError> {
        (**self).get_object(locator)
    }

    fn add_object(&mut self, hint: Option<Locator>, bytes: &[u8]) -> Result<Locator, StorageError> {
        (**self).add_object(hint, bytes)
    }

    fn remove(&mut self, locator: Locator) -> Result<(), StorageError> {
        (**self).remove(locator)
    }

    fn write_position(&self) -> u32 {
        (**self).write_position()
    }

    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn media_tag(&self) -> LocatorTag {
        (**self).media_tag()
    }

    fn commit(
        &mut self,
        root: Locator,
        degree: usize,
        cache_capacity: usize,
    ) -> Result<(), StorageError> {
        (**self).commit(root, degree, cache_capacity)
    }
}

/// Split a persistent locator into (offset, len).
pub(crate) const fn persistent_parts(locator: Locator) -> Result<(u32, u32), StorageError> {
    match locator {
        Locator::Persistent { offset, len } => Ok((offset, len)),
        Locator::Transient(_) => Err(StorageError::WrongMedium(locator)),
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// Header error.
    Header(HeaderError),
    /// Locator does not name a live object.
    NotFound(Locator),
    /// Locator belongs to another medium.
    WrongMedium(Locator),
    /// Block address space exhausted.
    OutOfSpace { requested_blocks: u32 },
    /// Invalid backend parameters.
    InvalidConfig(String),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// Corruption detected.
    Corruption(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::NotFound(loc) => write!(f, "no object stored at {loc}"),
            Self::WrongMedium(loc) => write!(f, "locator {loc} does not belong to this backend"),
            Self::OutOfSpace { requested_blocks } => {
                write!(f, "out of space: cannot allocate {requested_blocks} blocks")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid storage configuration: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for StorageError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}
