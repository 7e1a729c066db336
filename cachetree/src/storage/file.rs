//! Single-file block storage.
//!
//! Layout: block 0 holds the header, every other block belongs to an object
//! run or to the allocation bitmap written by the last commit. The file
//! doubles in size whenever no free run is large enough.
//!
//! Runs written since the last commit can be freed as soon as they are
//! removed. Runs the committed tree still references stay allocated until
//! the next commit's header is durable, so a reopen after unflushed work
//! finds the committed tree intact.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::locator::{Locator, LocatorTag};
use crate::storage::allocator::bitmap_len;
use crate::storage::{
    BlockAllocator, HEADER_LEN, Header, StorageBackend, StorageError, StorageInit,
    persistent_parts,
};

/// Blocks in a freshly created file (header included).
const INITIAL_BLOCKS: u32 = 16;

/// Size of the checksum trailing the persisted bitmap.
const BITMAP_CHECKSUM_SIZE: usize = 4;

/// A block file holding serialized tree nodes.
pub struct FileStorage {
    file: File,
    path: PathBuf,
    header: Header,
    allocator: BlockAllocator,
    /// Starts of runs allocated since the last commit.
    uncommitted: BTreeSet<u32>,
    /// Committed runs removed since the last commit, start to span.
    pending_free: BTreeMap<u32, u32>,
}

impl FileStorage {
    /// Create a new block file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, block_size: u32) -> Result<Self, StorageError> {
        if path.exists() {
            return Err(StorageError::AlreadyExists(path.to_path_buf()));
        }
        if (block_size as usize) < HEADER_LEN {
            return Err(StorageError::InvalidConfig(format!(
                "block size {block_size} is smaller than the {HEADER_LEN}-byte header"
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let header = Header::new(block_size, INITIAL_BLOCKS);
        file.set_len(u64::from(INITIAL_BLOCKS) * u64::from(block_size))?;

        let mut storage = Self {
            file,
            path: path.to_path_buf(),
            header,
            allocator: BlockAllocator::new(INITIAL_BLOCKS, 1),
            uncommitted: BTreeSet::new(),
            pending_free: BTreeMap::new(),
        };
        storage.write_header()?;
        storage.file.sync_all()?;

        info!(path = %path.display(), block_size, "created block file");
        Ok(storage)
    }

    /// Open an existing block file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buf = [0u8; HEADER_LEN];
        file.read_exact(&mut buf)?;
        let header = Header::from_bytes(&buf)?;

        let file_len = file.metadata()?.len();
        let needed = u64::from(header.total_blocks) * u64::from(header.block_size);
        if file_len < needed {
            return Err(StorageError::Corruption(format!(
                "file is {file_len} bytes, header claims {needed}"
            )));
        }

        let mut storage = Self {
            file,
            path: path.to_path_buf(),
            header,
            allocator: BlockAllocator::new(header.total_blocks, 1),
            uncommitted: BTreeSet::new(),
            pending_free: BTreeMap::new(),
        };

        if let Some(bitmap) = header.bitmap {
            storage.allocator = storage.load_bitmap(bitmap)?;
        }

        info!(
            path = %path.display(),
            total_blocks = header.total_blocks,
            free_blocks = storage.allocator.free_count(),
            "opened block file"
        );
        Ok(storage)
    }

    /// Create the file if it does not exist, open it otherwise.
    pub fn open_or_create(path: &Path, block_size: u32) -> Result<Self, StorageError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, block_size)
        }
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the header.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Number of free blocks.
    #[must_use]
    pub const fn free_blocks(&self) -> u32 {
        self.allocator.free_count()
    }

    /// Blocks removed since the last commit that are still held for the
    /// committed tree.
    #[must_use]
    pub fn pending_free_blocks(&self) -> u32 {
        self.pending_free.values().sum()
    }

    fn span(&self, len: usize) -> Result<u32, StorageError> {
        let blocks = len.div_ceil(self.header.block_size as usize).max(1);
        u32::try_from(blocks).map_err(|_| StorageError::OutOfSpace {
            requested_blocks: u32::MAX,
        })
    }

    fn byte_offset(&self, block: u32) -> u64 {
        u64::from(block) * u64::from(self.header.block_size)
    }

    fn read_at(&mut self, block: u32, len: usize) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(self.byte_offset(block)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, block: u32, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(self.byte_offset(block)))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        let bytes = self.header.to_bytes();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        Ok(())
    }

    /// Grow the file by at least `min_extra` blocks, doubling when possible.
    fn grow(&mut self, min_extra: u32) -> Result<(), StorageError> {
        let total = self.header.total_blocks;
        let new_total = total
            .checked_add(min_extra)
            .map(|needed| needed.max(total.saturating_mul(2)))
            .ok_or(StorageError::OutOfSpace {
                requested_blocks: min_extra,
            })?;

        self.file.set_len(self.byte_offset(new_total))?;
        self.allocator.expand(new_total);
        self.header.total_blocks = new_total;

        debug!(from = total, to = new_total, "grew block file");
        Ok(())
    }

    /// Allocate a run, honouring `hint` when its blocks are free.
    fn allocate(&mut self, hint: Option<u32>, span: u32) -> Result<u32, StorageError> {
        if let Some(start) = hint.filter(|&start| start != 0) {
            if self.allocator.allocate_at(start, span) {
                return Ok(start);
            }
        }

        loop {
            if let Some(start) = self.allocator.allocate_contiguous(span) {
                return Ok(start);
            }
            self.grow(span)?;
        }
    }

    fn load_bitmap(&mut self, locator: Locator) -> Result<BlockAllocator, StorageError> {
        let (offset, len) = persistent_parts(locator)?;
        let bytes = self.read_at(offset, len as usize)?;
        if bytes.len() < BITMAP_CHECKSUM_SIZE {
            return Err(StorageError::Corruption("allocation bitmap truncated".to_string()));
        }

        let (body, trailer) = bytes.split_at(bytes.len() - BITMAP_CHECKSUM_SIZE);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if stored != crc32fast::hash(body) {
            return Err(StorageError::Corruption(
                "allocation bitmap checksum mismatch".to_string(),
            ));
        }

        Ok(BlockAllocator::from_bytes(body, self.header.total_blocks))
    }

    /// Persist the allocation bitmap into a fresh run and return its locator.
    ///
    /// The stored bitmap already counts pending runs as free, since the
    /// header written next no longer reaches them.
    fn store_bitmap(&mut self) -> Result<Locator, StorageError> {
        // Allocating may grow the file, which grows the bitmap; retry until
        // the run fits the bitmap as it is after allocation.
        let start = loop {
            let need = self.span(bitmap_len(self.header.total_blocks) + BITMAP_CHECKSUM_SIZE)?;
            if let Some(start) = self.allocator.allocate_contiguous(need) {
                break start;
            }
            self.grow(need)?;
        };

        let mut after_commit = self.allocator.clone();
        for (&offset, &span) in &self.pending_free {
            after_commit.free_run(offset, span);
        }
        let mut bytes = after_commit.to_bytes();
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        self.write_at(start, &bytes)?;

        let len = u32::try_from(bytes.len()).map_err(|_| StorageError::OutOfSpace {
            requested_blocks: u32::MAX,
        })?;
        Ok(Locator::Persistent { offset: start, len })
    }
}

impl StorageBackend for FileStorage {
    fn init(&mut self) -> Result<StorageInit, StorageError> {
        let committed = self.header.root.is_some();
        Ok(StorageInit {
            root: self.header.root,
            degree: committed.then_some(self.header.degree as usize),
            cache_capacity: committed.then_some(self.header.cache_capacity as usize),
        })
    }

    fn get_object(&mut self, locator: Locator) -> Result<Vec<u8>, StorageError> {
        let (offset, len) = persistent_parts(locator)?;
        let span = self.span(len as usize)?;
        if offset == 0
            || self.pending_free.contains_key(&offset)
            || !(offset..offset.saturating_add(span)).all(|b| self.allocator.is_allocated(b))
        {
            return Err(StorageError::NotFound(locator));
        }
        self.read_at(offset, len as usize)
    }

    fn add_object(&mut self, hint: Option<Locator>, bytes: &[u8]) -> Result<Locator, StorageError> {
        let len = u32::try_from(bytes.len()).map_err(|_| StorageError::OutOfSpace {
            requested_blocks: u32::MAX,
        })?;
        let span = self.span(bytes.len())?;
        let hint = match hint {
            Some(Locator::Persistent { offset, .. }) => Some(offset),
            _ => None,
        };

        let start = self.allocate(hint, span)?;
        if let Err(e) = self.write_at(start, bytes) {
            self.allocator.free_run(start, span);
            return Err(e);
        }
        self.uncommitted.insert(start);
        Ok(Locator::Persistent { offset: start, len })
    }

    fn remove(&mut self, locator: Locator) -> Result<(), StorageError> {
        let (offset, len) = persistent_parts(locator)?;
        if offset == 0 {
            return Ok(());
        }
        let span = self.span(len as usize)?;
        if !self.allocator.is_allocated(offset) {
            return Ok(());
        }

        if self.uncommitted.remove(&offset) {
            self.allocator.free_run(offset, span);
        } else {
            // Still reachable from the committed header
            self.pending_free.insert(offset, span);
        }
        Ok(())
    }

    fn write_position(&self) -> u32 {
        self.allocator.next_search_hint()
    }

    fn block_size(&self) -> u32 {
        self.header.block_size
    }

    fn media_tag(&self) -> LocatorTag {
        LocatorTag::Persistent
    }

    fn commit(
        &mut self,
        root: Locator,
        degree: usize,
        cache_capacity: usize,
    ) -> Result<(), StorageError> {
        persistent_parts(root)?;
        let degree = u32::try_from(degree)
            .map_err(|_| StorageError::InvalidConfig(format!("degree {degree} too large")))?;
        let cache_capacity = u32::try_from(cache_capacity).map_err(|_| {
            StorageError::InvalidConfig(format!("cache capacity {cache_capacity} too large"))
        })?;

        let previous_bitmap = self.header.bitmap;
        let bitmap = self.store_bitmap()?;

        self.header.root = Some(root);
        self.header.degree = degree;
        self.header.cache_capacity = cache_capacity;
        self.header.bitmap = Some(bitmap);
        self.file.sync_all()?;
        self.write_header()?;
        self.file.sync_all()?;

        // The old bitmap run and the pending runs are only released once the
        // new header is durable. The old bitmap run shows up as free in the
        // next commit's bitmap.
        let released = self.pending_free_blocks();
        for (offset, span) in std::mem::take(&mut self.pending_free) {
            self.allocator.free_run(offset, span);
        }
        self.uncommitted.clear();
        if let Some(previous) = previous_bitmap {
            let (offset, len) = persistent_parts(previous)?;
            let span = self.span(len as usize)?;
            self.allocator.free_run(offset, span);
        }

        info!(
            %root,
            %bitmap,
            released,
            total_blocks = self.header.total_blocks,
            "committed block file"
        );
        Ok(())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("free_blocks", &self.allocator.free_count())
            .field("pending_free_blocks", &self.pending_free_blocks())
            .finish_non_exhaustive()
    }
}
