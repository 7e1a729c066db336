//! In-memory block storage.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::locator::{Locator, LocatorTag};
use crate::storage::{BlockAllocator, StorageBackend, StorageError, StorageInit, persistent_parts};

/// Blocks tracked before the first expansion.
const INITIAL_BLOCKS: u32 = 64;

/// A block-addressed object store held in memory.
///
/// Objects keep their bytes exactly; the allocator only decides which block
/// offsets they claim, so locators look the same as the file backend's.
/// Removing an object the last commit can reach hides it at once but keeps
/// its blocks until the next commit, as the file backend does.
#[derive(Debug)]
pub struct MemoryStorage {
    objects: HashMap<u32, Vec<u8>>,
    allocator: BlockAllocator,
    block_size: u32,
    committed: StorageInit,
    uncommitted: BTreeSet<u32>,
    pending_free: BTreeMap<u32, u32>,
}

impl MemoryStorage {
    /// Create an empty store with the given block size.
    #[must_use]
    pub fn new(block_size: u32) -> Self {
        Self {
            objects: HashMap::new(),
            allocator: BlockAllocator::new(INITIAL_BLOCKS, 0),
            block_size: block_size.max(1),
            committed: StorageInit::default(),
            uncommitted: BTreeSet::new(),
            pending_free: BTreeMap::new(),
        }
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len() - self.pending_free.len()
    }

    /// Check whether an object is stored under `locator`.
    #[must_use]
    pub fn contains(&self, locator: Locator) -> bool {
        match locator {
            Locator::Persistent { offset, len } => self.live(offset, len),
            Locator::Transient(_) => false,
        }
    }

    fn live(&self, offset: u32, len: u32) -> bool {
        !self.pending_free.contains_key(&offset)
            && self
                .objects
                .get(&offset)
                .is_some_and(|bytes| bytes.len() == len as usize)
    }

    fn span(&self, len: usize) -> Result<u32, StorageError> {
        let blocks = len.div_ceil(self.block_size as usize).max(1);
        u32::try_from(blocks).map_err(|_| StorageError::OutOfSpace {
            requested_blocks: u32::MAX,
        })
    }

    fn grow(&mut self, min_extra: u32) -> Result<(), StorageError> {
        let total = self.allocator.total_blocks();
        let new_total = total
            .checked_add(min_extra)
            .map(|needed| needed.max(total.saturating_mul(2)))
            .ok_or(StorageError::OutOfSpace {
                requested_blocks: min_extra,
            })?;
        self.allocator.expand(new_total);
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn init(&mut self) -> Result<StorageInit, StorageError> {
        Ok(self.committed)
    }

    fn get_object(&mut self, locator: Locator) -> Result<Vec<u8>, StorageError> {
        let (offset, len) = persistent_parts(locator)?;
        match self.objects.get(&offset) {
            Some(bytes) if self.live(offset, len) => Ok(bytes.clone()),
            _ => Err(StorageError::NotFound(locator)),
        }
    }

    fn add_object(&mut self, hint: Option<Locator>, bytes: &[u8]) -> Result<Locator, StorageError> {
        let len = u32::try_from(bytes.len()).map_err(|_| StorageError::OutOfSpace {
            requested_blocks: u32::MAX,
        })?;
        let span = self.span(bytes.len())?;

        let hinted = match hint {
            Some(Locator::Persistent { offset, .. }) if self.allocator.allocate_at(offset, span) => {
                Some(offset)
            }
            _ => None,
        };
        let offset = match hinted {
            Some(offset) => offset,
            None => loop {
                if let Some(offset) = self.allocator.allocate_contiguous(span) {
                    break offset;
                }
                self.grow(span)?;
            },
        };

        self.objects.insert(offset, bytes.to_vec());
        self.uncommitted.insert(offset);
        Ok(Locator::Persistent { offset, len })
    }

    fn remove(&mut self, locator: Locator) -> Result<(), StorageError> {
        let (offset, len) = persistent_parts(locator)?;
        if !self.live(offset, len) {
            return Ok(());
        }

        let span = self.span(len as usize)?;
        if self.uncommitted.remove(&offset) {
            self.objects.remove(&offset);
            self.allocator.free_run(offset, span);
        } else {
            self.pending_free.insert(offset, span);
        }
        Ok(())
    }

    fn write_position(&self) -> u32 {
        self.allocator.next_search_hint()
    }

    fn block_size(&self) -> u32 {
        self.block_size
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
        self.committed = StorageInit {
            root: Some(root),
            degree: Some(degree),
            cache_capacity: Some(cache_capacity),
        };
        for (offset, span) in std::mem::take(&mut self.pending_free) {
            self.objects.remove(&offset);
            self.allocator.free_run(offset, span);
        }
        self.uncommitted.clear();
        Ok(())
    }
}
