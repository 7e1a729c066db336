//! Block allocator using a bitmap to track free/used blocks.
//!
//! Each bit represents one block: 0 = free, 1 = used. Objects occupy runs of
//! contiguous blocks, so allocation and release work on `(start, count)`.

// Block ids are u32 but bitmap indices are usize; usize is at least 32 bits
// on every supported target.
#![allow(clippy::cast_possible_truncation)]

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// Size in bytes of a bitmap tracking `total_blocks` blocks.
#[must_use]
pub const fn bitmap_len(total_blocks: u32) -> usize {
    (total_blocks as usize).div_ceil(BITS_PER_BYTE)
}

/// A block allocation bitmap.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    /// The bitmap data.
    bitmap: Vec<u8>,
    /// Total number of blocks being tracked.
    total_blocks: u32,
    /// Number of free blocks.
    free_count: u32,
    /// Where the next search starts.
    next_search_hint: u32,
}

impl BlockAllocator {
    /// Create an allocator with blocks `0..reserved` marked as used.
    #[must_use]
    pub fn new(total_blocks: u32, reserved: u32) -> Self {
        let reserved = reserved.min(total_blocks);
        let mut bitmap = vec![0u8; bitmap_len(total_blocks)];
        for block in 0..reserved {
            set_bit(&mut bitmap, block as usize);
        }

        Self {
            bitmap,
            total_blocks,
            free_count: total_blocks - reserved,
            next_search_hint: reserved,
        }
    }

    /// Load an allocator from a serialized bitmap.
    ///
    /// Bytes beyond what `total_blocks` needs are ignored; missing bytes
    /// count as free.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], total_blocks: u32) -> Self {
        let len = bitmap_len(total_blocks);
        let mut bitmap = vec![0u8; len];
        let copy_len = len.min(bytes.len());
        bitmap[..copy_len].copy_from_slice(&bytes[..copy_len]);

        // Clear stray bits past the last tracked block
        for index in total_blocks as usize..len * BITS_PER_BYTE {
            clear_bit(&mut bitmap, index);
        }

        let used_count: u32 = bitmap.iter().map(|b| b.count_ones()).sum();
        let next_search_hint = (0..total_blocks)
            .find(|&b| !get_bit(&bitmap, b as usize))
            .unwrap_or(total_blocks);

        Self {
            bitmap,
            total_blocks,
            free_count: total_blocks - used_count,
            next_search_hint,
        }
    }

    /// Serialize the bitmap.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bitmap.clone()
    }

    /// Allocate `count` contiguous blocks.
    ///
    /// The search starts at the hint and wraps around once. Returns `None` if
    /// no run of the requested size is free.
    pub fn allocate_contiguous(&mut self, count: u32) -> Option<u32> {
        if count == 0 || count > self.free_count {
            return None;
        }

        let hint = self.next_search_hint.min(self.total_blocks);
        let start = self
            .find_run(hint, self.total_blocks, count)
            .or_else(|| self.find_run(0, hint.saturating_add(count).min(self.total_blocks), count))?;

        self.mark_used(start, count);
        Some(start)
    }

    /// Allocate exactly the blocks `start..start + count`, if they are free.
    pub fn allocate_at(&mut self, start: u32, count: u32) -> bool {
        if count == 0 || !self.is_run_free(start, count) {
            return false;
        }
        self.mark_used(start, count);
        true
    }

    /// Free a run of blocks. Blocks that are already free are skipped.
    pub fn free_run(&mut self, start: u32, count: u32) {
        let end = start.saturating_add(count).min(self.total_blocks);
        for block in start..end {
            if get_bit(&self.bitmap, block as usize) {
                clear_bit(&mut self.bitmap, block as usize);
                self.free_count += 1;
            }
        }

        if start < self.next_search_hint && start < end {
            self.next_search_hint = start;
        }
    }

    /// Check if a block is allocated.
    #[must_use]
    pub fn is_allocated(&self, block: u32) -> bool {
        block < self.total_blocks && get_bit(&self.bitmap, block as usize)
    }

    /// Check whether every block of a run is free and in range.
    #[must_use]
    pub fn is_run_free(&self, start: u32, count: u32) -> bool {
        let Some(end) = start.checked_add(count) else {
            return false;
        };
        end <= self.total_blocks && (start..end).all(|b| !get_bit(&self.bitmap, b as usize))
    }

    /// Get the number of free blocks.
    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Get the total number of blocks being tracked.
    #[must_use]
    pub const fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Block where the next allocation search starts.
    #[must_use]
    pub const fn next_search_hint(&self) -> u32 {
        self.next_search_hint
    }

    /// Expand the allocator to track more blocks.
    ///
    /// The new blocks are marked as free.
    pub fn expand(&mut self, new_total_blocks: u32) {
        if new_total_blocks <= self.total_blocks {
            return;
        }

        self.bitmap.resize(bitmap_len(new_total_blocks), 0);
        self.free_count += new_total_blocks - self.total_blocks;
        self.total_blocks = new_total_blocks;
    }

    fn find_run(&self, from: u32, to: u32, count: u32) -> Option<u32> {
        let mut run_start = from;
        let mut run_length = 0u32;

        for block in from..to {
            if get_bit(&self.bitmap, block as usize) {
                run_start = block + 1;
                run_length = 0;
            } else {
                run_length += 1;
                if run_length >= count {
                    return Some(run_start);
                }
            }
        }

        None
    }

    fn mark_used(&mut self, start: u32, count: u32) {
        for block in start..start + count {
            set_bit(&mut self.bitmap, block as usize);
        }
        self.free_count -= count;
        self.next_search_hint = start + count;
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}
