//! In-memory allocation bitmap
//!
//! Bit `(block % 8)` of byte `(block / 8)` is set iff the block is allocated.

use crate::error::{Result, VaultError};
use crate::format::{bitmap_bytes, Extent};

/// Free/used state for every block of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationBitmap {
    bytes: Vec<u8>,
    total_blocks: u64,
}

impl AllocationBitmap {
    /// All-free bitmap for `total_blocks` blocks
    pub fn new(total_blocks: u64) -> Self {
        Self {
            bytes: vec![0u8; bitmap_bytes(total_blocks) as usize],
            total_blocks,
        }
    }

    /// Wrap persisted bytes; the length must match the block count exactly
    pub fn from_bytes(bytes: Vec<u8>, total_blocks: u64) -> Result<Self> {
        if bytes.len() as u64 != bitmap_bytes(total_blocks) {
            return Err(VaultError::Corruption(format!(
                "Bitmap is {} bytes, expected {} for {} blocks",
                bytes.len(),
                bitmap_bytes(total_blocks),
                total_blocks
            )));
        }
        Ok(Self {
            bytes,
            total_blocks,
        })
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_set(&self, block: u64) -> bool {
        if block >= self.total_blocks {
            return false;
        }
        self.bytes[(block / 8) as usize] & (1 << (block % 8)) != 0
    }

    pub fn set(&mut self, block: u64) {
        debug_assert!(block < self.total_blocks);
        self.bytes[(block / 8) as usize] |= 1 << (block % 8);
    }

    pub fn clear(&mut self, block: u64) {
        debug_assert!(block < self.total_blocks);
        self.bytes[(block / 8) as usize] &= !(1 << (block % 8));
    }

    /// Mark every block of the extent as allocated
    pub fn set_extent(&mut self, extent: &Extent) {
        for block in extent.blocks() {
            self.set(block);
        }
    }

    /// Mark every block of the extent as free (blocks past the end are ignored)
    pub fn clear_extent(&mut self, extent: &Extent) {
        for block in extent.blocks() {
            if block < self.total_blocks {
                self.clear(block);
            }
        }
    }

    /// Number of allocated blocks
    pub fn used_count(&self) -> u64 {
        let full_bytes = (self.total_blocks / 8) as usize;
        let mut used: u64 = self.bytes[..full_bytes]
            .iter()
            .map(|b| b.count_ones() as u64)
            .sum();
        for block in (full_bytes as u64 * 8)..self.total_blocks {
            if self.is_set(block) {
                used += 1;
            }
        }
        used
    }

    pub fn free_count(&self) -> u64 {
        self.total_blocks - self.used_count()
    }

    /// First-fit: start of the first run of `count` consecutive free blocks
    ///
    /// Linear in `total_blocks`; fully allocated bytes are skipped eight
    /// blocks at a time.
    pub fn find_free_run(&self, count: u64) -> Option<u64> {
        if count == 0 || count > self.total_blocks {
            return None;
        }

        let mut run_start = 0u64;
        let mut run_len = 0u64;
        let mut block = 0u64;

        while block < self.total_blocks {
            if block % 8 == 0 && self.bytes[(block / 8) as usize] == 0xFF {
                run_len = 0;
                block += 8;
                continue;
            }

            if self.is_set(block) {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = block;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
            block += 1;
        }

        None
    }

    /// Gather free runs first-fit until `count` blocks are covered
    ///
    /// Returns `None` (and marks nothing) when fewer than `count` blocks are
    /// free in total.
    pub fn find_free_runs(&self, count: u64) -> Option<Vec<Extent>> {
        if count == 0 {
            return Some(Vec::new());
        }
        if self.free_count() < count {
            return None;
        }

        let mut extents: Vec<Extent> = Vec::new();
        let mut remaining = count;
        let mut block = 0u64;

        while block < self.total_blocks && remaining > 0 {
            if self.is_set(block) {
                block += 1;
                continue;
            }

            let start = block;
            let mut len = 0u64;
            while block < self.total_blocks
                && !self.is_set(block)
                && len < remaining
                && len < u32::MAX as u64
            {
                len += 1;
                block += 1;
            }
            extents.push(Extent::new(start, len as u32));
            remaining -= len;
        }

        Some(extents)
    }

    /// Zero-extend to cover `new_total` blocks
    pub fn grow(&mut self, new_total: u64) {
        if new_total <= self.total_blocks {
            return;
        }
        self.bytes.resize(bitmap_bytes(new_total) as usize, 0);
        self.total_blocks = new_total;
    }
}
