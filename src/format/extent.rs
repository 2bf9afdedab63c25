//! Extent definition
//!
//! One contiguous physical run of blocks.

use serde::{Deserialize, Serialize};

/// A contiguous run of physical blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First physical block of the run
    pub start_block: u64,

    /// Number of blocks in the run
    pub block_count: u32,
}

impl Extent {
    pub fn new(start_block: u64, block_count: u32) -> Self {
        Self {
            start_block,
            block_count,
        }
    }

    /// One past the last block of the run
    pub fn end_block(&self) -> u64 {
        self.start_block + self.block_count as u64
    }

    /// Whether the two runs share at least one block
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start_block < other.end_block() && other.start_block < self.end_block()
    }

    /// Physical block numbers covered by this run
    pub fn blocks(&self) -> std::ops::Range<u64> {
        self.start_block..self.end_block()
    }
}
