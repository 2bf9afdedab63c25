//! Repair and Inspection
//!
//! Offline tooling that depends only on the on-disk format.
//!
//! ## Reconciliation Policy
//! The expected bitmap is recomputed from the index's extents alone:
//! - used on disk, unreferenced by the index → leak, freed
//! - free on disk, referenced by the index → forced used
//!
//! Never the reverse: referenced data is never released.

use std::fs;
use std::path::Path;

use crate::bitmap::AllocationBitmap;
use crate::error::{Result, VaultError};
use crate::format::{ContainerHeader, Extent, BITMAP_FILENAME, CONTAINER_FILENAME, HEADER_FILENAME};
use crate::index::FileIndex;

/// What reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Blocks marked used but referenced by nothing
    pub leaked_freed: u64,

    /// Blocks referenced by a record but marked free
    pub missing_marked: u64,

    /// Extents reaching past the container; left for manual recovery
    pub out_of_range: Vec<(String, Extent)>,
}

impl RepairReport {
    /// Whether the bitmap was modified
    pub fn changed(&self) -> bool {
        self.leaked_freed > 0 || self.missing_marked > 0
    }

    pub fn is_clean(&self) -> bool {
        !self.changed() && self.out_of_range.is_empty()
    }
}

/// Bring `bitmap` in line with the extents recorded in `index`
pub fn reconcile(bitmap: &mut AllocationBitmap, index: &impl FileIndex) -> RepairReport {
    let total_blocks = bitmap.total_blocks();
    let mut expected = AllocationBitmap::new(total_blocks);
    let mut report = RepairReport::default();

    for (uri, record) in index.enumerate() {
        for extent in &record.extents {
            if extent.end_block() > total_blocks {
                report.out_of_range.push((uri.clone(), *extent));
            }
            for block in extent.blocks().take_while(|b| *b < total_blocks) {
                expected.set(block);
            }
        }
    }

    for block in 0..total_blocks {
        match (bitmap.is_set(block), expected.is_set(block)) {
            (true, false) => {
                bitmap.clear(block);
                report.leaked_freed += 1;
            }
            (false, true) => {
                bitmap.set(block);
                report.missing_marked += 1;
            }
            _ => {}
        }
    }

    report
}

/// Utilization as reported by the inspection tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub header: ContainerHeader,
    pub used_blocks: u64,
    pub free_blocks: u64,
    pub container_bytes: u64,
}

impl Utilization {
    /// Fraction of blocks in use (0.0 for an empty container)
    pub fn ratio(&self) -> f64 {
        if self.header.total_blocks == 0 {
            0.0
        } else {
            self.used_blocks as f64 / self.header.total_blocks as f64
        }
    }
}

/// Read header and bitmap of the disk in `dir` without mounting it
pub fn inspect(dir: &Path) -> Result<Utilization> {
    let header = ContainerHeader::read_from(&dir.join(HEADER_FILENAME))?.ok_or_else(|| {
        VaultError::Corruption(format!("No container header in {}", dir.display()))
    })?;

    let bytes = fs::read(dir.join(BITMAP_FILENAME))?;
    let start = header.bitmap_start as usize;
    let mut used_blocks = 0u64;
    for block in 0..header.total_blocks {
        let byte = bytes.get(start + (block / 8) as usize).copied().unwrap_or(0);
        if byte & (1 << (block % 8)) != 0 {
            used_blocks += 1;
        }
    }

    let container_bytes = fs::metadata(dir.join(CONTAINER_FILENAME))?.len();

    Ok(Utilization {
        header,
        used_blocks,
        free_blocks: header.total_blocks - used_blocks,
        container_bytes,
    })
}
