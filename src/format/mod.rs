//! On-Disk Format Module
//!
//! Layout primitives shared by the virtual disk, the bitmap and the
//! inspection/repair tooling.
//!
//! ## Files per Virtual Disk
//! ```text
//! {dir}/
//!   ├── container.vdisk    data region, block b at byte b * block_size
//!   ├── container.bitmap   ceil(total_blocks / 8) bytes, bit (b % 8) of byte (b / 8)
//!   ├── container.header   36-byte header (below)
//!   ├── index.log          durable URI → FileRecord map
//!   └── vacuum.commit      present only while a committed vacuum is being swapped in
//! ```
//!
//! Vacuum stages each of the four files as `<name>.vacuum` before the
//! commit marker is written; see [`crate::vdisk`].
//!
//! ## Header (little-endian, 36 bytes)
//! ```text
//! ┌───────────┬─────────┬────────────┬──────────────┬──────────────┬──────────────┐
//! │ Magic (8) │ Ver (4) │ BlkSize(4) │ TotalBlk (8) │ BmpStart (8) │ BmpBlocks(4) │
//! └───────────┴─────────┴────────────┴──────────────┴──────────────┴──────────────┘
//! ```
//! The external inspection tool reads exactly this layout; field order and
//! widths must not change.

use std::path::{Path, PathBuf};

mod extent;
mod header;
pub mod io;

pub use extent::Extent;
pub use header::ContainerHeader;

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying a BlockVault container header
pub const MAGIC: &[u8; 8] = b"BLKVAULT";

/// Current container format version
pub const FORMAT_VERSION: u32 = 1;

/// Header size: Magic (8) + Version (4) + BlockSize (4) + TotalBlocks (8)
/// + BitmapStart (8) + BitmapBlocks (4) = 36 bytes
pub const HEADER_SIZE: usize = 36;

/// Default physical allocation unit
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Data file name inside a disk directory
pub const CONTAINER_FILENAME: &str = "container.vdisk";

/// Bitmap file name inside a disk directory
pub const BITMAP_FILENAME: &str = "container.bitmap";

/// Header file name inside a disk directory
pub const HEADER_FILENAME: &str = "container.header";

/// Index log file name inside a disk directory
pub const INDEX_FILENAME: &str = "index.log";

/// Extension appended to files staged by vacuum
pub const STAGING_SUFFIX: &str = "vacuum";

/// Marker whose presence means a staged vacuum must be rolled forward
pub const VACUUM_COMMIT_FILENAME: &str = "vacuum.commit";

/// Disk files in the order vacuum swaps them
pub const DISK_FILENAMES: [&str; 4] = [
    CONTAINER_FILENAME,
    BITMAP_FILENAME,
    HEADER_FILENAME,
    INDEX_FILENAME,
];

// =============================================================================
// Geometry Helpers
// =============================================================================

/// Bytes needed for a bitmap covering `total_blocks` blocks
pub fn bitmap_bytes(total_blocks: u64) -> u64 {
    total_blocks.div_ceil(8)
}

/// `<path>.<suffix>` next to `path`
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    sibling(path, "tmp")
}

/// Blocks needed to hold `len` bytes
pub fn blocks_for(len: u64, block_size: u32) -> u64 {
    len.div_ceil(block_size as u64)
}
