//! Bitmap persistence
//!
//! Owns the bitmap file handle. Mount resizes a mis-sized file before
//! loading it; that is the only repair performed at runtime.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::format::{bitmap_bytes, io};

use super::AllocationBitmap;

/// Durable mirror of an [`AllocationBitmap`]
pub struct BitmapFile {
    path: PathBuf,
    file: File,
}

impl BitmapFile {
    /// Open (or create) the bitmap file and load it for `total_blocks` blocks
    ///
    /// A file whose length differs from `ceil(total_blocks / 8)` is resized
    /// first, zero-extending when it was short.
    pub fn open(path: &Path, total_blocks: u64) -> Result<(Self, AllocationBitmap)> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let expected = bitmap_bytes(total_blocks);
        let actual = file.metadata()?.len();
        if actual != expected {
            warn!(
                path = %path.display(),
                actual,
                expected,
                "bitmap size mismatch, resizing"
            );
            file.set_len(expected)?;
            file.sync_all()?;
        }

        let mut bytes = Vec::with_capacity(expected as usize);
        file.read_to_end(&mut bytes)?;
        let bitmap = AllocationBitmap::from_bytes(bytes, total_blocks)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            bitmap,
        ))
    }

    /// Create a fresh bitmap file holding `bitmap` (truncates any existing file)
    pub fn create(path: &Path, bitmap: &AllocationBitmap) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut bitmap_file = Self {
            path: path.to_path_buf(),
            file,
        };
        bitmap_file.write_all(bitmap, true)?;
        Ok(bitmap_file)
    }

    /// Rewrite the whole bitmap (after growth or repair)
    pub fn write_all(&mut self, bitmap: &AllocationBitmap, sync: bool) -> Result<()> {
        self.file.set_len(bitmap.as_bytes().len() as u64)?;
        io::write_all_at(&self.file, bitmap.as_bytes(), 0)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Persist only the bytes covering blocks `[first, last]`
    pub fn write_blocks(
        &mut self,
        bitmap: &AllocationBitmap,
        first: u64,
        last: u64,
        sync: bool,
    ) -> Result<()> {
        let start = (first / 8) as usize;
        let end = ((last / 8) as usize + 1).min(bitmap.as_bytes().len());
        if start >= end {
            return Ok(());
        }
        io::write_all_at(&self.file, &bitmap.as_bytes()[start..end], start as u64)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
