//! Extent-Mapping Stream
//!
//! Read-only seekable view that stitches a blob's scattered extents into
//! one logical byte range of exactly `file_size` bytes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;

use crate::format::{io as pio, Extent};

/// Logical view over one blob
///
/// Holds its own handle to the container it was opened against, so reads
/// never take the disk's allocation lock.
pub struct ExtentStream {
    file: Arc<File>,
    extents: Vec<Extent>,
    file_size: u64,
    block_size: u64,
    pos: u64,
}

impl ExtentStream {
    pub fn new(file: Arc<File>, extents: Vec<Extent>, file_size: u64, block_size: u32) -> Self {
        Self {
            file,
            extents,
            file_size,
            block_size: block_size as u64,
            pos: 0,
        }
    }

    /// Exact blob length
    pub fn len(&self) -> u64 {
        self.file_size
    }

    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    /// Current logical position
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Map a logical offset to `(physical byte offset, bytes to block end)`
    ///
    /// The count stops at the next physical block boundary and never reaches
    /// past `file_size`. `None` at or beyond end-of-file, or when the
    /// extents run out.
    pub fn map_logical_to_physical(&self, pos: u64) -> Option<(u64, u64)> {
        let (physical, _) = self.locate(pos)?;
        let to_block_end = self.block_size - pos % self.block_size;
        Some((physical, to_block_end.min(self.file_size - pos)))
    }

    /// Physical offset of `pos` and the bytes readable before the containing
    /// extent ends (blocks inside one extent are adjacent on disk)
    fn locate(&self, pos: u64) -> Option<(u64, u64)> {
        if pos >= self.file_size {
            return None;
        }

        let target_block = pos / self.block_size;
        let mut logical_start = 0u64;

        for extent in &self.extents {
            let logical_end = logical_start + extent.block_count as u64;
            if target_block < logical_end {
                let offset_in_extent = pos - logical_start * self.block_size;
                let physical = extent.start_block * self.block_size + offset_in_extent;
                let extent_end = logical_end * self.block_size;
                return Some((physical, extent_end.min(self.file_size) - pos));
            }
            logical_start = logical_end;
        }

        None
    }

    /// Read the whole blob from the start
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        self.pos = 0;
        let mut buf = vec![0u8; self.file_size as usize];
        self.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl Read for ExtentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0usize;

        while filled < buf.len() {
            let (physical, contiguous) = match self.locate(self.pos) {
                Some(mapping) => mapping,
                None => break,
            };

            let want = contiguous.min((buf.len() - filled) as u64) as usize;
            let n = match pio::read_at(&self.file, &mut buf[filled..filled + want], physical) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("extent data missing at physical offset {}", physical),
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            self.pos += n as u64;
            filled += n;
        }

        Ok(filled)
    }
}

impl Seek for ExtentStream {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target: i128 = match from {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(delta) => self.file_size as i128 + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }

        // Past end-of-file is legal; reads there return 0 bytes
        self.pos = u64::try_from(target).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek position overflows u64")
        })?;
        Ok(self.pos)
    }
}
