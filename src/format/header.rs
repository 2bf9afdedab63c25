//! Container Header
//!
//! Bit-exact encoding of the geometry record shared with the inspection tool.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::{Result, VaultError};

use super::{bitmap_bytes, io, FORMAT_VERSION, HEADER_SIZE, MAGIC};

/// Geometry of one container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u32,
    pub block_size: u32,
    pub total_blocks: u64,
    /// Byte offset of the bitmap inside the bitmap file
    pub bitmap_start: u64,
    /// Blocks needed to hold the bitmap at `block_size` granularity
    pub bitmap_blocks: u32,
}

impl ContainerHeader {
    /// Header for a container of `total_blocks` blocks
    pub fn new(block_size: u32, total_blocks: u64) -> Self {
        let bitmap_blocks = bitmap_bytes(total_blocks).div_ceil(block_size as u64);
        Self {
            version: FORMAT_VERSION,
            block_size,
            total_blocks,
            bitmap_start: 0,
            bitmap_blocks: bitmap_blocks as u32,
        }
    }

    /// Encode to the fixed 36-byte layout
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[24..32].copy_from_slice(&self.bitmap_start.to_le_bytes());
        buf[32..36].copy_from_slice(&self.bitmap_blocks.to_le_bytes());
        buf
    }

    /// Decode and validate magic and version
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(VaultError::Corruption(format!(
                "Header too short: {} bytes",
                buf.len()
            )));
        }

        if &buf[0..8] != MAGIC {
            return Err(VaultError::Corruption(format!(
                "Invalid container magic: {:?}",
                &buf[0..8]
            )));
        }

        let version = u32::from_le_bytes(le_array(&buf[8..12]));
        if version != FORMAT_VERSION {
            return Err(VaultError::Corruption(format!(
                "Unsupported container version: {}",
                version
            )));
        }

        Ok(Self {
            version,
            block_size: u32::from_le_bytes(le_array(&buf[12..16])),
            total_blocks: u64::from_le_bytes(le_array(&buf[16..24])),
            bitmap_start: u64::from_le_bytes(le_array(&buf[24..32])),
            bitmap_blocks: u32::from_le_bytes(le_array(&buf[32..36])),
        })
    }

    /// Read a header file; `Ok(None)` when it does not exist
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Self::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the header file atomically
    ///
    /// The new header goes to a `.tmp` sibling, is fsynced, then renamed
    /// over the old one; a crash leaves either the old or the new header.
    /// `sync` additionally fsyncs the directory so the rename is durable.
    pub fn write_to(&self, path: &Path, sync: bool) -> Result<()> {
        let tmp_path = super::tmp_sibling(path);
        {
            let mut file: File = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&self.encode())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        if sync {
            if let Some(dir) = path.parent() {
                io::sync_dir(dir)?;
            }
        }
        Ok(())
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
