//! Vacuum (compaction)
//!
//! Rewrites every live blob contiguously into a fresh generation of the
//! disk files, then swaps it in.
//!
//! ## Commit Protocol
//! ```text
//! stage:   container.vdisk.vacuum  container.bitmap.vacuum
//!          container.header.vacuum index.log.vacuum          (all fsynced)
//! commit:  vacuum.commit                                      (atomic rename)
//! swap:    rename each staged file over its original
//! done:    remove vacuum.commit
//! ```
//! Mount calls [`recover`] first: with the marker present the swap is rolled
//! forward (each rename is idempotent), without it staged files are
//! discarded and the previous generation stays authoritative.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bitmap::{AllocationBitmap, BitmapFile};
use crate::error::{Result, VaultError};
use crate::format::{
    blocks_for, io as pio, sibling, ContainerHeader, Extent, BITMAP_FILENAME,
    CONTAINER_FILENAME, DISK_FILENAMES, HEADER_FILENAME, INDEX_FILENAME, STAGING_SUFFIX,
    VACUUM_COMMIT_FILENAME,
};
use crate::index::{FileIndex, FileRecord, LogIndex};

use super::engine::AllocState;
use super::{ExtentStream, VirtualDisk};

/// Copy buffer used while moving blobs
const COPY_CHUNK: usize = 1024 * 1024;

/// Outcome of one vacuum pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumReport {
    pub files_moved: usize,
    pub blocks_before: u64,
    pub blocks_after: u64,
}

impl VirtualDisk {
    /// Compact all live data into a new contiguous container
    ///
    /// Holds the allocation lock throughout. Must not run while streams
    /// returned by `load` are still being read.
    ///
    /// A failure before the commit marker lands leaves the disk exactly as
    /// it was. A failure after it leaves the on-disk swap to the next mount
    /// and refuses further operations on this handle.
    pub fn vacuum(&self) -> Result<VacuumReport> {
        let mut state = self.alloc.lock();
        self.ensure_mounted()?;

        let blocks_before = state.bitmap.total_blocks();
        let dir = self.dir().to_path_buf();

        let (files_moved, blocks_after) = match self.stage(&dir) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "vacuum failed, original untouched");
                discard_staged(&dir);
                return Err(e);
            }
        };

        if let Err(e) = write_commit_marker(&dir) {
            warn!(dir = %dir.display(), error = %e, "vacuum commit failed, original untouched");
            let _ = fs::remove_file(dir.join(VACUUM_COMMIT_FILENAME));
            discard_staged(&dir);
            return Err(e);
        }

        if let Err(e) = roll_forward(&dir).and_then(|_| self.remount_locked(&mut state, blocks_after)) {
            self.needs_remount.store(true, Ordering::SeqCst);
            error!(
                dir = %dir.display(),
                error = %e,
                "vacuum committed but swap failed; reopen the disk to finish it"
            );
            return Err(e);
        }

        let report = VacuumReport {
            files_moved,
            blocks_before,
            blocks_after,
        };
        info!(
            dir = %dir.display(),
            files = report.files_moved,
            blocks_before = report.blocks_before,
            blocks_after = report.blocks_after,
            "vacuum complete"
        );
        Ok(report)
    }

    /// Write the next generation of all four disk files as staged siblings
    ///
    /// Returns the number of records and the new block count.
    fn stage(&self, dir: &Path) -> Result<(usize, u64)> {
        let (records, total_blocks) = self.stage_container(&staged_path(dir, CONTAINER_FILENAME))?;

        let mut bitmap = AllocationBitmap::new(total_blocks);
        for block in 0..total_blocks {
            bitmap.set(block);
        }
        BitmapFile::create(&staged_path(dir, BITMAP_FILENAME), &bitmap)?.sync()?;

        ContainerHeader::new(self.block_size(), total_blocks)
            .write_to(&staged_path(dir, HEADER_FILENAME), false)?;
        LogIndex::write_snapshot(&staged_path(dir, INDEX_FILENAME), &records)?;

        pio::sync_dir(dir)?;
        Ok((records.len(), total_blocks))
    }

    /// Copy every record into the staged container in URI order
    fn stage_container(&self, path: &Path) -> Result<(BTreeMap<String, FileRecord>, u64)> {
        let block_size = self.block_size();
        let source = self.container.read().clone();

        let target: File = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut records = BTreeMap::new();
        let mut next_block = 0u64;
        let mut chunk = vec![0u8; COPY_CHUNK];

        for (uri, record) in self.index.enumerate() {
            let blocks = blocks_for(record.file_size, block_size);
            let block_count = u32::try_from(blocks).map_err(|_| {
                VaultError::Corruption(format!("Record {} spans too many blocks to compact", uri))
            })?;

            let mut stream = ExtentStream::new(
                Arc::clone(&source),
                record.extents.clone(),
                record.file_size,
                block_size,
            );
            let mut offset = next_block * block_size as u64;
            let mut copied = 0u64;
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                pio::write_all_at(&target, &chunk[..n], offset)?;
                offset += n as u64;
                copied += n as u64;
            }

            if copied != record.file_size {
                return Err(VaultError::Corruption(format!(
                    "Record {} yielded {} of {} bytes",
                    uri, copied, record.file_size
                )));
            }

            let extents = if block_count == 0 {
                Vec::new()
            } else {
                vec![Extent::new(next_block, block_count)]
            };
            next_block += blocks;

            records.insert(
                uri,
                FileRecord {
                    file_size: record.file_size,
                    extents,
                    created_at: record.created_at,
                },
            );
        }

        target.set_len(next_block * block_size as u64)?;
        target.sync_all()?;

        Ok((records, next_block))
    }

    /// Point the in-memory state at the swapped-in files
    fn remount_locked(&self, state: &mut AllocState, total_blocks: u64) -> Result<()> {
        let dir = self.dir();
        let container = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join(CONTAINER_FILENAME))?;
        let (bitmap_file, bitmap) = BitmapFile::open(&dir.join(BITMAP_FILENAME), total_blocks)?;

        *self.container.write() = Arc::new(container);
        *state = AllocState { bitmap, bitmap_file };
        self.index.reload()?;
        Ok(())
    }
}

// =============================================================================
// Generation Swap
// =============================================================================

/// Finish or discard an interrupted vacuum in `dir`
///
/// Called at mount before any disk file is opened.
pub(super) fn recover(dir: &Path) -> Result<()> {
    if dir.join(VACUUM_COMMIT_FILENAME).exists() {
        warn!(dir = %dir.display(), "rolling forward interrupted vacuum");
        return roll_forward(dir);
    }

    let _ = fs::remove_file(pending_marker(dir));
    let removed = discard_staged(dir);
    if removed > 0 {
        warn!(dir = %dir.display(), removed, "discarded uncommitted vacuum files");
    }
    Ok(())
}

/// Staged sibling of one disk file
fn staged_path(dir: &Path, name: &str) -> PathBuf {
    sibling(&dir.join(name), STAGING_SUFFIX)
}

fn pending_marker(dir: &Path) -> PathBuf {
    sibling(&dir.join(VACUUM_COMMIT_FILENAME), "tmp")
}

/// Make the staged generation authoritative with one atomic rename
fn write_commit_marker(dir: &Path) -> Result<()> {
    let pending = pending_marker(dir);
    File::create(&pending)?.sync_all()?;
    fs::rename(&pending, dir.join(VACUUM_COMMIT_FILENAME))?;
    pio::sync_dir(dir)?;
    Ok(())
}

/// Rename every staged file over its original, then drop the marker
///
/// Safe to repeat: files already renamed have no staged sibling left.
fn roll_forward(dir: &Path) -> Result<()> {
    for name in DISK_FILENAMES {
        let staged = staged_path(dir, name);
        match fs::rename(&staged, dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    pio::sync_dir(dir)?;

    fs::remove_file(dir.join(VACUUM_COMMIT_FILENAME))?;
    pio::sync_dir(dir)?;
    Ok(())
}

/// Best-effort removal of staged files; returns how many were removed
fn discard_staged(dir: &Path) -> usize {
    DISK_FILENAMES
        .iter()
        .filter(|name| fs::remove_file(staged_path(dir, name)).is_ok())
        .count()
}
