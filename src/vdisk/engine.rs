//! Virtual Disk Engine
//!
//! Owns one container, its bitmap and its index.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bitmap::{AllocationBitmap, BitmapFile};
use crate::config::{Config, SyncStrategy};
use crate::error::{Result, VaultError};
use crate::format::{
    blocks_for, io as pio, ContainerHeader, Extent, BITMAP_FILENAME, CONTAINER_FILENAME,
    HEADER_FILENAME, HEADER_SIZE, INDEX_FILENAME,
};
use crate::index::{FileIndex, FileRecord, LogIndex};
use crate::repair::{self, RepairReport};

use super::{vacuum, ExtentStream};

/// Mutable allocation state, guarded by the per-disk lock
pub(super) struct AllocState {
    pub(super) bitmap: AllocationBitmap,
    pub(super) bitmap_file: BitmapFile,
}

/// Point-in-time usage figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    pub block_size: u32,
    pub total_blocks: u64,
    /// Blocks marked in the bitmap
    pub used_blocks: u64,
    /// Blocks referenced by live records (less than `used_blocks` after overwrites)
    pub referenced_blocks: u64,
    pub file_count: usize,
    pub container_bytes: u64,
}

/// A block-based virtual disk
///
/// ## Concurrency Model
///
/// - **Mutations** (save/delete/vacuum/repair): serialized by `alloc`
///   - covers the free-run scan, growth and the bitmap update, so two saves
///     can never claim the same block
///
/// - **Reads** (load/exists): no `alloc` lock
///   - published extents are never rewritten in place; an overwrite gets a
///     fresh extent set and swaps the index entry
///   - vacuum moves live data, so it must not run while streams are open
///     (a stream keeps its own handle to the pre-vacuum container)
pub struct VirtualDisk {
    dir: PathBuf,
    config: Config,
    block_size: u32,
    /// Swapped wholesale by vacuum
    pub(super) container: RwLock<Arc<File>>,
    pub(super) alloc: Mutex<AllocState>,
    pub(super) index: LogIndex,
    /// Set when a committed vacuum could not be swapped in; cleared by reopening
    pub(super) needs_remount: AtomicBool,
}

impl VirtualDisk {
    /// Open the disk in `dir`, formatting it if the container is empty
    ///
    /// On startup:
    /// 1. Create directory; finish or discard an interrupted vacuum
    /// 2. Open the container
    /// 3. Empty container without header → format at `initial_size`
    /// 4. Otherwise derive `total_blocks` from the container length,
    ///    rebuild a stale or unreadable header, self-heal a mis-sized bitmap
    /// 5. Replay the index log
    pub fn open(dir: &Path, config: &Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(dir)?;
        vacuum::recover(dir)?;

        let container_path = dir.join(CONTAINER_FILENAME);
        let header_path = dir.join(HEADER_FILENAME);
        let bitmap_path = dir.join(BITMAP_FILENAME);
        let sync = config.sync_strategy == SyncStrategy::EveryWrite;

        let container = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&container_path)?;
        let container_len = container.metadata()?.len();
        let header = match fs::metadata(&header_path) {
            // Torn write; geometry is re-derived from the container below
            Ok(meta) if meta.len() != HEADER_SIZE as u64 => {
                warn!(dir = %dir.display(), len = meta.len(), "truncated container header");
                None
            }
            _ => ContainerHeader::read_from(&header_path)?,
        };

        let (block_size, state) = if container_len == 0 && header.is_none() {
            let block_size = config.block_size;
            let total_blocks = config.initial_blocks();

            container.set_len(total_blocks * block_size as u64)?;
            container.sync_all()?;

            let bitmap = AllocationBitmap::new(total_blocks);
            let bitmap_file = BitmapFile::create(&bitmap_path, &bitmap)?;
            ContainerHeader::new(block_size, total_blocks).write_to(&header_path, true)?;

            info!(
                dir = %dir.display(),
                block_size,
                total_blocks,
                "formatted virtual disk"
            );
            (block_size, AllocState { bitmap, bitmap_file })
        } else {
            let block_size = match header {
                Some(h) => {
                    if h.block_size != config.block_size {
                        debug!(
                            dir = %dir.display(),
                            on_disk = h.block_size,
                            configured = config.block_size,
                            "using block size recorded in header"
                        );
                    }
                    h.block_size
                }
                None => config.block_size,
            };

            if container_len % block_size as u64 != 0 {
                return Err(VaultError::Corruption(format!(
                    "Container length {} is not a multiple of block size {}",
                    container_len, block_size
                )));
            }
            let total_blocks = container_len / block_size as u64;

            let fresh = ContainerHeader::new(block_size, total_blocks);
            if header != Some(fresh) {
                warn!(
                    dir = %dir.display(),
                    total_blocks,
                    "container header missing or stale, rewriting"
                );
                fresh.write_to(&header_path, true)?;
            }

            let (bitmap_file, bitmap) = BitmapFile::open(&bitmap_path, total_blocks)?;

            info!(
                dir = %dir.display(),
                block_size,
                total_blocks,
                used_blocks = bitmap.used_count(),
                "mounted virtual disk"
            );
            (block_size, AllocState { bitmap, bitmap_file })
        };

        let (index, recovery) = LogIndex::open(
            &dir.join(INDEX_FILENAME),
            sync,
            config.index_compaction_ratio,
        )?;
        if recovery.was_truncated {
            warn!(
                dir = %dir.display(),
                recovered = recovery.entries_recovered,
                "index log recovered with a truncated tail"
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            config: config.clone(),
            block_size,
            container: RwLock::new(Arc::new(container)),
            alloc: Mutex::new(state),
            index,
            needs_remount: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config
    pub fn open_path(dir: &Path) -> Result<Self> {
        Self::open(dir, &Config::default())
    }

    /// Store `data` under `uri`, replacing any previous blob
    ///
    /// Steps (under the allocation lock):
    /// 1. First-fit a run of `ceil(len / block_size)` blocks (grow if none)
    /// 2. Write the data at the allocated physical offsets
    /// 3. Persist the touched bitmap bytes
    /// 4. Upsert the file record
    ///
    /// The previous record's extents stay marked until vacuum or repair
    /// reclaims them, so in-flight readers of the old blob stay valid.
    pub fn save(&self, uri: &str, data: &[u8]) -> Result<()> {
        let blocks_needed = blocks_for(data.len() as u64, self.block_size);
        let sync = self.sync_writes();

        let mut state = self.alloc.lock();
        self.ensure_mounted()?;
        let (extents, grew) = self.allocate_locked(&mut state, blocks_needed)?;

        let container = self.container.read().clone();
        if let Err(e) = self.write_extents(&container, &extents, data) {
            for extent in &extents {
                state.bitmap.clear_extent(extent);
            }
            return Err(e);
        }
        if sync {
            container.sync_data()?;
        }

        let AllocState { bitmap, bitmap_file } = &mut *state;
        if grew {
            bitmap_file.write_all(bitmap, sync)?;
        } else {
            for extent in &extents {
                bitmap_file.write_blocks(bitmap, extent.start_block, extent.end_block() - 1, sync)?;
            }
        }

        debug!(uri, bytes = data.len(), extents = extents.len(), grew, "saved blob");
        self.index.set(uri, FileRecord::new(data.len() as u64, extents))
    }

    /// Buffer a stream and store it under `uri`
    pub fn save_from(&self, uri: &str, reader: &mut dyn std::io::Read) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.save(uri, &data)
    }

    /// Open a stream over the blob stored under `uri`
    pub fn load(&self, uri: &str) -> Result<ExtentStream> {
        self.ensure_mounted()?;
        let record = self
            .index
            .get(uri)
            .ok_or_else(|| VaultError::NotFound(uri.to_string()))?;
        let container = self.container.read().clone();
        Ok(ExtentStream::new(
            container,
            record.extents,
            record.file_size,
            self.block_size,
        ))
    }

    /// Remove the blob and free its blocks; absent URIs are a no-op
    pub fn delete(&self, uri: &str) -> Result<()> {
        let sync = self.sync_writes();
        let mut state = self.alloc.lock();
        self.ensure_mounted()?;

        let record = match self.index.remove(uri)? {
            Some(record) => record,
            None => return Ok(()),
        };

        let AllocState { bitmap, bitmap_file } = &mut *state;
        for extent in &record.extents {
            bitmap.clear_extent(extent);
        }
        for extent in &record.extents {
            if extent.block_count > 0 && extent.start_block < bitmap.total_blocks() {
                let last = (extent.end_block() - 1).min(bitmap.total_blocks() - 1);
                bitmap_file.write_blocks(bitmap, extent.start_block, last, sync)?;
            }
        }

        debug!(uri, blocks = record.block_count(), "deleted blob");
        Ok(())
    }

    pub fn exists(&self, uri: &str) -> bool {
        self.index.contains(uri)
    }

    /// Reconcile the bitmap against the index and persist the result
    pub fn repair(&self) -> Result<RepairReport> {
        let mut state = self.alloc.lock();
        self.ensure_mounted()?;
        let AllocState { bitmap, bitmap_file } = &mut *state;

        let report = repair::reconcile(bitmap, &self.index);
        if report.changed() {
            bitmap_file.write_all(bitmap, true)?;
            warn!(
                dir = %self.dir.display(),
                leaked_freed = report.leaked_freed,
                missing_marked = report.missing_marked,
                "bitmap repaired"
            );
        }
        if !report.out_of_range.is_empty() {
            warn!(
                dir = %self.dir.display(),
                extents = report.out_of_range.len(),
                "records reference blocks beyond the container"
            );
        }
        Ok(report)
    }

    pub fn stats(&self) -> Result<DiskStats> {
        let state = self.alloc.lock();
        let records = self.index.enumerate();
        let container_bytes = self.container.read().metadata()?.len();

        Ok(DiskStats {
            block_size: self.block_size,
            total_blocks: state.bitmap.total_blocks(),
            used_blocks: state.bitmap.used_count(),
            referenced_blocks: records.iter().map(|(_, r)| r.block_count()).sum(),
            file_count: records.len(),
            container_bytes,
        })
    }

    /// Flush bitmap, container and index to stable storage
    pub fn flush(&self) -> Result<()> {
        let mut state = self.alloc.lock();
        self.ensure_mounted()?;
        let AllocState { bitmap, bitmap_file } = &mut *state;
        bitmap_file.write_all(bitmap, true)?;
        self.container.read().sync_all()?;
        self.index.sync()
    }

    /// Close the disk gracefully
    ///
    /// Flushes everything; handles are released when `self` drops. After a
    /// failed vacuum swap nothing is written, so the next mount can finish it.
    pub fn close(self) -> Result<()> {
        if !self.needs_remount.load(Ordering::SeqCst) {
            self.flush()?;
        }
        info!(dir = %self.dir.display(), "virtual disk closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u64 {
        self.alloc.lock().bitmap.total_blocks()
    }

    /// Record for `uri`, if stored
    pub fn record(&self, uri: &str) -> Option<FileRecord> {
        self.index.get(uri)
    }

    /// All records in URI order
    pub fn records(&self) -> Vec<(String, FileRecord)> {
        self.index.enumerate()
    }

    /// Copy of the in-memory bitmap
    pub fn bitmap_snapshot(&self) -> AllocationBitmap {
        self.alloc.lock().bitmap.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Refuse work once a half-swapped vacuum left memory and disk apart
    pub(super) fn ensure_mounted(&self) -> Result<()> {
        if self.needs_remount.load(Ordering::SeqCst) {
            return Err(VaultError::Corruption(format!(
                "{} has an unfinished vacuum swap; reopen the disk",
                self.dir.display()
            )));
        }
        Ok(())
    }

    fn sync_writes(&self) -> bool {
        self.config.sync_strategy == SyncStrategy::EveryWrite
    }

    /// Claim `count` blocks and mark them; returns the extents and whether
    /// the container grew
    fn allocate_locked(&self, state: &mut AllocState, count: u64) -> Result<(Vec<Extent>, bool)> {
        if count == 0 {
            return Ok((Vec::new(), false));
        }
        if count > u32::MAX as u64 {
            return Err(VaultError::CapacityExceeded {
                requested: count,
                available: state.bitmap.free_count(),
            });
        }

        if let Some(start) = state.bitmap.find_free_run(count) {
            let extent = Extent::new(start, count as u32);
            state.bitmap.set_extent(&extent);
            return Ok((vec![extent], false));
        }

        if self.config.auto_grow {
            let extent = self.grow_locked(state, count)?;
            state.bitmap.set_extent(&extent);
            return Ok((vec![extent], true));
        }

        match state.bitmap.find_free_runs(count) {
            Some(extents) => {
                for extent in &extents {
                    state.bitmap.set_extent(extent);
                }
                Ok((extents, false))
            }
            None => Err(VaultError::CapacityExceeded {
                requested: count,
                available: state.bitmap.free_count(),
            }),
        }
    }

    /// Extend container and bitmap; the new space starts at the old end
    fn grow_locked(&self, state: &mut AllocState, count: u64) -> Result<Extent> {
        let old_total = state.bitmap.total_blocks();
        let new_total = old_total + count + self.config.growth_buffer_blocks;

        let container = self.container.read().clone();
        container.set_len(new_total * self.block_size as u64)?;
        state.bitmap.grow(new_total);
        ContainerHeader::new(self.block_size, new_total)
            .write_to(&self.dir.join(HEADER_FILENAME), self.sync_writes())?;

        info!(
            dir = %self.dir.display(),
            old_total,
            new_total,
            "grew virtual disk"
        );
        Ok(Extent::new(old_total, count as u32))
    }

    /// Write `data` across `extents` in logical order
    fn write_extents(&self, container: &File, extents: &[Extent], data: &[u8]) -> Result<()> {
        let block_size = self.block_size as u64;
        let mut written = 0usize;

        for extent in extents {
            let capacity = extent.block_count as u64 * block_size;
            let end = (written as u64 + capacity).min(data.len() as u64) as usize;
            pio::write_all_at(container, &data[written..end], extent.start_block * block_size)?;
            written = end;
        }

        Ok(())
    }
}
