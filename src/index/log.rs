//! Log-structured File Index
//!
//! Append-only log replayed into an ordered map at open.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, VaultError};
use crate::format::tmp_sibling;

use super::{FileIndex, FileRecord, IndexOp};

/// Logs shorter than this are never compacted
const MIN_COMPACTION_ENTRIES: u64 = 64;

/// Outcome of replaying the log at open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Frames successfully replayed
    pub entries_recovered: u64,

    /// Bad frames found (replay stops at the first one)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether a torn or corrupt tail was cut off
    pub was_truncated: bool,
}

/// Append handle plus bookkeeping, guarded by one mutex
struct LogWriter {
    file: File,
    next_lsn: u64,
    /// Frames currently in the log file
    entries: u64,
    /// Length of the valid prefix of the file
    len: u64,
}

/// Durable [`FileIndex`] backed by an append-only log
///
/// ## Concurrency:
/// - `records`: RwLock, readers never wait on log I/O
/// - `log`: Mutex, always taken before `records` when both are needed
pub struct LogIndex {
    path: PathBuf,
    records: RwLock<BTreeMap<String, FileRecord>>,
    log: Mutex<LogWriter>,
    sync: bool,
    compaction_ratio: usize,
}

impl LogIndex {
    /// Open or create the log at `path` and replay it
    pub fn open(path: &Path, sync: bool, compaction_ratio: usize) -> Result<(Self, RecoveryReport)> {
        let (writer, records, report) = replay(path)?;

        let index = Self {
            path: path.to_path_buf(),
            records: RwLock::new(records),
            log: Mutex::new(writer),
            sync,
            compaction_ratio,
        };

        Ok((index, report))
    }

    /// Write a complete log holding exactly `records` to `path`
    ///
    /// Used to stage a replacement index; the file is fsynced before return.
    pub fn write_snapshot(path: &Path, records: &BTreeMap<String, FileRecord>) -> Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut written = 0u64;
        for (lsn, (uri, record)) in (1u64..).zip(records) {
            let op = IndexOp::Set {
                uri: uri.clone(),
                record: record.clone(),
            };
            let frame = op.encode_frame(lsn)?;
            file.write_all(&frame)?;
            written += frame.len() as u64;
        }
        file.sync_all()?;
        Ok(written)
    }

    /// Re-read the log file after it was replaced underneath this index
    pub fn reload(&self) -> Result<RecoveryReport> {
        let mut log = self.log.lock();
        let (writer, records, report) = replay(&self.path)?;
        *log = writer;
        *self.records.write() = records;
        Ok(report)
    }

    /// Rewrite the log as one `Set` per live record
    pub fn compact(&self) -> Result<()> {
        let mut log = self.log.lock();
        let snapshot = self.records.read().clone();
        self.rewrite_locked(&mut log, &snapshot)
    }

    /// Frames currently in the log file
    pub fn log_entries(&self) -> u64 {
        self.log.lock().entries
    }

    pub fn sync(&self) -> Result<()> {
        self.log.lock().file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn append_locked(&self, log: &mut LogWriter, op: &IndexOp) -> Result<()> {
        let frame = op.encode_frame(log.next_lsn)?;
        if let Err(e) = log.file.write_all(&frame) {
            // Drop a partial frame so later appends stay replayable
            let _ = log.file.set_len(log.len);
            return Err(e.into());
        }
        log.len += frame.len() as u64;
        if self.sync {
            log.file.sync_data()?;
        }
        log.next_lsn += 1;
        log.entries += 1;
        Ok(())
    }

    fn maybe_compact_locked(&self, log: &mut LogWriter) -> Result<()> {
        let live = self.records.read().len().max(1) as u64;
        if log.entries < MIN_COMPACTION_ENTRIES || log.entries <= live * self.compaction_ratio as u64 {
            return Ok(());
        }
        let snapshot = self.records.read().clone();
        self.rewrite_locked(log, &snapshot)
    }

    fn rewrite_locked(&self, log: &mut LogWriter, records: &BTreeMap<String, FileRecord>) -> Result<()> {
        let tmp_path = tmp_sibling(&self.path);
        let previous_entries = log.entries;
        let written = Self::write_snapshot(&tmp_path, records)?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            VaultError::IndexLog(format!("Failed to install rewritten index log: {}", e))
        })?;

        log.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        log.next_lsn = records.len() as u64 + 1;
        log.entries = records.len() as u64;
        log.len = written;

        info!(
            path = %self.path.display(),
            before = previous_entries,
            after = log.entries,
            "index log rewritten"
        );
        Ok(())
    }
}

/// Replay the log at `path`, cutting off a torn or corrupt tail
fn replay(path: &Path) -> Result<(LogWriter, BTreeMap<String, FileRecord>, RecoveryReport)> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut records = BTreeMap::new();
    let mut report = RecoveryReport::default();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match IndexOp::decode_frame(&bytes[offset..]) {
            Some((lsn, op, len)) => {
                match op {
                    IndexOp::Set { uri, record } => {
                        records.insert(uri, record);
                    }
                    IndexOp::Remove { uri } => {
                        records.remove(&uri);
                    }
                }
                report.entries_recovered += 1;
                report.last_lsn = lsn;
                offset += len;
            }
            None => {
                report.entries_corrupted += 1;
                report.was_truncated = true;
                break;
            }
        }
    }

    if report.was_truncated {
        warn!(
            path = %path.display(),
            valid_bytes = offset,
            total_bytes = bytes.len(),
            "index log has a bad tail, truncating"
        );
        file.set_len(offset as u64)?;
        file.sync_all()?;
    }

    if report.entries_recovered > 0 {
        debug!(
            path = %path.display(),
            recovered = report.entries_recovered,
            live = records.len(),
            last_lsn = report.last_lsn,
            "index log replayed"
        );
    }

    let writer = LogWriter {
        file,
        next_lsn: report.last_lsn + 1,
        entries: report.entries_recovered,
        len: offset as u64,
    };
    Ok((writer, records, report))
}

impl FileIndex for LogIndex {
    fn get(&self, uri: &str) -> Option<FileRecord> {
        self.records.read().get(uri).cloned()
    }

    fn contains(&self, uri: &str) -> bool {
        self.records.read().contains_key(uri)
    }

    fn set(&self, uri: &str, record: FileRecord) -> Result<()> {
        let mut log = self.log.lock();
        let op = IndexOp::Set {
            uri: uri.to_string(),
            record,
        };
        self.append_locked(&mut log, &op)?;

        if let IndexOp::Set { uri, record } = op {
            self.records.write().insert(uri, record);
        }

        self.maybe_compact_locked(&mut log)
    }

    fn remove(&self, uri: &str) -> Result<Option<FileRecord>> {
        let mut log = self.log.lock();
        if !self.records.read().contains_key(uri) {
            return Ok(None);
        }

        self.append_locked(
            &mut log,
            &IndexOp::Remove {
                uri: uri.to_string(),
            },
        )?;
        let removed = self.records.write().remove(uri);

        self.maybe_compact_locked(&mut log)?;
        Ok(removed)
    }

    fn enumerate(&self) -> Vec<(String, FileRecord)> {
        self.records
            .read()
            .iter()
            .map(|(uri, record)| (uri.clone(), record.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}
