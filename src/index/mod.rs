//! File Index Module
//!
//! Durable map from blob URI to its [`FileRecord`].
//!
//! ## Responsibilities
//! - Point lookups for load/exists without the allocation lock
//! - Durable upsert/remove for save/delete
//! - Stable (URI-ordered) enumeration for vacuum and repair
//!
//! ## Log Format
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────────┐
//! │ LSN (8) │ CRC (4) │ Len (4) │ bincode(IndexOp)         │
//! └─────────┴─────────┴─────────┴──────────────────────────┘
//! ... repeated; CRC covers LSN + payload
//! ```

mod entry;
mod log;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::format::Extent;

pub use entry::{IndexOp, FRAME_HEADER_SIZE};
pub use log::{LogIndex, RecoveryReport};

/// Where one blob lives on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Exact blob length in bytes (the last block may be partially used)
    pub file_size: u64,

    /// Physical runs in logical order
    pub extents: Vec<Extent>,

    /// Unix millis when the blob was saved
    pub created_at: u64,
}

impl FileRecord {
    /// Record stamped with the current time
    pub fn new(file_size: u64, extents: Vec<Extent>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            file_size,
            extents,
            created_at,
        }
    }

    /// Total blocks referenced by this record
    pub fn block_count(&self) -> u64 {
        self.extents.iter().map(|e| e.block_count as u64).sum()
    }
}

/// Key-value surface the engine needs from its index
pub trait FileIndex {
    fn get(&self, uri: &str) -> Option<FileRecord>;

    fn contains(&self, uri: &str) -> bool {
        self.get(uri).is_some()
    }

    /// Insert or replace the record for `uri`
    fn set(&self, uri: &str, record: FileRecord) -> Result<()>;

    /// Remove and return the record, if any
    fn remove(&self, uri: &str) -> Result<Option<FileRecord>>;

    /// Snapshot of all records in URI order
    fn enumerate(&self) -> Vec<(String, FileRecord)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
