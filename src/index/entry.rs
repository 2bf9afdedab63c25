//! Index log entries
//!
//! Frame encoding for the append-only index log.

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::FileRecord;

/// Frame header: LSN (8) + CRC (4) + Len (4) = 16 bytes
pub const FRAME_HEADER_SIZE: usize = 16;

/// Mutations recorded in the index log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexOp {
    /// Insert or replace a record
    Set { uri: String, record: FileRecord },

    /// Drop a record
    Remove { uri: String },
}

impl IndexOp {
    /// Encode as a checksummed frame
    pub fn encode_frame(&self, lsn: u64) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let crc = frame_crc(lsn, &payload);

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&lsn.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode the frame at the start of `buf`
    ///
    /// Returns the LSN, the op and the frame length, or `None` when the
    /// frame is torn, fails its checksum or does not decode.
    pub fn decode_frame(buf: &[u8]) -> Option<(u64, IndexOp, usize)> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let lsn = u64::from_le_bytes(buf[0..8].try_into().ok()?);
        let crc = u32::from_le_bytes(buf[8..12].try_into().ok()?);
        let len = u32::from_le_bytes(buf[12..16].try_into().ok()?) as usize;

        let end = FRAME_HEADER_SIZE.checked_add(len)?;
        if buf.len() < end {
            return None;
        }

        let payload = &buf[FRAME_HEADER_SIZE..end];
        if frame_crc(lsn, payload) != crc {
            return None;
        }

        let op = bincode::deserialize(payload).ok()?;
        Some((lsn, op, end))
    }

    pub fn uri(&self) -> &str {
        match self {
            IndexOp::Set { uri, .. } | IndexOp::Remove { uri } => uri,
        }
    }
}

fn frame_crc(lsn: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
