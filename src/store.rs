//! Storage Contract
//!
//! The four operations the rest of the platform depends on. Blobs are
//! addressed purely by opaque URI strings.

use std::io::Read;

use crate::error::Result;
use crate::vdisk::{ExtentStream, VirtualDisk};

/// Blob storage backend
pub trait BlobStore: Send + Sync {
    /// Store `data` under `uri`, replacing any previous blob
    fn save(&self, uri: &str, data: &[u8]) -> Result<()>;

    /// Store everything `reader` yields under `uri`
    fn save_from(&self, uri: &str, reader: &mut dyn Read) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.save(uri, &data)
    }

    /// Seekable stream over the blob; `NotFound` when absent
    fn load(&self, uri: &str) -> Result<ExtentStream>;

    /// Remove the blob; absent URIs are a no-op
    fn delete(&self, uri: &str) -> Result<()>;

    fn exists(&self, uri: &str) -> bool;
}

impl BlobStore for VirtualDisk {
    fn save(&self, uri: &str, data: &[u8]) -> Result<()> {
        VirtualDisk::save(self, uri, data)
    }

    fn load(&self, uri: &str) -> Result<ExtentStream> {
        VirtualDisk::load(self, uri)
    }

    fn delete(&self, uri: &str) -> Result<()> {
        VirtualDisk::delete(self, uri)
    }

    fn exists(&self, uri: &str) -> bool {
        VirtualDisk::exists(self, uri)
    }
}
