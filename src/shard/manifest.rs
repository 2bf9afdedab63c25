//! Shard manifest
//!
//! Records the ring geometry a data directory was created with; reopening
//! with a different geometry would silently misplace every blob.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, VaultError};

/// Bumped whenever placement hashing changes
pub const RING_VERSION: u32 = 1;

pub const MANIFEST_FILENAME: &str = "shards.manifest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    pub ring_version: u32,
    pub shard_count: u32,
    pub virtual_nodes_per_shard: u32,
}

impl ShardManifest {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ring_version: RING_VERSION,
            shard_count: config.shard_count as u32,
            virtual_nodes_per_shard: config.virtual_nodes_per_shard as u32,
        }
    }

    /// Write the manifest on first open, verify it on later opens
    pub fn check_or_create(data_dir: &Path, config: &Config) -> Result<Self> {
        let path = data_dir.join(MANIFEST_FILENAME);
        let wanted = Self::from_config(config);

        match fs::read(&path) {
            Ok(bytes) => {
                let found: ShardManifest = bincode::deserialize(&bytes)?;
                if found != wanted {
                    return Err(VaultError::Config(format!(
                        "Data directory was created with {} shards x {} vnodes (ring v{}), \
                         configured {} x {} (ring v{}); resharding requires a migration",
                        found.shard_count,
                        found.virtual_nodes_per_shard,
                        found.ring_version,
                        wanted.shard_count,
                        wanted.virtual_nodes_per_shard,
                        wanted.ring_version
                    )));
                }
                Ok(found)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::write(&path, bincode::serialize(&wanted)?)?;
                Ok(wanted)
            }
            Err(e) => Err(e.into()),
        }
    }
}
