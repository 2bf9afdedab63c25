//! Sharded Engine
//!
//! N independently mounted virtual disks behind one hash ring.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::store::BlobStore;
use crate::vdisk::{DiskStats, ExtentStream, VacuumReport, VirtualDisk};

use super::{HashRing, ShardManifest};

/// Routes every URI to exactly one shard
///
/// ## Concurrency:
/// - No engine-level lock; each shard has its own allocation lock
/// - Operations on URIs owned by different shards run fully in parallel
pub struct ShardedEngine {
    config: Config,
    ring: HashRing,
    shards: Vec<VirtualDisk>,
}

impl ShardedEngine {
    /// Open or create every shard under `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate config and check/write the shard manifest
    /// 2. Build the hash ring
    /// 3. Mount/format all shard directories concurrently
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        ShardManifest::check_or_create(&config.data_dir, &config)?;

        let ring = HashRing::new(config.shard_count, config.virtual_nodes_per_shard);

        let mounted = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..config.shard_count)
                .map(|id| {
                    let dir = Self::shard_dir(&config.data_dir, id);
                    let config = &config;
                    s.spawn(move |_| VirtualDisk::open(&dir, config))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| mount_panicked())?;

        let mut shards = Vec::with_capacity(config.shard_count);
        for result in mounted {
            shards.push(result.map_err(|_| mount_panicked())??);
        }

        info!(
            data_dir = %config.data_dir.display(),
            shards = shards.len(),
            ring_points = ring.len(),
            "sharded engine opened"
        );

        Ok(Self {
            config,
            ring,
            shards,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    /// Shard id owning `uri`
    pub fn shard_for(&self, uri: &str) -> usize {
        self.ring.locate(uri)
    }

    pub fn save(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.owner(uri).save(uri, data)
    }

    pub fn load(&self, uri: &str) -> Result<ExtentStream> {
        self.owner(uri).load(uri)
    }

    pub fn delete(&self, uri: &str) -> Result<()> {
        self.owner(uri).delete(uri)
    }

    pub fn exists(&self, uri: &str) -> bool {
        self.owner(uri).exists(uri)
    }

    /// Vacuum every shard (shards run in parallel)
    pub fn vacuum_all(&self) -> Result<Vec<VacuumReport>> {
        let results = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = self
                .shards
                .iter()
                .map(|shard| s.spawn(move |_| shard.vacuum()))
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| worker_panicked("vacuum"))?;

        results
            .into_iter()
            .map(|r| r.map_err(|_| worker_panicked("vacuum"))?)
            .collect()
    }

    pub fn stats(&self) -> Result<Vec<DiskStats>> {
        self.shards.iter().map(|shard| shard.stats()).collect()
    }

    /// Close every shard, flushing each
    pub fn close(self) -> Result<()> {
        for shard in self.shards {
            shard.close()?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn shard(&self, id: usize) -> Option<&VirtualDisk> {
        self.shards.get(id)
    }

    pub fn shards(&self) -> &[VirtualDisk] {
        &self.shards
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory holding shard `id` under `data_dir`
    pub fn shard_dir(data_dir: &Path, id: usize) -> PathBuf {
        data_dir.join(format!("shard_{:03}", id))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn owner(&self, uri: &str) -> &VirtualDisk {
        &self.shards[self.ring.locate(uri)]
    }
}

impl BlobStore for ShardedEngine {
    fn save(&self, uri: &str, data: &[u8]) -> Result<()> {
        ShardedEngine::save(self, uri, data)
    }

    fn load(&self, uri: &str) -> Result<ExtentStream> {
        ShardedEngine::load(self, uri)
    }

    fn delete(&self, uri: &str) -> Result<()> {
        ShardedEngine::delete(self, uri)
    }

    fn exists(&self, uri: &str) -> bool {
        ShardedEngine::exists(self, uri)
    }
}

fn mount_panicked() -> VaultError {
    worker_panicked("shard mount")
}

fn worker_panicked(what: &str) -> VaultError {
    VaultError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("{} thread panicked", what),
    ))
}
