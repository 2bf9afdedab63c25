//! Configuration for BlockVault
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, VaultError};
use crate::format::DEFAULT_BLOCK_SIZE;

/// Main configuration for a BlockVault instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure (sharded):
    ///   {data_dir}/
    ///     ├── shards.manifest
    ///     ├── shard_000/       (one virtual disk per shard)
    ///     └── shard_001/ ...
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Virtual Disk Configuration
    // -------------------------------------------------------------------------
    /// Physical allocation unit in bytes (only used when formatting)
    pub block_size: u32,

    /// Container size in bytes when a fresh disk is formatted
    pub initial_size: u64,

    /// Extend the container when no free run is large enough
    pub auto_grow: bool,

    /// Extra blocks appended on every growth beyond what the save needs
    pub growth_buffer_blocks: u64,

    /// How aggressively data, bitmap and index are fsynced
    pub sync_strategy: SyncStrategy,

    /// Rewrite the index log once it holds this many entries per live record
    pub index_compaction_ratio: usize,

    // -------------------------------------------------------------------------
    // Sharding Configuration
    // -------------------------------------------------------------------------
    /// Number of independent virtual disks
    pub shard_count: usize,

    /// Points placed on the hash ring for every shard
    pub virtual_nodes_per_shard: usize,
}

/// Durability strategy for mutating operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync container, bitmap and index after every mutation (safest, slowest)
    EveryWrite,

    /// Leave flushing to the OS; fsync only on close and vacuum
    OsBuffered,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blockvault_data"),
            block_size: DEFAULT_BLOCK_SIZE,
            initial_size: 16 * 1024 * 1024, // 16 MB
            auto_grow: true,
            growth_buffer_blocks: 16,
            sync_strategy: SyncStrategy::EveryWrite,
            index_compaction_ratio: 4,
            shard_count: 4,
            virtual_nodes_per_shard: 100,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engines cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 512 || !self.block_size.is_power_of_two() {
            return Err(VaultError::Config(format!(
                "block_size must be a power of two >= 512, got {}",
                self.block_size
            )));
        }
        if self.shard_count == 0 {
            return Err(VaultError::Config("shard_count must be at least 1".to_string()));
        }
        if self.virtual_nodes_per_shard == 0 {
            return Err(VaultError::Config(
                "virtual_nodes_per_shard must be at least 1".to_string(),
            ));
        }
        if self.index_compaction_ratio < 2 {
            return Err(VaultError::Config(
                "index_compaction_ratio must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Block count a freshly formatted container starts with
    pub fn initial_blocks(&self) -> u64 {
        self.initial_size / self.block_size as u64
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the initial container size (in bytes)
    pub fn initial_size(mut self, size: u64) -> Self {
        self.config.initial_size = size;
        self
    }

    /// Enable or disable automatic container growth
    pub fn auto_grow(mut self, enabled: bool) -> Self {
        self.config.auto_grow = enabled;
        self
    }

    /// Set the number of spare blocks added on growth
    pub fn growth_buffer_blocks(mut self, blocks: u64) -> Self {
        self.config.growth_buffer_blocks = blocks;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the index log compaction ratio
    pub fn index_compaction_ratio(mut self, ratio: usize) -> Self {
        self.config.index_compaction_ratio = ratio;
        self
    }

    /// Set the number of shards
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Set the number of ring points per shard
    pub fn virtual_nodes_per_shard(mut self, count: usize) -> Self {
        self.config.virtual_nodes_per_shard = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
