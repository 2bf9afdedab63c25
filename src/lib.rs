//! # BlockVault
//!
//! A pluggable local blob storage backend with:
//! - Block-based virtual disks inside pre-allocated container files
//! - Persistent allocation bitmap with first-fit allocation
//! - Extent lists stitched into seekable streams
//! - Compaction (vacuum) into a fresh contiguous container
//! - Consistent-hash sharding over independent disks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              BlobStore: save / load / delete / exists        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Sharded Engine                             │
//! │            (Hash Ring: URI → shard id)                       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  one per shard, no shared state
//!                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Virtual Disk                               │
//! │     (allocation Mutex: bitmap scan, growth, vacuum)          │
//! └──────┬────────────────────┬────────────────────┬────────────┘
//!        │                    │                    │
//!        ▼                    ▼                    ▼
//!  ┌───────────┐       ┌────────────┐       ┌─────────────┐
//!  │ Container │       │   Bitmap   │       │ File Index  │
//!  │ (blocks)  │       │ (1 bit/blk)│       │ (log + map) │
//!  └─────┬─────┘       └────────────┘       └─────────────┘
//!        │
//!        ▼
//!  ┌───────────────┐
//!  │ ExtentStream  │  (lock-free reads)
//!  └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod format;
pub mod bitmap;
pub mod index;
pub mod vdisk;
pub mod shard;
pub mod repair;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, VaultError};
pub use config::{Config, SyncStrategy};
pub use format::Extent;
pub use index::FileRecord;
pub use shard::ShardedEngine;
pub use store::BlobStore;
pub use vdisk::{ExtentStream, VirtualDisk};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of BlockVault
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
