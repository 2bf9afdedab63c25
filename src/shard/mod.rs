//! Sharding Module
//!
//! Spreads blobs over N independent virtual disks with a consistent-hash ring.
//!
//! ## Responsibilities
//! - Stable placement: same URI → same shard across calls and restarts
//! - Delegate save/load/delete/exists to the owning shard
//! - Mount shards in parallel; shards share no locks, state or files
//!
//! Changing the shard count requires an external migration; the manifest
//! refuses to reopen a directory with a different ring geometry.

mod engine;
mod manifest;
mod ring;

pub use engine::ShardedEngine;
pub use manifest::{ShardManifest, MANIFEST_FILENAME, RING_VERSION};
pub use ring::{fnv1a_32, stable_hash, HashRing};
