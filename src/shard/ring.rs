//! Consistent-Hash Ring
//!
//! Sorted map of 32-bit points to shard ids. Built once from the shard
//! count and never mutated.

use std::collections::BTreeMap;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Restart-invariant hash used for both ring points and blob placement
///
/// FNV-1a followed by the murmur3 finalizer: keys differing only in their
/// last characters otherwise land in tight clusters. This is not plain
/// FNV-1a, so placements differ from a ring hashed with [`fnv1a_32`] alone.
pub fn stable_hash(key: &str) -> u32 {
    let mut h = fnv1a_32(key.as_bytes());
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Deterministic placement of URIs onto shards
///
/// Points and URIs are both hashed with [`stable_hash`] (FNV-1a plus a
/// finalizer), not bare FNV-1a. Data directories written by a ring that
/// hashes with plain FNV-1a are not placement-compatible; the shard
/// manifest's ring version guards against mixing them.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: BTreeMap<u32, usize>,
    shard_count: usize,
}

impl HashRing {
    /// Place `virtual_nodes` points per shard
    ///
    /// On a point collision the lower shard id keeps the point.
    pub fn new(shard_count: usize, virtual_nodes: usize) -> Self {
        let mut points = BTreeMap::new();
        for shard in 0..shard_count {
            for vnode in 0..virtual_nodes {
                let key = format!("shard-{}-vnode-{}", shard, vnode);
                points.entry(stable_hash(&key)).or_insert(shard);
            }
        }
        Self {
            points,
            shard_count,
        }
    }

    /// Owning shard: first point with hash ≥ the URI's hash, wrapping to
    /// the smallest point
    pub fn locate(&self, uri: &str) -> usize {
        let hash = stable_hash(uri);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, &shard)| shard)
            .unwrap_or(0)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Number of distinct points on the ring
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in ascending hash order
    pub fn points(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.points.iter().map(|(&h, &s)| (h, s))
    }
}
