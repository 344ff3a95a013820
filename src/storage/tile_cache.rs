//! # Shared Tile Cache with Lock Sharding
//!
//! Decompressed tiles are served from a bounded LRU cache shared by every
//! query on the storage manager. Keys are `(fragment, stream, tile)`;
//! values are `Arc`'d decompressed payloads, so a reader holds its tile
//! across an eviction without pinning the cache.
//!
//! ## Lock Sharding
//!
//! A single lock would serialize every tile access across concurrent
//! queries. The cache uses [`CACHE_SHARD_COUNT`] independent shards, each
//! behind its own `parking_lot` mutex; the hot path (lookup + recency
//! bump) touches exactly one shard. Admission and eviction take the same
//! shard lock, so eviction pressure in one shard never blocks lookups in
//! another.
//!
//! ## Eviction
//!
//! LRU over a global monotonic stamp, with size accounting in decompressed
//! bytes. An entry larger than a shard's whole budget is served uncached
//! rather than wiping the shard.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::config::constants::CACHE_SHARD_COUNT;

/// Identity of one decompressed tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Stable per-fragment id (hash of the fragment URI).
    pub fragment: u64,
    /// Stream index within the schema's canonical stream list.
    pub stream: u32,
    /// Tile index within the stream.
    pub tile: u64,
}

struct Entry {
    data: Arc<Vec<u8>>,
    stamp: u64,
}

#[derive(Default)]
struct Shard {
    entries: HashMap<TileKey, Entry>,
    used: u64,
}

pub struct TileCache {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: u64,
    clock: AtomicU64,
}

impl TileCache {
    /// `capacity` is the total decompressed-byte budget, split evenly
    /// across shards.
    pub fn new(capacity: u64) -> Self {
        let shards = (0..CACHE_SHARD_COUNT)
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self {
            shards,
            shard_capacity: capacity / CACHE_SHARD_COUNT as u64,
            clock: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &TileKey) -> &Mutex<Shard> {
        let hash = key
            .fragment
            .wrapping_mul(31)
            .wrapping_add(key.stream as u64)
            .wrapping_mul(31)
            .wrapping_add(key.tile);
        &self.shards[(hash as usize) % CACHE_SHARD_COUNT]
    }

    pub fn get(&self, key: &TileKey) -> Option<Arc<Vec<u8>>> {
        let mut shard = self.shard(key).lock();
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        shard.entries.get_mut(key).map(|entry| {
            entry.stamp = stamp;
            Arc::clone(&entry.data)
        })
    }

    /// Admits a decompressed tile, evicting least-recently-used entries
    /// until it fits. Oversized tiles are not admitted.
    pub fn insert(&self, key: TileKey, data: Arc<Vec<u8>>) {
        let size = data.len() as u64;
        if size > self.shard_capacity {
            trace!(size, "tile exceeds a cache shard, serving uncached");
            return;
        }
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut shard = self.shard(&key).lock();
        if let Some(old) = shard.entries.remove(&key) {
            shard.used -= old.data.len() as u64;
        }
        while shard.used + size > self.shard_capacity {
            let victim = shard
                .entries
                .iter()
                .min_by_key(|(_, e)| e.stamp)
                .map(|(k, _)| *k);
            match victim {
                Some(victim) => {
                    let evicted = shard.entries.remove(&victim).unwrap();
                    shard.used -= evicted.data.len() as u64;
                    trace!(?victim, "evicted tile");
                }
                None => break,
            }
        }
        shard.used += size;
        shard.entries.insert(key, Entry { data, stamp });
    }

    /// Total decompressed bytes currently cached.
    pub fn bytes_used(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().used).sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tile: u64) -> TileKey {
        TileKey {
            fragment: 1,
            stream: 0,
            tile,
        }
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = TileCache::new(1024 * CACHE_SHARD_COUNT as u64);
        assert!(cache.get(&key(0)).is_none());
        cache.insert(key(0), Arc::new(vec![7u8; 16]));
        assert_eq!(cache.get(&key(0)).unwrap().as_slice(), &[7u8; 16]);
    }

    #[test]
    fn test_cache_evicts_lru_under_pressure() {
        // One shard's worth of budget: 64 bytes.
        let cache = TileCache::new(64 * CACHE_SHARD_COUNT as u64);
        // All keys with the same fragment/stream land in shards by tile; use
        // tiles that map to the same shard.
        let a = TileKey { fragment: 0, stream: 0, tile: 0 };
        let b = TileKey {
            fragment: 0,
            stream: 0,
            tile: CACHE_SHARD_COUNT as u64,
        };
        let c = TileKey {
            fragment: 0,
            stream: 0,
            tile: 2 * CACHE_SHARD_COUNT as u64,
        };
        cache.insert(a, Arc::new(vec![0u8; 32]));
        cache.insert(b, Arc::new(vec![0u8; 32]));
        // Touch `a` so `b` is the eviction victim.
        assert!(cache.get(&a).is_some());
        cache.insert(c, Arc::new(vec![0u8; 32]));
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_cache_skips_oversized_tiles() {
        let cache = TileCache::new(64 * CACHE_SHARD_COUNT as u64);
        cache.insert(key(0), Arc::new(vec![0u8; 128]));
        assert!(cache.get(&key(0)).is_none());
        assert_eq!(cache.bytes_used(), 0);
    }
}
