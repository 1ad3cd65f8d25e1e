//! LRU cache for decoded tiles.

use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tilestore_common::RasterBuffer;

use crate::types::CacheStats;

/// Cache key: endpoint name and tile key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub endpoint: String,
    pub key: String,
}

impl TileKey {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
        }
    }
}

/// LRU cache for decoded tiles with memory-bounded eviction.
///
/// Entries are refreshed by every successful tile write through this
/// process. Writes by other processes are not observed until eviction.
///
/// Every write or invalidation advances an epoch. A tile loaded from
/// storage is only cached through [`TileCache::fill`] with the epoch seen
/// before the load, so a load that raced a write never replaces newer data.
pub struct TileCache {
    cache: LruCache<TileKey, Arc<RasterBuffer>>,
    memory_limit: usize,
    current_memory: usize,
    epoch: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

fn entry_size(buffer: &RasterBuffer) -> usize {
    buffer.data().len() * std::mem::size_of::<f64>()
}

impl TileCache {
    /// Create a new tile cache with the given memory limit in bytes.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            memory_limit,
            current_memory: 0,
            epoch: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a tile, updating LRU order.
    pub fn get(&mut self, key: &TileKey) -> Option<Arc<RasterBuffer>> {
        if let Some(data) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(data))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.cache.contains(key)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Insert or replace a tile with freshly written content.
    pub fn insert(&mut self, key: TileKey, data: Arc<RasterBuffer>) {
        self.epoch += 1;
        self.store(key, data);
    }

    /// Cache a tile loaded from storage, unless a write or invalidation
    /// happened since `epoch` or the tile is already cached.
    ///
    /// Returns whether the tile was cached.
    pub fn fill(&mut self, key: TileKey, data: Arc<RasterBuffer>, epoch: u64) -> bool {
        if epoch != self.epoch || self.cache.contains(&key) {
            return false;
        }
        self.store(key, data)
    }

    /// Evict least recently used entries to stay under the memory limit,
    /// then insert.
    fn store(&mut self, key: TileKey, data: Arc<RasterBuffer>) -> bool {
        let data_size = entry_size(&data);
        if let Some(old) = self.cache.pop(&key) {
            self.current_memory = self.current_memory.saturating_sub(entry_size(&old));
        }

        while self.current_memory + data_size > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                self.current_memory = self.current_memory.saturating_sub(entry_size(&evicted));
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if data_size > self.memory_limit {
            return false;
        }
        self.cache.put(key, data);
        self.current_memory += data_size;
        true
    }

    /// Drop one tile.
    pub fn invalidate(&mut self, key: &TileKey) {
        self.epoch += 1;
        if let Some(old) = self.cache.pop(key) {
            self.current_memory = self.current_memory.saturating_sub(entry_size(&old));
        }
    }

    /// Drop every tile of `endpoint` whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_prefix(&mut self, endpoint: &str, prefix: &str) -> usize {
        self.epoch += 1;
        let doomed: Vec<TileKey> = self
            .cache
            .iter()
            .filter(|(k, _)| k.endpoint == endpoint && k.key.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.invalidate(key);
        }
        doomed.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&mut self) {
        self.epoch += 1;
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
