//! Shared engine state handed to every band handle.

use std::sync::Arc;
use tokio::sync::RwLock;

use storage::MetadataCatalog;
use tilestore_common::{EngineSettings, RasterBuffer};

use crate::cache::{TileCache, TileKey};
use crate::codec::{RasterCodec, TileCodec};
use crate::types::CacheStats;
use crate::warp::{GridWarper, Warper};

/// Catalog, collaborators, settings and the optional tile cache.
pub struct EngineContext {
    pub catalog: Arc<MetadataCatalog>,
    pub codec: Arc<dyn TileCodec>,
    pub warper: Arc<dyn Warper>,
    pub settings: EngineSettings,
    cache: Option<RwLock<TileCache>>,
}

impl EngineContext {
    /// Context with the default codec and warper.
    ///
    /// `cache_size` is the decoded tile cache budget in bytes; 0 disables it.
    pub fn new(catalog: Arc<MetadataCatalog>, settings: EngineSettings, cache_size: usize) -> Self {
        Self {
            catalog,
            codec: Arc::new(RasterCodec::from_settings(&settings)),
            warper: Arc::new(GridWarper::new()),
            settings,
            cache: (cache_size > 0).then(|| RwLock::new(TileCache::new(cache_size))),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn TileCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_warper(mut self, warper: Arc<dyn Warper>) -> Self {
        self.warper = warper;
        self
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub(crate) async fn cached_tile(&self, endpoint: &str, key: &str) -> Option<Arc<RasterBuffer>> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.write().await;
        cache.get(&TileKey::new(endpoint, key))
    }

    /// Current cache epoch; `None` when the cache is disabled.
    pub(crate) async fn cache_epoch(&self) -> Option<u64> {
        match &self.cache {
            Some(cache) => Some(cache.read().await.epoch()),
            None => None,
        }
    }

    /// Record freshly written content. Call while holding the tile lock.
    pub(crate) async fn cache_tile(&self, endpoint: &str, key: &str, tile: Arc<RasterBuffer>) {
        if let Some(cache) = &self.cache {
            cache.write().await.insert(TileKey::new(endpoint, key), tile);
        }
    }

    /// Cache a tile loaded from storage when nothing was written since `epoch`.
    pub(crate) async fn fill_cache(&self, endpoint: &str, key: &str, tile: Arc<RasterBuffer>, epoch: u64) {
        if let Some(cache) = &self.cache {
            cache.write().await.fill(TileKey::new(endpoint, key), tile, epoch);
        }
    }

    pub(crate) async fn invalidate_prefix(&self, endpoint: &str, prefix: &str) -> usize {
        match &self.cache {
            Some(cache) => cache.write().await.invalidate_prefix(endpoint, prefix),
            None => 0,
        }
    }

    /// Tile cache statistics; all zero when the cache is disabled.
    pub async fn cache_stats(&self) -> CacheStats {
        match &self.cache {
            Some(cache) => cache.read().await.stats(),
            None => CacheStats::default(),
        }
    }
}
