//! Tiled raster engine.
//!
//! Georeferenced bands are stored as fixed-size tiles on a key/blob backend,
//! with their metadata in the catalog. This crate provides:
//!
//! - **Tile addressing**: pixel, tile and geographic region arithmetic
//! - **Region I/O**: read and write arbitrary grids, reprojecting and
//!   resampling as needed
//! - **Safe concurrent writes**: every tile update runs under the tile's lock
//! - **Caching**: LRU cache of decoded tiles
//!
//! # Architecture
//!
//! ```text
//! RasterStore::open("/store/ls/dem/elevation")
//!      │
//!      ▼
//! MetadataCatalog::get_descriptor ──► SlicedBand / ReadOnlyBand / Image
//!      │
//!      ▼
//! SlicedBand::read_region(request)
//!      │
//!      ├─► Same grid? read the native window directly
//!      │
//!      ├─► Otherwise: project request bounds, read a padded native window
//!      │
//!      ├─► For each tile: TileCache ──miss──► StorageBackend::get ─► TileCodec::decode
//!      │
//!      └─► Warper::resample onto the request grid
//!
//! SlicedBand::write_region(request, data)
//!      │
//!      ├─► Resample data onto the band grid (coverage mask)
//!      │
//!      └─► For each tile: lock ─► load ─► merge ─► encode ─► put ─► unlock
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tile_engine::{RasterBand, RasterStore, RegionRequest};
//!
//! let store = RasterStore::from_config(&config).await?;
//! let band = store.open_band("/store/ls/dem/elevation").await?;
//! let data = band.read_region(&RegionRequest::new(transform, shape)).await?;
//! ```

pub mod band;
pub mod cache;
pub mod codec;
pub mod context;
mod region;
pub mod service;
pub mod tile_grid;
pub mod types;
pub mod warp;

// Re-export commonly used types at crate root
pub use band::{Band, Dataset, Image, PixelAreaBand, RasterBand, ReadOnlyBand, SlicedBand};
pub use cache::{TileCache, TileKey};
pub use codec::{RasterCodec, TileCodec, TileSpec};
pub use context::EngineContext;
pub use service::{BandSpec, BandUpdate, ImageBandSpec, ImageSpec, RasterStore};
pub use tile_grid::{Region, TileGrid, TileIndex};
pub use types::{CacheStats, RegionRequest, ResampleMethod};
pub use warp::{GridSpec, GridWarper, Warper};
