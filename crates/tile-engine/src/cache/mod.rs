//! Decoded tile caching.

mod tile_cache;

pub use tile_cache::{TileCache, TileKey};
