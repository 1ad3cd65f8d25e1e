//! Common types shared across the tiled raster store crates.

pub mod bbox;
pub mod buffer;
pub mod config;
pub mod crs;
pub mod dtype;
pub mod error;
pub mod path;
pub mod telemetry;
pub mod transform;

pub use bbox::BoundingBox;
pub use buffer::{PixelWindow, RasterBuffer, RasterShape};
pub use config::{
    Action, CacheConfig, Compression, DatasourceConfig, DbBackend, DbConfig, EngineConfig,
    EngineSettings, LoggingConfig, MetadataConfig, StorageClientConfig,
};
pub use crs::{Crs, CrsCode};
pub use dtype::DataType;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use path::LogicalPath;
pub use transform::GeoTransform;
