//! Storage layer for the tiled raster store.
//!
//! Provides:
//! - A key/blob [`StorageBackend`] over filesystem, S3, Ceph RGW and memory
//! - Per-tile lock files
//! - The [`MetadataCatalog`] over a PostgreSQL or in-memory document store

pub mod backend;
pub mod catalog;
pub mod descriptor;
pub mod document;
pub mod filter;
pub mod lock;
pub mod object_store;
pub mod postgres;

pub use self::object_store::{BackendKind, ObjectStorage};
pub use backend::StorageBackend;
pub use catalog::{MetadataCatalog, Resolved};
pub use descriptor::{BackendLocation, BandDescriptor, BandRef, Descriptor, ImageDescriptor};
pub use document::{DocumentStore, MemoryDocumentStore};
pub use filter::Filter;
pub use lock::{with_tile_lock, LockRecord, TileLock};
pub use postgres::PgDocumentStore;
