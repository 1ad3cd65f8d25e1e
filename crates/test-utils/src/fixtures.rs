//! Common test fixtures for tilestore tests.
//!
//! Every fixture configuration defines two datasources:
//!
//! | Datasource | Alias | Authority                      |
//! |------------|-------|--------------------------------|
//! | `landsat`  | `ls`  | create, read, write, delete    |
//! | `archive`  | `arc` | read                           |

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use storage::{MemoryDocumentStore, MetadataCatalog, ObjectStorage, StorageBackend};
use tilestore_common::{
    Action, CacheConfig, DatasourceConfig, DbBackend, DbConfig, EngineConfig, MetadataConfig,
    StorageClientConfig,
};

/// Name of the single storage endpoint in fixture configurations.
pub const ENDPOINT: &str = "mem";

/// Writable datasource alias.
pub const WRITABLE_ALIAS: &str = "ls";

/// Read-only datasource alias.
pub const READ_ONLY_ALIAS: &str = "arc";

/// Common grid definitions for testing, as GDAL-order geotransform
/// coefficients.
pub mod grid {
    /// One-degree pixels with the origin at (180, 90).
    pub const DEGREE_AT_180_90: [f64; 6] = [180.0, 1.0, 0.0, 90.0, 0.0, -1.0];

    /// Global 0.25 degree grid (1440x720).
    pub const GLOBAL_QUARTER_DEGREE: [f64; 6] = [-180.0, 0.25, 0.0, 90.0, 0.0, -0.25];

    /// 10 m pixels in Web Mercator around the origin.
    pub const MERCATOR_10M: [f64; 6] = [-5000.0, 10.0, 0.0, 5000.0, 0.0, -10.0];
}

/// Logical path under the writable datasource.
pub fn writable_path(relative: &str) -> String {
    format!("/store/{}/{}", WRITABLE_ALIAS, relative)
}

/// Logical path under the read-only datasource.
pub fn read_only_path(relative: &str) -> String {
    format!("/store/{}/{}", READ_ONLY_ALIAS, relative)
}

fn datasources() -> BTreeMap<String, DatasourceConfig> {
    let mut datasources = BTreeMap::new();
    datasources.insert(
        "landsat".to_string(),
        DatasourceConfig {
            alias: WRITABLE_ALIAS.to_string(),
            authority: vec![Action::Create, Action::Read, Action::Write, Action::Delete],
            storage: None,
        },
    );
    datasources.insert(
        "archive".to_string(),
        DatasourceConfig {
            alias: READ_ONLY_ALIAS.to_string(),
            authority: vec![Action::Read],
            storage: None,
        },
    );
    datasources
}

fn config_with(storage: StorageClientConfig, cache_size: usize) -> EngineConfig {
    let mut endpoints = BTreeMap::new();
    endpoints.insert(ENDPOINT.to_string(), storage);
    EngineConfig {
        storage_client_config: endpoints,
        default_storage: None,
        metadata_config: MetadataConfig {
            db_config: DbConfig {
                backend: DbBackend::Memory,
                ..Default::default()
            },
            datasource_config: datasources(),
            cache_config: CacheConfig {
                max_cache_size: cache_size,
            },
        },
        engine: Default::default(),
        logging: Default::default(),
    }
}

/// Configuration with in-memory storage, an in-memory catalog and the
/// tile cache disabled.
pub fn memory_config() -> EngineConfig {
    config_with(StorageClientConfig::Memory, 0)
}

/// Same as [`memory_config`] with a tile cache of `cache_size` bytes.
pub fn memory_config_with_cache(cache_size: usize) -> EngineConfig {
    config_with(StorageClientConfig::Memory, cache_size)
}

/// Configuration storing tiles under `base_directory`.
pub fn fs_config(base_directory: &Path) -> EngineConfig {
    config_with(
        StorageClientConfig::Fs {
            base_directory: base_directory.to_path_buf(),
        },
        0,
    )
}

/// A catalog over a fresh in-memory endpoint, returned with that endpoint
/// so tests can inspect stored blobs.
pub fn memory_catalog() -> (MetadataCatalog, Arc<dyn StorageBackend>) {
    let backend: Arc<dyn StorageBackend> = Arc::new(ObjectStorage::in_memory(ENDPOINT));
    let mut endpoints = HashMap::new();
    endpoints.insert(ENDPOINT.to_string(), Arc::clone(&backend));
    let catalog = MetadataCatalog::new(
        &memory_config(),
        endpoints,
        Arc::new(MemoryDocumentStore::new()),
    )
    .expect("fixture configuration is valid");
    (catalog, backend)
}

/// Creates a temporary directory for test outputs.
///
/// The directory is deleted when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("tilestore-test-")
        .tempdir()
        .expect("Failed to create temp directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_is_valid() {
        let config = memory_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage_for("landsat"), Some(ENDPOINT));
        assert_eq!(config.metadata_config.cache_config.max_cache_size, 0);
    }

    #[test]
    fn test_fs_config_is_valid() {
        let dir = temp_test_dir();
        let config = fs_config(dir.path());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_catalog() {
        let (catalog, backend) = memory_catalog();
        assert_eq!(backend.name(), ENDPOINT);
        assert_eq!(catalog.placement("archive"), Some(ENDPOINT));
    }

    #[test]
    fn test_paths() {
        assert_eq!(writable_path("dem/elevation"), "/store/ls/dem/elevation");
        assert_eq!(read_only_path("x"), "/store/arc/x");
    }
}
