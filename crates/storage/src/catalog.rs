//! Metadata catalog: logical path resolution, authority and descriptors.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use tilestore_common::{
    Action, DatasourceConfig, DbBackend, EngineConfig, LogicalPath, StoreError, StoreResult,
};

use crate::backend::StorageBackend;
use crate::descriptor::Descriptor;
use crate::document::{DocumentStore, MemoryDocumentStore};
use crate::filter::Filter;
use crate::object_store::ObjectStorage;
use crate::postgres::PgDocumentStore;

/// Outcome of resolving a logical path.
#[derive(Clone)]
pub struct Resolved {
    /// Datasource name owning the path.
    pub datasource: String,
    pub endpoint: Arc<dyn StorageBackend>,
    /// Key prefix of the dataset on `endpoint`.
    pub physical_key: String,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("datasource", &self.datasource)
            .field("endpoint", &self.endpoint.name())
            .field("physical_key", &self.physical_key)
            .finish()
    }
}

/// Resolves logical paths and stores descriptors, enforcing datasource
/// authority before any storage access.
pub struct MetadataCatalog {
    datasources: BTreeMap<String, DatasourceConfig>,
    /// alias -> datasource name
    aliases: HashMap<String, String>,
    endpoints: HashMap<String, Arc<dyn StorageBackend>>,
    /// datasource name -> endpoint name
    placement: HashMap<String, String>,
    documents: Arc<dyn DocumentStore>,
}

impl MetadataCatalog {
    /// Assemble a catalog from already-built endpoints and document store.
    pub fn new(
        config: &EngineConfig,
        endpoints: HashMap<String, Arc<dyn StorageBackend>>,
        documents: Arc<dyn DocumentStore>,
    ) -> StoreResult<Self> {
        config.validate().map_err(StoreError::Config)?;

        let datasources = config.metadata_config.datasource_config.clone();
        let mut aliases = HashMap::new();
        let mut placement = HashMap::new();
        for (name, ds) in &datasources {
            aliases.insert(ds.alias.clone(), name.clone());
            let endpoint = config.storage_for(name).ok_or_else(|| {
                StoreError::Config(format!("no storage endpoint for datasource '{}'", name))
            })?;
            if !endpoints.contains_key(endpoint) {
                return Err(StoreError::Config(format!(
                    "storage endpoint '{}' was not provided",
                    endpoint
                )));
            }
            placement.insert(name.clone(), endpoint.to_string());
        }

        Ok(Self {
            datasources,
            aliases,
            endpoints,
            placement,
            documents,
        })
    }

    /// Build every endpoint and the document store from configuration.
    pub async fn from_config(config: &EngineConfig) -> StoreResult<Self> {
        let mut endpoints: HashMap<String, Arc<dyn StorageBackend>> = HashMap::new();
        for (name, client) in &config.storage_client_config {
            let storage = ObjectStorage::from_config(name, client)?;
            info!(endpoint = %name, kind = %storage.kind(), "Storage endpoint configured");
            endpoints.insert(name.clone(), Arc::new(storage));
        }

        let db = &config.metadata_config.db_config;
        let documents: Arc<dyn DocumentStore> = match db.backend {
            DbBackend::Postgres => {
                let store = PgDocumentStore::connect(db).await?;
                store.migrate().await?;
                Arc::new(store)
            }
            DbBackend::Memory => Arc::new(MemoryDocumentStore::new()),
        };

        Self::new(config, endpoints, documents)
    }

    /// Datasource name owning `path`.
    pub fn datasource_for(&self, path: &LogicalPath) -> StoreResult<&str> {
        self.aliases
            .get(path.alias())
            .map(String::as_str)
            .ok_or_else(|| StoreError::unknown_datasource(path.alias(), path.to_string()))
    }

    /// Fail with `Authority` unless `action` is permitted on `datasource`.
    pub fn check_authority(&self, datasource: &str, action: Action) -> StoreResult<()> {
        let ds = self.datasources.get(datasource).ok_or_else(|| {
            StoreError::unknown_datasource(datasource, format!("datasource {}", datasource))
        })?;
        if ds.permits(action) {
            Ok(())
        } else {
            Err(StoreError::authority(datasource, action))
        }
    }

    /// Resolve `path` to its endpoint and physical key for `action`.
    pub fn resolve(&self, path: &LogicalPath, action: Action) -> StoreResult<Resolved> {
        let datasource = self.datasource_for(path)?;
        self.check_authority(datasource, action)?;
        let endpoint_name = self.placement(datasource).ok_or_else(|| {
            StoreError::Config(format!("no storage endpoint for datasource '{}'", datasource))
        })?;
        Ok(Resolved {
            datasource: datasource.to_string(),
            endpoint: self.endpoint(endpoint_name)?,
            physical_key: path.physical_key(),
        })
    }

    /// Endpoint by configured name.
    pub fn endpoint(&self, name: &str) -> StoreResult<Arc<dyn StorageBackend>> {
        self.endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Config(format!("unknown storage endpoint '{}'", name)))
    }

    /// Name of the endpoint datasets of `datasource` are placed on.
    pub fn placement(&self, datasource: &str) -> Option<&str> {
        self.placement.get(datasource).map(String::as_str)
    }

    pub fn datasources(&self) -> impl Iterator<Item = (&str, &DatasourceConfig)> {
        self.datasources.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn collection(datasource: &str) -> String {
        format!("dataset_{}", datasource)
    }

    /// Store `descriptor` at `path`.
    ///
    /// Requires `create` when the entry is new and `write` when it replaces
    /// an existing one.
    #[instrument(skip(self, descriptor), fields(path = %path, kind = descriptor.kind_name()))]
    pub async fn put_descriptor(&self, path: &LogicalPath, descriptor: &Descriptor) -> StoreResult<()> {
        let datasource = self.datasource_for(path)?;
        let collection = Self::collection(datasource);
        let id = path.to_string();
        let doc = to_document(path, descriptor)?;

        let existing = self.documents.get(&collection, &id).await?;
        if existing.is_none() {
            self.check_authority(datasource, Action::Create)?;
            if self.documents.insert(&collection, &id, doc.clone()).await? {
                debug!("Descriptor created");
                return Ok(());
            }
        }

        self.check_authority(datasource, Action::Write)?;
        self.documents.upsert(&collection, &id, doc).await?;
        debug!("Descriptor replaced");
        Ok(())
    }

    /// Store a new descriptor, failing with `AlreadyExists` if `path` is taken.
    #[instrument(skip(self, descriptor), fields(path = %path, kind = descriptor.kind_name()))]
    pub async fn create_descriptor(
        &self,
        path: &LogicalPath,
        descriptor: &Descriptor,
    ) -> StoreResult<()> {
        let datasource = self.datasource_for(path)?;
        self.check_authority(datasource, Action::Create)?;
        let doc = to_document(path, descriptor)?;

        if !self
            .documents
            .insert(&Self::collection(datasource), &path.to_string(), doc)
            .await?
        {
            return Err(StoreError::AlreadyExists {
                path: path.to_string(),
            });
        }
        Ok(())
    }

    /// Undo a [`MetadataCatalog::create_descriptor`] whose dataset could not
    /// be stored. Only the caller that created `path` may call this.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn abandon_created(&self, path: &LogicalPath) -> StoreResult<()> {
        let datasource = self.datasource_for(path)?;
        self.check_authority(datasource, Action::Create)?;
        self.documents
            .delete(&Self::collection(datasource), &path.to_string())
            .await?;
        debug!("Abandoned descriptor removed");
        Ok(())
    }

    /// Fetch the descriptor at `path`, or `NotFound`.
    pub async fn get_descriptor(&self, path: &LogicalPath) -> StoreResult<Descriptor> {
        let datasource = self.datasource_for(path)?;
        self.check_authority(datasource, Action::Read)?;

        let doc = self
            .documents
            .get(&Self::collection(datasource), &path.to_string())
            .await?
            .ok_or_else(|| StoreError::not_found(path.to_string()))?;
        from_document(path.to_string(), doc)
    }

    pub async fn exists(&self, path: &LogicalPath) -> StoreResult<bool> {
        let datasource = self.datasource_for(path)?;
        self.check_authority(datasource, Action::Read)?;
        Ok(self
            .documents
            .get(&Self::collection(datasource), &path.to_string())
            .await?
            .is_some())
    }

    /// Remove the descriptor at `path`, or `NotFound`.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn delete_descriptor(&self, path: &LogicalPath) -> StoreResult<()> {
        let datasource = self.datasource_for(path)?;
        self.check_authority(datasource, Action::Delete)?;

        if !self
            .documents
            .delete(&Self::collection(datasource), &path.to_string())
            .await?
        {
            return Err(StoreError::not_found(path.to_string()));
        }
        Ok(())
    }

    /// Descriptors of `datasource` matching `filter`, ordered by path.
    #[instrument(skip(self))]
    pub async fn query_by_filter(
        &self,
        datasource: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Descriptor>> {
        self.check_authority(datasource, Action::Read)?;

        let docs = self
            .documents
            .find(&Self::collection(datasource), filter, limit)
            .await?;
        debug!(count = docs.len(), "Catalog query");
        docs.into_iter()
            .map(|doc| from_document(datasource.to_string(), doc))
            .collect()
    }
}

fn to_document(path: &LogicalPath, descriptor: &Descriptor) -> StoreResult<Value> {
    if descriptor.path() != path {
        return Err(StoreError::catalog(
            path.to_string(),
            format!("descriptor is for {}", descriptor.path()),
        ));
    }
    serde_json::to_value(descriptor).map_err(|e| StoreError::catalog(path.to_string(), e))
}

fn from_document(key: String, doc: Value) -> StoreResult<Descriptor> {
    serde_json::from_value(doc)
        .map_err(|e| StoreError::catalog(key, format!("malformed descriptor: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BackendLocation, BandDescriptor};
    use chrono::Utc;
    use tilestore_common::{
        Crs, DataType, ErrorKind, GeoTransform, MetadataConfig, RasterShape, StorageClientConfig,
    };

    fn config() -> EngineConfig {
        let mut storage = BTreeMap::new();
        storage.insert("mem".to_string(), StorageClientConfig::Memory);
        let mut datasources = BTreeMap::new();
        datasources.insert(
            "landsat".to_string(),
            DatasourceConfig {
                alias: "ls".to_string(),
                authority: vec![Action::Create, Action::Read, Action::Write, Action::Delete],
                storage: None,
            },
        );
        datasources.insert(
            "archive".to_string(),
            DatasourceConfig {
                alias: "arc".to_string(),
                authority: vec![Action::Read],
                storage: None,
            },
        );
        EngineConfig {
            storage_client_config: storage,
            default_storage: None,
            metadata_config: MetadataConfig {
                db_config: Default::default(),
                datasource_config: datasources,
                cache_config: Default::default(),
            },
            engine: Default::default(),
            logging: Default::default(),
        }
    }

    fn catalog() -> MetadataCatalog {
        let mut endpoints: HashMap<String, Arc<dyn StorageBackend>> = HashMap::new();
        endpoints.insert("mem".to_string(), Arc::new(ObjectStorage::in_memory("mem")));
        MetadataCatalog::new(&config(), endpoints, Arc::new(MemoryDocumentStore::new())).unwrap()
    }

    fn band(path: &str) -> Descriptor {
        let band_path = LogicalPath::parse(path).unwrap();
        Descriptor::Band(BandDescriptor {
            band_name: band_path.name().to_string(),
            backend: BackendLocation {
                endpoint: "mem".to_string(),
                key: band_path.physical_key(),
            },
            band_path,
            crs: Crs::wgs84(),
            transform: GeoTransform::new([180.0, 1.0, 0.0, 90.0, 0.0, -1.0]),
            shape: RasterShape::new(4, 4),
            data_type: DataType::Uint8,
            nodata: Some(0.0),
            tile_size: Some(2),
            readonly: false,
            image_path: None,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_resolve() {
        let catalog = catalog();
        let path = LogicalPath::parse("/store/ls/a/b").unwrap();
        let resolved = catalog.resolve(&path, Action::Write).unwrap();
        assert_eq!(resolved.datasource, "landsat");
        assert_eq!(resolved.physical_key, "ls/a/b");
        assert_eq!(resolved.endpoint.name(), "mem");
    }

    #[test]
    fn test_resolve_unknown_alias() {
        let catalog = catalog();
        let path = LogicalPath::parse("/store/unknownalias/x").unwrap();
        let err = catalog.resolve(&path, Action::Read).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownDatasource);
    }

    #[test]
    fn test_resolve_without_authority() {
        let catalog = catalog();
        let path = LogicalPath::parse("/store/arc/x").unwrap();
        assert!(catalog.resolve(&path, Action::Read).is_ok());
        let err = catalog.resolve(&path, Action::Write).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authority);
    }

    #[tokio::test]
    async fn test_descriptor_lifecycle() {
        let catalog = catalog();
        let path = LogicalPath::parse("/store/ls/scene/B01").unwrap();
        let desc = band("/store/ls/scene/B01");

        assert_eq!(
            catalog.get_descriptor(&path).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        catalog.create_descriptor(&path, &desc).await.unwrap();
        assert_eq!(
            catalog.create_descriptor(&path, &desc).await.unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert!(catalog.exists(&path).await.unwrap());
        assert_eq!(catalog.get_descriptor(&path).await.unwrap(), desc);

        catalog.put_descriptor(&path, &desc).await.unwrap();
        catalog.delete_descriptor(&path).await.unwrap();
        assert!(!catalog.exists(&path).await.unwrap());
        assert_eq!(
            catalog.delete_descriptor(&path).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_put_requires_create_authority() {
        let catalog = catalog();
        let path = LogicalPath::parse("/store/arc/x").unwrap();
        let err = catalog
            .put_descriptor(&path, &band("/store/arc/x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authority);
    }

    #[tokio::test]
    async fn test_descriptor_path_must_match() {
        let catalog = catalog();
        let path = LogicalPath::parse("/store/ls/x").unwrap();
        let err = catalog
            .put_descriptor(&path, &band("/store/ls/y"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Catalog);
    }

    #[tokio::test]
    async fn test_query_by_filter() {
        let catalog = catalog();
        for p in ["/store/ls/s2/B02", "/store/ls/s1/B01", "/store/ls/s1/B02"] {
            let path = LogicalPath::parse(p).unwrap();
            catalog.create_descriptor(&path, &band(p)).await.unwrap();
        }

        let found = catalog
            .query_by_filter("landsat", &Filter::eq("band_name", "B02"), None)
            .await
            .unwrap();
        let paths: Vec<String> = found.iter().map(|d| d.path().to_string()).collect();
        assert_eq!(paths, vec!["/store/ls/s1/B02", "/store/ls/s2/B02"]);

        let limited = catalog
            .query_by_filter("landsat", &Filter::All, Some(1))
            .await
            .unwrap();
        assert_eq!(limited[0].path().to_string(), "/store/ls/s1/B01");
    }
}
