//! `object_store` backed implementation of [`StorageBackend`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::{AmazonS3Builder, S3ConditionalPut},
    local::LocalFileSystem,
    memory::InMemory,
    path::Path,
    ObjectStore, PutMode,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use tilestore_common::{StorageClientConfig, StoreError, StoreResult};

use crate::backend::StorageBackend;

/// Which kind of endpoint an [`ObjectStorage`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Filesystem,
    S3Compatible,
    CephRgw,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Filesystem => "fs",
            BackendKind::S3Compatible => "s3",
            BackendKind::CephRgw => "ceph_rgw",
            BackendKind::Memory => "memory",
        };
        f.write_str(s)
    }
}

/// Storage endpoint over any `object_store` implementation.
///
/// The filesystem store stages writes in a temporary file and renames it into
/// place, and S3/RGW PUTs are atomic, so `put` never exposes partial content.
pub struct ObjectStorage {
    name: String,
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStorage {
    /// Build the endpoint described by `config`.
    pub fn from_config(name: &str, config: &StorageClientConfig) -> StoreResult<Self> {
        match config {
            StorageClientConfig::Fs { base_directory } => Self::filesystem(name, base_directory),
            StorageClientConfig::S3 {
                endpoint,
                bucket,
                access_key,
                secret_key,
                region,
                allow_http,
            } => {
                check_endpoint(name, endpoint)?;
                check_bucket(name, bucket)?;
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_bucket_name(bucket)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_region(region)
                    .with_allow_http(*allow_http)
                    .with_conditional_put(S3ConditionalPut::ETagMatch);
                Self::s3_like(name, BackendKind::S3Compatible, builder)
            }
            StorageClientConfig::CephRgw {
                host,
                port,
                bucket,
                access_key,
                secret_key,
            } => {
                check_host(name, host)?;
                check_bucket(name, bucket)?;
                // RGW serves buckets path-style over plain HTTP
                let builder = AmazonS3Builder::new()
                    .with_endpoint(format!("http://{}:{}", host, port))
                    .with_bucket_name(bucket)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_region("us-east-1")
                    .with_allow_http(true)
                    .with_virtual_hosted_style_request(false)
                    .with_conditional_put(S3ConditionalPut::ETagMatch);
                Self::s3_like(name, BackendKind::CephRgw, builder)
            }
            StorageClientConfig::Memory => Ok(Self::in_memory(name)),
        }
    }

    /// Filesystem endpoint rooted at `base_directory`, created if missing.
    pub fn filesystem(name: &str, base_directory: &std::path::Path) -> StoreResult<Self> {
        std::fs::create_dir_all(base_directory).map_err(|e| {
            StoreError::backend(base_directory.display().to_string(), e)
        })?;
        let store = LocalFileSystem::new_with_prefix(base_directory).map_err(|e| {
            StoreError::backend(base_directory.display().to_string(), e)
        })?;
        Ok(Self {
            name: name.to_string(),
            kind: BackendKind::Filesystem,
            store: Arc::new(store),
        })
    }

    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: BackendKind::Memory,
            store: Arc::new(InMemory::new()),
        }
    }

    fn s3_like(name: &str, kind: BackendKind, builder: AmazonS3Builder) -> StoreResult<Self> {
        let store = builder
            .build()
            .map_err(|e| StoreError::backend(name, format!("failed to create S3 client: {}", e)))?;
        Ok(Self {
            name: name.to_string(),
            kind,
            store: Arc::new(store),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }
}

/// `endpoint` must be `http(s)://host[:port][/path]`.
fn check_endpoint(name: &str, endpoint: &str) -> StoreResult<()> {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .ok_or_else(|| StoreError::backend(name, format!("endpoint '{}' is not an http(s) URL", endpoint)))?;
    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = if authority.starts_with('[') {
        match authority.find(']') {
            Some(end) => authority.split_at(end + 1),
            None => (authority, ""),
        }
    } else {
        match authority.find(':') {
            Some(at) => authority.split_at(at),
            None => (authority, ""),
        }
    };
    if !port.is_empty() && port.strip_prefix(':').and_then(|p| p.parse::<u16>().ok()).is_none() {
        return Err(StoreError::backend(
            name,
            format!("endpoint '{}' has an invalid port", endpoint),
        ));
    }
    check_host(name, host)
}

/// Host names are DNS labels or bracketed IPv6 literals.
fn check_host(name: &str, host: &str) -> StoreResult<()> {
    let valid = if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        !inner.is_empty() && inner.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
    } else {
        !host.is_empty()
            && host.split('.').all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::backend(name, format!("invalid host '{}'", host)))
    }
}

fn check_bucket(name: &str, bucket: &str) -> StoreResult<()> {
    if bucket.is_empty() || bucket.contains('/') {
        return Err(StoreError::backend(name, format!("invalid bucket name '{}'", bucket)));
    }
    Ok(())
}

fn location(key: &str) -> StoreResult<Path> {
    Path::parse(key).map_err(|e| StoreError::backend(key, format!("invalid key: {}", e)))
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(endpoint = %self.name, key = %key))]
    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let result = match self.store.get(&location(key)?).await {
            Ok(r) => r,
            Err(object_store::Error::NotFound { .. }) => return Err(StoreError::not_found(key)),
            Err(e) => return Err(StoreError::backend(key, e)),
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StoreError::backend(key, format!("failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    #[instrument(skip(self, data), fields(endpoint = %self.name, key = %key))]
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location(key)?, data.into())
            .await
            .map_err(|e| StoreError::backend(key, e))?;

        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.store.head(&location(key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StoreError::backend(key, e)),
        }
    }

    #[instrument(skip(self), fields(endpoint = %self.name, key = %key))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        match self.store.delete(&location(key)?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::backend(key, e)),
        }
    }

    #[instrument(skip(self, data), fields(endpoint = %self.name, key = %key))]
    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<bool> {
        match self
            .store
            .put_opts(&location(key)?, data.into(), PutMode::Create.into())
            .await
        {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::Precondition { .. }) => {
                debug!("Key already exists");
                Ok(false)
            }
            Err(e) => Err(StoreError::backend(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix_path = location(prefix)?;
        let mut keys = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| StoreError::backend(prefix, format!("list failed: {}", e)))?
        {
            keys.push(meta.location.to_string());
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestore_common::ErrorKind;

    async fn exercise(backend: &dyn StorageBackend) {
        assert!(!backend.exists("ds/a/0_0.tile").await.unwrap());
        let err = backend.get("ds/a/0_0.tile").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        backend
            .put("ds/a/0_0.tile", Bytes::from_static(b"one"))
            .await
            .unwrap();
        backend
            .put("ds/a/0_0.tile", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(backend.get("ds/a/0_0.tile").await.unwrap().as_ref(), b"two");
        assert!(backend.exists("ds/a/0_0.tile").await.unwrap());

        assert!(backend
            .put_if_absent("ds/a/0_0.tile.lock", Bytes::from_static(b"x"))
            .await
            .unwrap());
        assert!(!backend
            .put_if_absent("ds/a/0_0.tile.lock", Bytes::from_static(b"y"))
            .await
            .unwrap());

        backend.put("ds/b/0_0.tile", Bytes::new()).await.unwrap();
        let mut keys = backend.list("ds/a").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["ds/a/0_0.tile", "ds/a/0_0.tile.lock"]);

        backend.delete("ds/a/0_0.tile").await.unwrap();
        backend.delete("ds/a/0_0.tile").await.unwrap();
        assert!(!backend.exists("ds/a/0_0.tile").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = ObjectStorage::in_memory("mem");
        assert_eq!(backend.kind(), BackendKind::Memory);
        exercise(&backend).await;
    }

    #[tokio::test]
    async fn test_filesystem_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ObjectStorage::from_config(
            "local",
            &StorageClientConfig::Fs {
                base_directory: dir.path().join("root"),
            },
        )
        .unwrap();
        assert_eq!(backend.kind(), BackendKind::Filesystem);
        exercise(&backend).await;
        assert!(dir.path().join("root/ds/b/0_0.tile").is_file());
    }

    fn s3_config(endpoint: &str) -> StorageClientConfig {
        StorageClientConfig::S3 {
            endpoint: endpoint.to_string(),
            bucket: "rasters".to_string(),
            access_key: "key".to_string(),
            secret_key: "secret".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }

    fn ceph_config(host: &str) -> StorageClientConfig {
        StorageClientConfig::CephRgw {
            host: host.to_string(),
            port: 7480,
            bucket: "rasters".to_string(),
            access_key: "key".to_string(),
            secret_key: "secret".to_string(),
        }
    }

    #[test]
    fn test_s3_backend_from_config() {
        let backend = ObjectStorage::from_config("minio", &s3_config("http://localhost:9000")).unwrap();
        assert_eq!(backend.kind(), BackendKind::S3Compatible);
        assert_eq!(backend.kind().to_string(), "s3");

        let backend = ObjectStorage::from_config("aws", &s3_config("https://s3.eu-west-1.amazonaws.com")).unwrap();
        assert_eq!(backend.kind(), BackendKind::S3Compatible);

        let backend = ObjectStorage::from_config("v6", &s3_config("http://[::1]:9000")).unwrap();
        assert_eq!(backend.kind(), BackendKind::S3Compatible);
    }

    #[test]
    fn test_ceph_backend_from_config() {
        let backend = ObjectStorage::from_config("rgw", &ceph_config("rgw.storage.internal")).unwrap();
        assert_eq!(backend.kind(), BackendKind::CephRgw);
        assert_eq!(backend.kind().to_string(), "ceph_rgw");

        let backend = ObjectStorage::from_config("rgw", &ceph_config("10.0.0.12")).unwrap();
        assert_eq!(backend.kind(), BackendKind::CephRgw);
    }

    #[test]
    fn test_malformed_endpoints_rejected() {
        for host in ["rgw storage", "rgw/", "", "http://rgw", "rgw..internal"] {
            let err = ObjectStorage::from_config("rgw", &ceph_config(host)).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::BackendIo, "host {:?}", host);
        }
        for endpoint in ["localhost:9000", "http://", "http://minio:port", "ftp://minio"] {
            let err = ObjectStorage::from_config("minio", &s3_config(endpoint)).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::BackendIo, "endpoint {:?}", endpoint);
        }

        let mut config = ceph_config("rgw");
        if let StorageClientConfig::CephRgw { bucket, .. } = &mut config {
            bucket.clear();
        }
        let err = ObjectStorage::from_config("rgw", &config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::BackendIo);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(location("a/../b").is_err());
    }
}
