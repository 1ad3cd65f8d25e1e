//! Key/blob storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;

use tilestore_common::StoreResult;

/// Uniform key/blob interface over every storage endpoint.
///
/// Keys are `/`-separated relative paths. Implementations know nothing about
/// tiles or rasters and never retry internally.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Endpoint name from configuration.
    fn name(&self) -> &str;

    /// Read a whole blob. Fails with `NotFound` when the key is absent.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Atomically replace the blob at `key`.
    ///
    /// Readers observe either the previous content or `data`, never a mix.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Create `key` only if it does not exist.
    ///
    /// Returns `false` when another writer already created it.
    async fn put_if_absent(&self, key: &str, data: Bytes) -> StoreResult<bool>;

    /// Keys under `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
