//! Per-tile write locks.
//!
//! A lock is a small blob at `{tile_key}.lock` created with a conditional
//! put, so it works on every backend that supports create-if-absent. There
//! is no expiry: a lock left behind by a crashed writer must be removed with
//! [`TileLock::force_release`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use tilestore_common::{StoreError, StoreResult};

use crate::backend::StorageBackend;

/// Content of a lock blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// An acquired tile lock. Dropping it without [`TileLock::release`] leaves the
/// lock in place.
#[must_use = "a tile lock must be released"]
pub struct TileLock {
    backend: Arc<dyn StorageBackend>,
    lock_key: String,
    record: LockRecord,
}

impl TileLock {
    /// Key of the lock guarding `tile_key`.
    pub fn lock_key(tile_key: &str) -> String {
        format!("{}.lock", tile_key)
    }

    /// Try once to take the lock for `tile_key`.
    ///
    /// Fails fast with `LockContended` when another writer holds it.
    pub async fn acquire(backend: Arc<dyn StorageBackend>, tile_key: &str) -> StoreResult<Self> {
        let lock_key = Self::lock_key(tile_key);
        let record = LockRecord {
            owner: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&record).map_err(|e| StoreError::codec(&lock_key, e))?;

        if !backend.put_if_absent(&lock_key, Bytes::from(body)).await? {
            debug!(lock = %lock_key, "Tile lock contended");
            return Err(StoreError::LockContended { key: lock_key });
        }

        debug!(lock = %lock_key, owner = %record.owner, "Tile lock acquired");
        Ok(Self {
            backend,
            lock_key,
            record,
        })
    }

    pub fn key(&self) -> &str {
        &self.lock_key
    }

    pub fn owner(&self) -> Uuid {
        self.record.owner
    }

    pub async fn release(self) -> StoreResult<()> {
        self.backend.delete(&self.lock_key).await?;
        debug!(lock = %self.lock_key, owner = %self.record.owner, "Tile lock released");
        Ok(())
    }

    /// Current holder of the lock on `tile_key`, if any.
    pub async fn inspect(
        backend: &dyn StorageBackend,
        tile_key: &str,
    ) -> StoreResult<Option<LockRecord>> {
        let lock_key = Self::lock_key(tile_key);
        match backend.get(&lock_key).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::codec(lock_key, e)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the lock on `tile_key` regardless of owner.
    pub async fn force_release(backend: &dyn StorageBackend, tile_key: &str) -> StoreResult<()> {
        let lock_key = Self::lock_key(tile_key);
        warn!(lock = %lock_key, "Forcibly releasing tile lock");
        backend.delete(&lock_key).await
    }
}

/// Run `f` while holding the lock on `tile_key`.
///
/// The lock is released whether `f` succeeds or fails; the error from `f`
/// wins over a release error.
pub async fn with_tile_lock<T, F, Fut>(
    backend: Arc<dyn StorageBackend>,
    tile_key: &str,
    f: F,
) -> StoreResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let lock = TileLock::acquire(backend, tile_key).await?;
    let lock_key = lock.key().to_string();
    let result = f().await;

    match (result, lock.release().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), release) => {
            if let Err(release_err) = release {
                warn!(lock = %lock_key, error = %release_err, "Failed to release tile lock");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStorage;
    use tilestore_common::ErrorKind;

    fn backend() -> Arc<dyn StorageBackend> {
        Arc::new(ObjectStorage::in_memory("mem"))
    }

    #[tokio::test]
    async fn test_second_acquire_contends() {
        let backend = backend();
        let lock = TileLock::acquire(backend.clone(), "ds/b/0_0.tile").await.unwrap();
        assert_eq!(lock.key(), "ds/b/0_0.tile.lock");

        let err = TileLock::acquire(backend.clone(), "ds/b/0_0.tile")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::LockContended);
        assert!(err.is_retryable());

        let holder = TileLock::inspect(backend.as_ref(), "ds/b/0_0.tile")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.owner, lock.owner());

        lock.release().await.unwrap();
        let again = TileLock::acquire(backend.clone(), "ds/b/0_0.tile").await.unwrap();
        again.release().await.unwrap();
        assert!(TileLock::inspect(backend.as_ref(), "ds/b/0_0.tile")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_with_tile_lock_releases_on_error() {
        let backend = backend();
        let result: StoreResult<()> = with_tile_lock(backend.clone(), "ds/b/1_0.tile", || async {
            Err(StoreError::InvalidBuffer("boom".into()))
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidBuffer);
        assert!(!backend.exists("ds/b/1_0.tile.lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_force_release_clears_stale_lock() {
        let backend = backend();
        let stale = TileLock::acquire(backend.clone(), "ds/b/2_0.tile").await.unwrap();
        drop(stale);
        TileLock::force_release(backend.as_ref(), "ds/b/2_0.tile")
            .await
            .unwrap();
        let lock = TileLock::acquire(backend, "ds/b/2_0.tile").await.unwrap();
        lock.release().await.unwrap();
    }
}
