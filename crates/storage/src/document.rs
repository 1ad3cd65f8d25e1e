//! Document store collaborator used by the metadata catalog.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use tilestore_common::StoreResult;

use crate::filter::Filter;

/// Collections of JSON documents keyed by id.
///
/// Every write replaces a whole document atomically; implementations need
/// no cross-document transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document `id`.
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()>;

    /// Insert `id` only if absent. Returns `false` when it already exists.
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool>;

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Remove `id`. Returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Documents matching `filter`, ordered by id.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>>;
}

/// Process-local document store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn insert(&self, collection: &str, id: &str, doc: Value) -> StoreResult<bool> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(id.to_string(), doc);
        Ok(true)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .values()
            .filter(|doc| filter.matches(doc))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_is_create_only() {
        let store = MemoryDocumentStore::new();
        assert!(store.insert("c", "/a", json!({"v": 1})).await.unwrap());
        assert!(!store.insert("c", "/a", json!({"v": 2})).await.unwrap());
        assert_eq!(store.get("c", "/a").await.unwrap(), Some(json!({"v": 1})));

        store.upsert("c", "/a", json!({"v": 3})).await.unwrap();
        assert_eq!(store.get("c", "/a").await.unwrap(), Some(json!({"v": 3})));
    }

    #[tokio::test]
    async fn test_find_orders_by_id_and_limits() {
        let store = MemoryDocumentStore::new();
        for id in ["/c", "/a", "/b"] {
            store
                .upsert("c", id, json!({"id": id, "year": 2024}))
                .await
                .unwrap();
        }
        store
            .upsert("other", "/z", json!({"year": 2024}))
            .await
            .unwrap();

        let found = store
            .find("c", &Filter::eq("year", 2024), Some(2))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["/a", "/b"]);

        assert!(store.delete("c", "/a").await.unwrap());
        assert!(!store.delete("c", "/a").await.unwrap());
        assert!(store.find("missing", &Filter::All, None).await.unwrap().is_empty());
    }
}
