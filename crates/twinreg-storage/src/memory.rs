//! In-memory document store.
//!
//! Documents are kept per collection in id order so pagination is stable.
//! Conditional writes check the generation under the collection write lock.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use twinreg_core::storage::{check_page_size, new_generation};
use twinreg_core::{DocumentFilter, DocumentStore, QueryPage, StoredDocument};

use crate::error::Error;

type Collection = BTreeMap<String, StoredDocument>;

/// Volatile [`DocumentStore`] for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Remove every document.
    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

fn key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

fn check_generation(
    collection: &str,
    current: &StoredDocument,
    generation: &str,
) -> Result<(), Error> {
    if current.generation != generation {
        return Err(Error::GenerationMismatch {
            id: key(collection, &current.id),
            expected: generation.to_string(),
            found: current.generation.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn add(
        &self,
        collection: &str,
        id: &str,
        value: Value,
    ) -> twinreg_core::Result<StoredDocument> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(Error::AlreadyExists(key(collection, id)).into());
        }
        let doc = StoredDocument {
            id: id.to_string(),
            generation: new_generation(),
            value,
        };
        docs.insert(id.to_string(), doc.clone());
        Ok(doc)
    }

    async fn find(
        &self,
        collection: &str,
        id: &str,
    ) -> twinreg_core::Result<Option<StoredDocument>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        generation: &str,
        value: Value,
    ) -> twinreg_core::Result<StoredDocument> {
        let mut collections = self.collections.write();
        let current = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| Error::NotFound(key(collection, id)))?;
        check_generation(collection, current, generation)?;

        current.generation = new_generation();
        current.value = value;
        Ok(current.clone())
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        generation: &str,
    ) -> twinreg_core::Result<()> {
        let mut collections = self.collections.write();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(key(collection, id)))?;
        let current = docs
            .get(id)
            .ok_or_else(|| Error::NotFound(key(collection, id)))?;
        check_generation(collection, current, generation)?;

        docs.remove(id);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
    ) -> twinreg_core::Result<QueryPage<StoredDocument>> {
        check_page_size(page_size)?;

        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(QueryPage::default());
        };

        let start = match continuation {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        let mut matching = docs
            .range((start, Bound::Unbounded))
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(&doc.value));

        let items: Vec<StoredDocument> = matching.by_ref().take(page_size).cloned().collect();
        let continuation = if items.len() == page_size && matching.next().is_some() {
            items.last().map(|doc| doc.id.clone())
        } else {
            None
        };
        Ok(QueryPage {
            items,
            continuation,
        })
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twinreg_core::ErrorKind;

    #[tokio::test]
    async fn test_add_conflict() {
        let store = MemoryDocumentStore::new();
        store.add("apps", "a", json!({"n": 1})).await.unwrap();
        let err = store.add("apps", "a", json!({"n": 2})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.len("apps"), 1);
    }

    #[tokio::test]
    async fn test_replace_requires_current_generation() {
        let store = MemoryDocumentStore::new();
        let first = store.add("apps", "a", json!({"n": 1})).await.unwrap();
        let second = store
            .replace("apps", "a", &first.generation, json!({"n": 2}))
            .await
            .unwrap();
        assert_ne!(first.generation, second.generation);

        let err = store
            .replace("apps", "a", &first.generation, json!({"n": 3}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfDate);

        let stored = store.find("apps", "a").await.unwrap().unwrap();
        assert_eq!(stored.value, json!({"n": 2}));
        assert_eq!(stored.generation, second.generation);
    }

    #[tokio::test]
    async fn test_delete_paths() {
        let store = MemoryDocumentStore::new();
        let doc = store.add("apps", "a", json!({})).await.unwrap();

        let err = store.delete("apps", "a", "stale").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfDate);

        store.delete("apps", "a", &doc.generation).await.unwrap();
        assert!(store.find("apps", "a").await.unwrap().is_none());

        let err = store.delete("apps", "a", &doc.generation).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_query_pages_in_id_order() {
        let store = MemoryDocumentStore::new();
        for i in (0..7).rev() {
            store
                .add("apps", &format!("id-{i}"), json!({ "even": i % 2 == 0 }))
                .await
                .unwrap();
        }
        let filter = DocumentFilter::new().eq("even", true);

        let page = store.query("apps", &filter, None, 2).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["id-0", "id-2"]);

        let page = store
            .query("apps", &filter, page.continuation.as_deref(), 2)
            .await
            .unwrap();
        let ids: Vec<_> = page.items.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["id-4", "id-6"]);
        assert!(page.continuation.is_none());
    }

    #[tokio::test]
    async fn test_query_rejects_empty_page() {
        let store = MemoryDocumentStore::new();
        let err = store
            .query("apps", &DocumentFilter::new(), None, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
