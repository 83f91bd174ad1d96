//! Redb document store.
//!
//! All collections share one table keyed by `(collection, id)`. Each row holds
//! a JSON record with the generation and the document body. Conditional
//! writes read and compare the generation inside the same write transaction.

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use twinreg_core::storage::{check_page_size, new_generation};
use twinreg_core::{DocumentFilter, DocumentStore, QueryPage, StorageConfig, StoredDocument};

use crate::error::{Error, Result};
use crate::singleton::get_or_open_db;

const DOCUMENTS: TableDefinition<(&str, &str), &str> = TableDefinition::new("documents");

#[derive(Serialize, Deserialize)]
struct Record {
    generation: String,
    value: Value,
}

impl Record {
    fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn into_document(self, id: &str) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            generation: self.generation,
            value: self.value,
        }
    }
}

fn key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

/// redb-based persistent document store.
pub struct RedbDocumentStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbDocumentStore {
    /// Open or create a store at the given path, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, true)
    }

    /// Open a store described by a storage configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open_with(&config.path, config.create_dirs)
    }

    fn open_with<P: AsRef<Path>>(path: P, create_dirs: bool) -> Result<Self> {
        let path = path.as_ref();
        if create_dirs {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = get_or_open_db(path)?;
        // Make sure the table exists so read transactions can open it.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Get the storage path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, f: F) -> twinreg_core::Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(Error::from)?;
        Ok(result?)
    }
}

fn add_sync(db: &Database, collection: &str, id: &str, value: Value) -> Result<StoredDocument> {
    let record = Record {
        generation: new_generation(),
        value,
    };
    let raw = serde_json::to_string(&record)?;

    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(DOCUMENTS)?;
        if table.get((collection, id))?.is_some() {
            return Err(Error::AlreadyExists(key(collection, id)));
        }
        table.insert((collection, id), raw.as_str())?;
    }
    txn.commit()?;
    Ok(record.into_document(id))
}

fn find_sync(db: &Database, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(DOCUMENTS)?;
    match table.get((collection, id))? {
        Some(raw) => Ok(Some(Record::decode(raw.value())?.into_document(id))),
        None => Ok(None),
    }
}

fn check_current(
    table: &impl ReadableTable<(&'static str, &'static str), &'static str>,
    collection: &str,
    id: &str,
    generation: &str,
) -> Result<()> {
    let current = match table.get((collection, id))? {
        Some(raw) => Record::decode(raw.value())?,
        None => return Err(Error::NotFound(key(collection, id))),
    };
    if current.generation != generation {
        return Err(Error::GenerationMismatch {
            id: key(collection, id),
            expected: generation.to_string(),
            found: current.generation,
        });
    }
    Ok(())
}

fn replace_sync(
    db: &Database,
    collection: &str,
    id: &str,
    generation: &str,
    value: Value,
) -> Result<StoredDocument> {
    let record = Record {
        generation: new_generation(),
        value,
    };
    let raw = serde_json::to_string(&record)?;

    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(DOCUMENTS)?;
        check_current(&table, collection, id, generation)?;
        table.insert((collection, id), raw.as_str())?;
    }
    txn.commit()?;
    Ok(record.into_document(id))
}

fn delete_sync(db: &Database, collection: &str, id: &str, generation: &str) -> Result<()> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(DOCUMENTS)?;
        check_current(&table, collection, id, generation)?;
        table.remove((collection, id))?;
    }
    txn.commit()?;
    Ok(())
}

fn query_sync(
    db: &Database,
    collection: &str,
    filter: &DocumentFilter,
    continuation: Option<&str>,
    page_size: usize,
) -> Result<QueryPage<StoredDocument>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(DOCUMENTS)?;

    let start = match continuation {
        Some(after) => Bound::Excluded((collection, after)),
        None => Bound::Included((collection, "")),
    };
    let range: (Bound<(&str, &str)>, Bound<(&str, &str)>) = (start, Bound::Unbounded);

    let mut items = Vec::new();
    let mut has_more = false;
    for entry in table.range(range)? {
        let (row_key, raw) = entry?;
        let (row_collection, id) = row_key.value();
        if row_collection != collection {
            break;
        }
        let record = Record::decode(raw.value())?;
        if !filter.matches(&record.value) {
            continue;
        }
        if items.len() == page_size {
            has_more = true;
            break;
        }
        items.push(record.into_document(id));
    }

    let continuation = if has_more {
        items.last().map(|doc: &StoredDocument| doc.id.clone())
    } else {
        None
    };
    Ok(QueryPage {
        items,
        continuation,
    })
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn add(
        &self,
        collection: &str,
        id: &str,
        value: Value,
    ) -> twinreg_core::Result<StoredDocument> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |db| add_sync(db, &collection, &id, value))
            .await
    }

    async fn find(
        &self,
        collection: &str,
        id: &str,
    ) -> twinreg_core::Result<Option<StoredDocument>> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.blocking(move |db| find_sync(db, &collection, &id)).await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        generation: &str,
        value: Value,
    ) -> twinreg_core::Result<StoredDocument> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let generation = generation.to_string();
        self.blocking(move |db| replace_sync(db, &collection, &id, &generation, value))
            .await
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        generation: &str,
    ) -> twinreg_core::Result<()> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let generation = generation.to_string();
        self.blocking(move |db| delete_sync(db, &collection, &id, &generation))
            .await
    }

    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
    ) -> twinreg_core::Result<QueryPage<StoredDocument>> {
        check_page_size(page_size)?;
        let collection = collection.to_string();
        let filter = filter.clone();
        let continuation = continuation.map(str::to_string);
        self.blocking(move |db| {
            query_sync(db, &collection, &filter, continuation.as_deref(), page_size)
        })
        .await
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twinreg_core::ErrorKind;

    fn temp_store() -> (tempfile::TempDir, RedbDocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbDocumentStore::open(dir.path().join("docs.redb")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let (_dir, store) = temp_store();
        let doc = store.add("apps", "a", json!({"n": 1})).await.unwrap();

        let err = store.add("apps", "a", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let updated = store
            .replace("apps", "a", &doc.generation, json!({"n": 2}))
            .await
            .unwrap();
        let err = store
            .replace("apps", "a", &doc.generation, json!({"n": 3}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfDate);

        let err = store.delete("apps", "missing", "g").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        store.delete("apps", "a", &updated.generation).await.unwrap();
        assert!(store.find("apps", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let (_dir, store) = temp_store();
        store.add("apps", "x", json!({"kind": "app"})).await.unwrap();
        store.add("apps2", "a", json!({"kind": "other"})).await.unwrap();
        store.add("ap", "z", json!({"kind": "other"})).await.unwrap();

        let page = store
            .query("apps", &DocumentFilter::new(), None, 10)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "x");
        assert!(page.continuation.is_none());
    }

    #[tokio::test]
    async fn test_query_continuation() {
        let (_dir, store) = temp_store();
        for i in 0..5 {
            store
                .add("apps", &format!("id-{i}"), json!({ "i": i }))
                .await
                .unwrap();
        }
        let filter = DocumentFilter::new().gt("i", 0);

        let mut seen = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = store
                .query("apps", &filter, continuation.as_deref(), 3)
                .await
                .unwrap();
            seen.extend(page.items.into_iter().map(|d| d.id));
            continuation = page.continuation;
            if continuation.is_none() {
                break;
            }
        }
        assert_eq!(seen, vec!["id-1", "id-2", "id-3", "id-4"]);
    }
}
