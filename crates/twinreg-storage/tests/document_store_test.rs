//! Contract tests shared by every document store backend.
//!
//! Tests include:
//! - Conditional add/replace/delete
//! - Filtered, paged queries
//! - Concurrent replace with a single winner
//! - Persistence across reopen (redb)

use std::sync::Arc;

use serde_json::json;
use twinreg_core::{DocumentFilter, DocumentStore, ErrorKind, SharedDocumentStore};
use twinreg_storage::MemoryDocumentStore;

async fn exercise_contract(store: SharedDocumentStore) {
    let created = store
        .add("endpoints", "ep-1", json!({"name": "Pump", "site": "north"}))
        .await
        .expect("add");
    assert_eq!(created.id, "ep-1");

    let err = store
        .add("endpoints", "ep-1", json!({"name": "Other"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let found = store.find("endpoints", "ep-1").await.unwrap().unwrap();
    assert_eq!(found, created);

    let replaced = store
        .replace(
            "endpoints",
            "ep-1",
            &created.generation,
            json!({"name": "Pump", "site": "south"}),
        )
        .await
        .unwrap();
    assert_ne!(replaced.generation, created.generation);

    let err = store
        .delete("endpoints", "ep-1", &created.generation)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfDate);

    let err = store
        .replace("endpoints", "ep-404", "any", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    store
        .delete("endpoints", "ep-1", &replaced.generation)
        .await
        .unwrap();
    assert!(store.find("endpoints", "ep-1").await.unwrap().is_none());
}

async fn exercise_query(store: SharedDocumentStore) {
    for i in 0..10 {
        let site = if i % 2 == 0 { "North" } else { "south" };
        store
            .add(
                "endpoints",
                &format!("ep-{i:02}"),
                json!({ "state": { "site": site, "seen": i * 10 } }),
            )
            .await
            .unwrap();
    }

    let filter = DocumentFilter::new()
        .eq_ignore_case("state.site", "north")
        .lt("state.seen", 70);

    let first = store.query("endpoints", &filter, None, 2).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.continuation.is_some());

    let second = store
        .query("endpoints", &filter, first.continuation.as_deref(), 2)
        .await
        .unwrap();
    let ids: Vec<_> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|d| d.id.clone())
        .collect();
    assert_eq!(ids, vec!["ep-00", "ep-02", "ep-04", "ep-06"]);
    assert!(second.continuation.is_none());

    let empty = store
        .query("applications", &DocumentFilter::new(), None, 10)
        .await
        .unwrap();
    assert!(empty.items.is_empty());
    assert!(empty.continuation.is_none());
}

async fn exercise_single_winner(store: SharedDocumentStore) {
    let doc = store.add("apps", "a", json!({"n": 0})).await.unwrap();

    let mut handles = Vec::new();
    for n in 1..=8 {
        let store = store.clone();
        let generation = doc.generation.clone();
        handles.push(tokio::spawn(async move {
            store.replace("apps", "a", &generation, json!({ "n": n })).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::OutOfDate),
        }
    }
    assert_eq!(winners, 1);
}

// ============================================================================
// Memory
// ============================================================================

#[tokio::test]
async fn test_memory_contract() {
    exercise_contract(Arc::new(MemoryDocumentStore::new())).await;
}

#[tokio::test]
async fn test_memory_query() {
    exercise_query(Arc::new(MemoryDocumentStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_single_winner() {
    exercise_single_winner(Arc::new(MemoryDocumentStore::new())).await;
}

// ============================================================================
// Redb
// ============================================================================

#[cfg(feature = "redb")]
mod redb_backend {
    use super::*;
    use twinreg_storage::{close_db, RedbDocumentStore};

    fn open(dir: &tempfile::TempDir) -> SharedDocumentStore {
        Arc::new(RedbDocumentStore::open(dir.path().join("registry.redb")).unwrap())
    }

    #[tokio::test]
    async fn test_redb_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_contract(open(&dir)).await;
    }

    #[tokio::test]
    async fn test_redb_query() {
        let dir = tempfile::tempdir().unwrap();
        exercise_query(open(&dir)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redb_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        exercise_single_winner(open(&dir)).await;
    }

    #[tokio::test]
    async fn test_redb_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.redb");

        let generation = {
            let store = RedbDocumentStore::open(&path).unwrap();
            let doc = store
                .add("applications", "app-1", json!({"name": "demo"}))
                .await
                .unwrap();
            doc.generation
        };
        close_db(&path);

        let store = RedbDocumentStore::open(&path).unwrap();
        let doc = store.find("applications", "app-1").await.unwrap().unwrap();
        assert_eq!(doc.generation, generation);
        assert_eq!(doc.value, json!({"name": "demo"}));
        assert!(store.is_persistent());
    }
}
