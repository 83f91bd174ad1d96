//! Tests for write contention, cancellation and concurrent registration

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use twinreg_core::{
    DocumentFilter, DocumentStore, Error, ErrorKind, EventKind, FnListener, OperationContext,
    QueryPage, RegistryConfig, RegistryEvent, Result, RetryPolicy, StoredDocument, Unregister,
};
use twinreg_registry::{
    ApplicationRegistration, ApplicationRegistry, ApplicationType, EntityRepository,
    RegistryService, Visibility,
};
use twinreg_storage::MemoryDocumentStore;

/// Store whose conditional writes commit, then reply after a delay.
struct SlowReplies {
    inner: MemoryDocumentStore,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowReplies {
    async fn add(&self, collection: &str, id: &str, value: Value) -> Result<StoredDocument> {
        self.inner.add(collection, id, value).await
    }

    async fn find(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.inner.find(collection, id).await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        generation: &str,
        value: Value,
    ) -> Result<StoredDocument> {
        let doc = self.inner.replace(collection, id, generation, value).await?;
        tokio::time::sleep(self.delay).await;
        Ok(doc)
    }

    async fn delete(&self, collection: &str, id: &str, generation: &str) -> Result<()> {
        self.inner.delete(collection, id, generation).await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<QueryPage<StoredDocument>> {
        self.inner
            .query(collection, filter, continuation, page_size)
            .await
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Store where every conditional write loses the generation race.
#[derive(Default)]
struct AlwaysContended {
    inner: MemoryDocumentStore,
    writes: AtomicU32,
}

impl AlwaysContended {
    fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for AlwaysContended {
    async fn add(&self, collection: &str, id: &str, value: Value) -> Result<StoredDocument> {
        self.inner.add(collection, id, value).await
    }

    async fn find(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.inner.find(collection, id).await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        _generation: &str,
        _value: Value,
    ) -> Result<StoredDocument> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::out_of_date(format!("{}/{}", collection, id)))
    }

    async fn delete(&self, collection: &str, id: &str, _generation: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(Error::out_of_date(format!("{}/{}", collection, id)))
    }

    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<QueryPage<StoredDocument>> {
        self.inner
            .query(collection, filter, continuation, page_size)
            .await
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

fn server(uri: &str) -> ApplicationRegistration {
    ApplicationRegistration::new(uri, ApplicationType::Server)
}

fn record(service: &ApplicationRegistry) -> (Arc<Mutex<Vec<EventKind>>>, Unregister) {
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = kinds.clone();
    let handle = service.subscribe(Arc::new(FnListener::new(
        move |event: &RegistryEvent<ApplicationRegistration>| -> Result<()> {
            sink.lock().unwrap().push(event.kind);
            Ok(())
        },
    )));
    (kinds, handle)
}

fn cancel_after(delay: Duration) -> OperationContext {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        canceller.cancel();
    });
    OperationContext::new().with_cancellation(token)
}

#[tokio::test]
async fn test_cancel_after_commit_still_notifies() {
    let store = Arc::new(SlowReplies {
        inner: MemoryDocumentStore::new(),
        delay: Duration::from_millis(100),
    });
    let service: ApplicationRegistry = RegistryService::new(store, RegistryConfig::default());
    let (kinds, _handle) = record(&service);

    let app = service
        .register_or_upsert(server("opc.tcp://a"), &OperationContext::new())
        .await
        .unwrap();

    let ctx = cancel_after(Duration::from_millis(20));
    let summary = service.mark_lost(&[app.id.clone()], &ctx).await;
    assert!(ctx.is_cancelled());
    assert!(summary.is_clean(), "failures: {:?}", summary.failures);
    assert_eq!(summary.lost, vec![app.id.clone()]);

    let stored = service.get(&app.id, &OperationContext::new()).await.unwrap();
    assert_eq!(stored.state.visibility, Visibility::Lost);

    let ctx = cancel_after(Duration::from_millis(20));
    service
        .unregister(&app.id, stored.generation_id.as_deref().unwrap(), &ctx)
        .await
        .unwrap();
    assert!(service
        .find(&app.id, &OperationContext::new())
        .await
        .unwrap()
        .is_none());

    assert_eq!(
        *kinds.lock().unwrap(),
        vec![EventKind::New, EventKind::Lost, EventKind::Deleted]
    );
}

#[tokio::test]
async fn test_cancelled_before_write_changes_nothing() {
    let service: ApplicationRegistry = RegistryService::new(
        Arc::new(MemoryDocumentStore::new()),
        RegistryConfig::default(),
    );
    let app = service
        .register_or_upsert(server("opc.tcp://a"), &OperationContext::new())
        .await
        .unwrap();

    let ctx = OperationContext::new();
    ctx.cancellation().cancel();
    let summary = service.mark_lost(&[app.id.clone()], &ctx).await;
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].1.kind(), ErrorKind::Cancelled);

    let stored = service.get(&app.id, &OperationContext::new()).await.unwrap();
    assert_eq!(stored.state.visibility, Visibility::Found);
    assert_eq!(stored.generation_id, app.generation_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_registration() {
    let service: ApplicationRegistry = RegistryService::new(
        Arc::new(MemoryDocumentStore::new()),
        RegistryConfig::default(),
    );
    let (kinds, _handle) = record(&service);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .register_or_upsert(server("opc.tcp://shared"), &OperationContext::new())
                .await
        }));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let stored = service
        .query_all(&DocumentFilter::new(), &OperationContext::new())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(*kinds.lock().unwrap(), vec![EventKind::New]);
}

#[tokio::test]
async fn test_retry_exhaustion_surfaces_out_of_date() {
    let store = Arc::new(AlwaysContended::default());
    let config = RegistryConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        },
        ..RegistryConfig::default()
    };
    let repository: EntityRepository<ApplicationRegistration> =
        EntityRepository::new(store.clone(), &config);
    let ctx = OperationContext::new();
    let app = repository.add(server("opc.tcp://a"), &ctx).await.unwrap();

    let err = repository
        .update(&app.id, &ctx, |app| {
            app.application_name = Some("X".to_string());
            Ok(true)
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfDate);
    assert_eq!(store.writes(), 3);

    let err = repository
        .delete(&app.id, &ctx, |_| Ok(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfDate);
    assert_eq!(store.writes(), 6);

    let stored = repository.get(&app.id, &ctx).await.unwrap();
    assert_eq!(stored.application_name, None);
}
