//! Registry Service - lifecycle operations over one registration type.
//!
//! This service provides a high-level API for:
//! - Discovery-driven registration (register or upsert)
//! - Explicit create, patch and unregister
//! - Found/lost transitions from discovery scans and purging of stale entities
//! - Subscribing to lifecycle events
//!
//! Every operation commits through the store before the broker is notified.
//! Listener failures are logged and never undo a committed write.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use twinreg_core::{
    DocumentFilter, Error, ErrorKind, EventKind, EventSink, OperationContext, QueryPage,
    RegistryConfig, RegistryEvent, RegistryEventBroker, RegistryListener, Result,
    SharedDocumentStore, StorageConfig, Unregister,
};

use crate::events::SinkForwarder;
use crate::model::{
    EndpointRegistration, PropertyMap, Registration, RegistrationState, SupervisorRegistration,
    Visibility,
};
use crate::reconcile;
use crate::repository::EntityRepository;

/// Failures collected by a batch operation, keyed by entity id.
pub type Failures = Vec<(String, Error)>;

fn aggregate(failures: Failures) -> Result<()> {
    Error::aggregate(failures.into_iter().map(|(_, e)| e).collect())
}

/// Outcome of [`RegistryService::purge_stale`].
#[derive(Debug, Default)]
pub struct PurgeSummary {
    pub deleted: Vec<String>,
    /// Candidates that were revived or removed concurrently.
    pub skipped: Vec<String>,
    pub failures: Failures,
    /// Listener errors for deletions that did commit.
    pub listener_failures: Failures,
}

impl PurgeSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of the deleted entities, or the collected failures.
    ///
    /// Listener failures are reported separately in `listener_failures`.
    pub fn into_result(self) -> Result<Vec<String>> {
        aggregate(self.failures)?;
        Ok(self.deleted)
    }
}

/// Outcome of a discovery scan or of explicit found/lost transitions.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub new: Vec<String>,
    pub updated: Vec<String>,
    pub found: Vec<String>,
    pub lost: Vec<String>,
    pub unchanged: usize,
    pub failures: Failures,
    /// Listener errors for transitions that did commit.
    pub listener_failures: Failures,
}

impl ScanSummary {
    fn record(&mut self, kind: EventKind, id: String) {
        match kind {
            EventKind::New => self.new.push(id),
            EventKind::Updated => self.updated.push(id),
            EventKind::Found => self.found.push(id),
            EventKind::Lost => self.lost.push(id),
            EventKind::Deleted => {}
        }
    }

    fn fail(&mut self, id: String, error: Error) {
        self.failures.push((id, error));
    }

    fn notified(&mut self, id: &str, outcome: Result<()>) {
        if let Err(e) = outcome {
            self.listener_failures.push((id.to_string(), e));
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The summary, or the collected failures.
    ///
    /// Listener failures are reported separately in `listener_failures`.
    pub fn into_result(mut self) -> Result<Self> {
        aggregate(std::mem::take(&mut self.failures))?;
        Ok(self)
    }
}

/// Registry service for one registration type.
pub struct RegistryService<T> {
    repository: EntityRepository<T>,
    broker: RegistryEventBroker<T>,
    config: RegistryConfig,
}

impl<T: Registration> Clone for RegistryService<T> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            broker: self.broker.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: Registration> RegistryService<T> {
    /// Create a service with its own broker.
    pub fn new(store: SharedDocumentStore, config: RegistryConfig) -> Self {
        Self::with_broker(store, config, RegistryEventBroker::new())
    }

    /// Create a service that publishes to an existing broker.
    pub fn with_broker(
        store: SharedDocumentStore,
        config: RegistryConfig,
        broker: RegistryEventBroker<T>,
    ) -> Self {
        Self {
            repository: EntityRepository::new(store, &config),
            broker,
            config,
        }
    }

    /// Create a service over the store described by `storage`.
    pub fn open(storage: &StorageConfig, config: RegistryConfig) -> Result<Self> {
        let store = twinreg_storage::create_store(storage)?;
        Ok(Self::new(store, config))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn broker(&self) -> &RegistryEventBroker<T> {
        &self.broker
    }

    pub fn repository(&self) -> &EntityRepository<T> {
        &self.repository
    }

    /// Register a lifecycle listener.
    pub fn subscribe(&self, listener: Arc<dyn RegistryListener<T>>) -> Unregister {
        self.broker.register(listener)
    }

    /// Forward every lifecycle event to a messaging sink.
    pub fn forward_to(&self, sink: Arc<dyn EventSink>) -> Unregister {
        self.subscribe(Arc::new(SinkForwarder::<T>::new(sink)))
    }

    /// Publish a committed transition. Listener errors are logged and
    /// returned; the write stands either way.
    async fn notify(&self, kind: EventKind, entity: &T, context: &OperationContext) -> Result<()> {
        tracing::info!(
            collection = T::COLLECTION,
            id = entity.id(),
            event = kind.as_str(),
            "Registration {}",
            kind.as_str()
        );
        let event = RegistryEvent::new(kind, entity.clone(), context.clone());
        self.broker.publish(event).await.inspect_err(|e| {
            tracing::warn!(
                collection = T::COLLECTION,
                id = entity.id(),
                event = kind.as_str(),
                "Listener notification failed: {}",
                e
            );
        })
    }

    fn initial_state(context: &OperationContext) -> RegistrationState {
        RegistrationState {
            visibility: Visibility::Found,
            not_seen_since: None,
            created: Some(context.clone()),
            updated: Some(context.clone()),
        }
    }

    /// Add or merge a discovered entity without notifying.
    async fn upsert(
        &self,
        mut request: T,
        context: &OperationContext,
    ) -> Result<(T, Option<EventKind>)> {
        request.validate()?;
        let id = request.derive_id();
        request.set_id(id.clone());
        request.set_generation_id(None);

        if self.repository.find(&id, context).await?.is_none() {
            let mut entity = request.clone();
            *entity.state_mut() = Self::initial_state(context);
            match self.repository.add(entity, context).await {
                Ok(added) => return Ok((added, Some(EventKind::New))),
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    tracing::debug!(
                        collection = T::COLLECTION,
                        id = %id,
                        "Registered concurrently, merging"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut outcome = None;
        let entity = self
            .repository
            .update(&id, context, |current| {
                outcome = None;
                if !current.is_logically_same(&request) {
                    return Err(Error::conflict(format!(
                        "{}/{} belongs to a different entity",
                        T::COLLECTION,
                        current.id()
                    )));
                }
                let (mut next, changed) = reconcile::patch(current, &request);
                let revived = next.state_mut().mark_found();
                if !changed && !revived {
                    return Ok(false);
                }
                next.state_mut().touch(context);
                outcome = Some(if revived {
                    EventKind::Found
                } else {
                    EventKind::Updated
                });
                *current = next;
                Ok(true)
            })
            .await?;
        Ok((entity, outcome))
    }

    /// Register a discovered entity, or merge it into the stored one.
    ///
    /// A new entity emits `New`; a lost entity seen again emits `Found`; a
    /// structural change emits `Updated`. Registering an identical entity
    /// again writes nothing and emits nothing.
    pub async fn register_or_upsert(&self, request: T, context: &OperationContext) -> Result<T> {
        let (entity, outcome) = self.upsert(request, context).await?;
        if let Some(kind) = outcome {
            let _ = self.notify(kind, &entity, context).await;
        }
        Ok(entity)
    }

    /// Create an entity; fails with `Conflict` if it already exists.
    pub async fn create(&self, mut request: T, context: &OperationContext) -> Result<T> {
        request.validate()?;
        let id = request.derive_id();
        request.set_id(id);
        request.set_generation_id(None);
        *request.state_mut() = Self::initial_state(context);

        let created = self.repository.add(request, context).await?;
        let _ = self.notify(EventKind::New, &created, context).await;
        Ok(created)
    }

    /// Mutate an entity; emits `Updated` when `mutate` reports a change.
    pub async fn update_with<F>(&self, id: &str, context: &OperationContext, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut T) -> Result<bool> + Send,
    {
        let mut changed = false;
        let entity = self
            .repository
            .update(id, context, |entity| {
                changed = mutate(entity)?;
                if changed {
                    entity.state_mut().touch(context);
                }
                Ok(changed)
            })
            .await?;
        if changed {
            let _ = self.notify(EventKind::Updated, &entity, context).await;
        }
        Ok(entity)
    }

    /// Patch an entity with the fields specified in `incoming`.
    pub async fn patch(&self, id: &str, incoming: &T, context: &OperationContext) -> Result<T> {
        self.update_with(id, context, |entity| {
            if !entity.is_logically_same(incoming) {
                return Err(Error::invalid_argument(format!(
                    "patch does not describe {}/{}",
                    T::COLLECTION,
                    entity.id()
                )));
            }
            let (next, changed) = reconcile::patch(entity, incoming);
            if changed {
                *entity = next;
            }
            Ok(changed)
        })
        .await
    }

    /// Delete an entity at the given generation; emits `Deleted`.
    ///
    /// Fails with `OutOfDate` when `generation` is stale and `NotFound` when
    /// the entity does not exist.
    pub async fn unregister(
        &self,
        id: &str,
        generation: &str,
        context: &OperationContext,
    ) -> Result<T> {
        let deleted = self
            .repository
            .delete(id, context, |current| {
                if current.generation_id() != Some(generation) {
                    return Err(Error::out_of_date(format!(
                        "{}/{} is no longer at generation {}",
                        T::COLLECTION,
                        id,
                        generation
                    )));
                }
                Ok(true)
            })
            .await?
            .ok_or_else(|| Error::not_found(format!("{}/{}", T::COLLECTION, id)))?;
        let _ = self.notify(EventKind::Deleted, &deleted, context).await;
        Ok(deleted)
    }

    /// Delete every lost entity not seen for longer than `not_seen_for`.
    ///
    /// Found entities are never purged. Individual failures are collected
    /// in the summary and do not stop the batch.
    pub async fn purge_stale(
        &self,
        not_seen_for: Duration,
        context: &OperationContext,
    ) -> Result<PurgeSummary> {
        let age = i64::try_from(not_seen_for.as_millis()).unwrap_or(i64::MAX);
        let threshold = context.time.saturating_sub(age);
        let filter = DocumentFilter::new()
            .eq("state.visibility", Visibility::Lost.as_str())
            .lt("state.not_seen_since", threshold);
        let candidates = self.repository.query_all(&filter, context).await?;

        let mut summary = PurgeSummary::default();
        for candidate in candidates {
            let id = candidate.id().to_string();
            let result = self
                .repository
                .delete(&id, context, |current| Ok(current.state().is_stale(threshold)))
                .await;
            match result {
                Ok(Some(entity)) => {
                    if let Err(e) = self.notify(EventKind::Deleted, &entity, context).await {
                        summary.listener_failures.push((id.clone(), e));
                    }
                    summary.deleted.push(id);
                }
                Ok(None) => summary.skipped.push(id),
                Err(e) if e.kind() == ErrorKind::NotFound => summary.skipped.push(id),
                Err(e) => {
                    tracing::warn!(collection = T::COLLECTION, id = %id, "Purge failed: {}", e);
                    let cancelled = e.kind() == ErrorKind::Cancelled;
                    summary.failures.push((id, e));
                    if cancelled {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            collection = T::COLLECTION,
            deleted = summary.deleted.len(),
            skipped = summary.skipped.len(),
            failed = summary.failures.len(),
            "Purge finished"
        );
        Ok(summary)
    }

    /// Purge with the configured retention.
    pub async fn purge_expired(&self, context: &OperationContext) -> Result<PurgeSummary> {
        self.purge_stale(self.config.purge_after(), context).await
    }

    async fn transition(
        &self,
        id: &str,
        kind: EventKind,
        context: &OperationContext,
        summary: &mut ScanSummary,
    ) {
        let mut changed = false;
        let result = self
            .repository
            .update(id, context, |entity| {
                let state = entity.state_mut();
                changed = if kind == EventKind::Lost {
                    state.mark_lost(context)
                } else {
                    state.mark_found()
                };
                if changed {
                    state.touch(context);
                }
                Ok(changed)
            })
            .await;
        match result {
            Ok(entity) if changed => {
                let outcome = self.notify(kind, &entity, context).await;
                summary.notified(id, outcome);
                summary.record(kind, id.to_string());
            }
            Ok(_) => summary.unchanged += 1,
            Err(e) => {
                tracing::warn!(
                    collection = T::COLLECTION,
                    id,
                    event = kind.as_str(),
                    "Transition failed: {}",
                    e
                );
                summary.fail(id.to_string(), e);
            }
        }
    }

    /// Mark entities as lost, stamping `not_seen_since` with the context time.
    pub async fn mark_lost(&self, ids: &[String], context: &OperationContext) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for id in ids {
            self.transition(id, EventKind::Lost, context, &mut summary)
                .await;
        }
        summary
    }

    /// Mark entities as found again.
    pub async fn mark_found(&self, ids: &[String], context: &OperationContext) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for id in ids {
            self.transition(id, EventKind::Found, context, &mut summary)
                .await;
        }
        summary
    }

    /// Apply the result of a discovery scan.
    ///
    /// Every observed entity is registered (new, updated or found again).
    /// Entities matching `scope` that were not observed are marked lost.
    pub async fn process_scan(
        &self,
        scope: &DocumentFilter,
        observed: Vec<T>,
        context: &OperationContext,
    ) -> Result<ScanSummary> {
        EntityRepository::<T>::check_filter(scope)?;

        let mut summary = ScanSummary::default();
        let mut seen = HashSet::new();
        for request in observed {
            let id = request.derive_id();
            seen.insert(id.clone());
            match self.upsert(request, context).await {
                Ok((entity, Some(kind))) => {
                    let outcome = self.notify(kind, &entity, context).await;
                    summary.notified(&id, outcome);
                    summary.record(kind, id);
                }
                Ok((_, None)) => summary.unchanged += 1,
                Err(e) => {
                    tracing::warn!(collection = T::COLLECTION, id = %id, "Registration failed: {}", e);
                    summary.fail(id, e);
                }
            }
        }

        let present = scope
            .clone()
            .ne("state.visibility", Visibility::Lost.as_str());
        let missing: Vec<String> = self
            .repository
            .query_all(&present, context)
            .await?
            .into_iter()
            .map(|entity| entity.id().to_string())
            .filter(|id| !seen.contains(id))
            .collect();
        for id in &missing {
            self.transition(id, EventKind::Lost, context, &mut summary)
                .await;
        }

        tracing::info!(
            collection = T::COLLECTION,
            new = summary.new.len(),
            updated = summary.updated.len(),
            found = summary.found.len(),
            lost = summary.lost.len(),
            failed = summary.failures.len(),
            "Scan processed"
        );
        Ok(summary)
    }

    pub async fn find(&self, id: &str, context: &OperationContext) -> Result<Option<T>> {
        self.repository.find(id, context).await
    }

    pub async fn get(&self, id: &str, context: &OperationContext) -> Result<T> {
        self.repository.get(id, context).await
    }

    pub async fn query(
        &self,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
        context: &OperationContext,
    ) -> Result<QueryPage<T>> {
        self.repository
            .query(filter, continuation, page_size, context)
            .await
    }

    pub async fn query_all(
        &self,
        filter: &DocumentFilter,
        context: &OperationContext,
    ) -> Result<Vec<T>> {
        self.repository.query_all(filter, context).await
    }
}

impl RegistryService<EndpointRegistration> {
    /// Enable an endpoint; emits `Updated` if it was deactivated.
    pub async fn activate(
        &self,
        id: &str,
        context: &OperationContext,
    ) -> Result<EndpointRegistration> {
        self.update_with(id, context, |endpoint| Ok(endpoint.activate()))
            .await
    }

    /// Disable an endpoint; emits `Updated` if it was activated.
    pub async fn deactivate(
        &self,
        id: &str,
        context: &OperationContext,
    ) -> Result<EndpointRegistration> {
        self.update_with(id, context, |endpoint| Ok(endpoint.deactivate()))
            .await
    }
}

impl RegistryService<SupervisorRegistration> {
    /// Merge device-reported properties. Null values remove keys.
    pub async fn update_reported(
        &self,
        id: &str,
        updates: &PropertyMap,
        context: &OperationContext,
    ) -> Result<SupervisorRegistration> {
        self.update_with(id, context, |twin| Ok(twin.apply_reported(updates)))
            .await
    }

    /// Merge operator-desired properties. Null values remove keys.
    pub async fn update_desired(
        &self,
        id: &str,
        updates: &PropertyMap,
        context: &OperationContext,
    ) -> Result<SupervisorRegistration> {
        self.update_with(id, context, |twin| Ok(twin.apply_desired(updates)))
            .await
    }
}
