//! Typed entity repository over a document store.
//!
//! Updates and deletes follow a read, mutate, conditional-write loop. When
//! the conditional write loses a generation race the loop re-reads the
//! current document and runs the caller's closure again, waiting according
//! to the configured [`RetryPolicy`] between attempts.
//!
//! Cancellation interrupts reads and backoff waits. Writes only observe it
//! before they are sent to the store.

use std::future::Future;
use std::marker::PhantomData;

use serde_json::Value;
use twinreg_core::{
    DocumentFilter, Error, ErrorKind, OperationContext, QueryPage, RegistryConfig, Result,
    RetryPolicy, SharedDocumentStore, StoredDocument,
};

use crate::model::Registration;

/// Repository for one registration type.
pub struct EntityRepository<T> {
    store: SharedDocumentStore,
    retry: RetryPolicy,
    page_size: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntityRepository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry.clone(),
            page_size: self.page_size,
            _entity: PhantomData,
        }
    }
}

impl<T: Registration> EntityRepository<T> {
    pub fn new(store: SharedDocumentStore, config: &RegistryConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
            page_size: config.page_size,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &SharedDocumentStore {
        &self.store
    }

    fn decode(doc: StoredDocument) -> Result<T> {
        let mut entity: T = serde_json::from_value(doc.value)?;
        entity.set_id(doc.id);
        entity.set_generation_id(Some(doc.generation));
        Ok(entity)
    }

    fn encode(entity: &T) -> Result<Value> {
        let mut entity = entity.clone();
        entity.set_generation_id(None);
        Ok(serde_json::to_value(entity)?)
    }

    /// Run a store call unless the operation is cancelled first.
    async fn guarded<R>(
        &self,
        context: &OperationContext,
        call: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        let token = context.cancellation();
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = call => result,
        }
    }

    /// Start a write unless the operation is already cancelled.
    ///
    /// A dispatched write is awaited to completion, so a write the store
    /// committed is never reported as cancelled.
    async fn dispatch<R>(
        &self,
        context: &OperationContext,
        write: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        if context.is_cancelled() {
            return Err(Error::Cancelled);
        }
        write.await
    }

    /// Wait before the next attempt, or give up once the policy is exhausted.
    async fn backoff(&self, id: &str, attempts: u32, context: &OperationContext) -> Result<()> {
        if !self.retry.allows(attempts) {
            tracing::warn!(
                collection = T::COLLECTION,
                id,
                attempts,
                "Giving up on contended write"
            );
            return Err(Error::out_of_date(format!(
                "{}/{} still contended after {} attempts",
                T::COLLECTION,
                id,
                attempts
            )));
        }
        let delay = self.retry.backoff(attempts);
        tracing::debug!(
            collection = T::COLLECTION,
            id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "Generation conflict, retrying"
        );
        self.guarded(context, async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }

    /// Reject filters on fields this type does not index.
    pub fn check_filter(filter: &DocumentFilter) -> Result<()> {
        if let Some(path) = filter.paths().find(|path| !T::is_indexed(path)) {
            return Err(Error::invalid_argument(format!(
                "{} cannot be filtered on '{}'",
                T::COLLECTION,
                path
            )));
        }
        Ok(())
    }

    /// Store a new entity under its id, deriving the id when empty.
    ///
    /// Fails with `Conflict` when the id is taken.
    pub async fn add(&self, mut entity: T, context: &OperationContext) -> Result<T> {
        entity.validate()?;
        if entity.id().is_empty() {
            let id = entity.derive_id();
            entity.set_id(id);
        }
        let value = Self::encode(&entity)?;
        let doc = self
            .dispatch(context, self.store.add(T::COLLECTION, entity.id(), value))
            .await?;
        Self::decode(doc)
    }

    /// Look up an entity; absence is not an error.
    pub async fn find(&self, id: &str, context: &OperationContext) -> Result<Option<T>> {
        let doc = self
            .guarded(context, self.store.find(T::COLLECTION, id))
            .await?;
        doc.map(Self::decode).transpose()
    }

    /// Look up an entity that must exist.
    pub async fn get(&self, id: &str, context: &OperationContext) -> Result<T> {
        self.find(id, context)
            .await?
            .ok_or_else(|| Error::not_found(format!("{}/{}", T::COLLECTION, id)))
    }

    /// Mutate an entity with optimistic concurrency.
    ///
    /// `mutate` sees a fresh copy on every attempt. Returning `Ok(false)`
    /// ends the loop without writing and yields the unchanged entity;
    /// returning an error abandons the update.
    pub async fn update<F>(&self, id: &str, context: &OperationContext, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut T) -> Result<bool> + Send,
    {
        let mut attempts = 0;
        loop {
            let mut entity = self.get(id, context).await?;
            let generation = entity.generation_id().unwrap_or_default().to_string();
            if !mutate(&mut entity)? {
                return Ok(entity);
            }
            entity.validate()?;

            let value = Self::encode(&entity)?;
            let replaced = self
                .dispatch(
                    context,
                    self.store.replace(T::COLLECTION, id, &generation, value),
                )
                .await;
            match replaced {
                Ok(doc) => return Self::decode(doc),
                Err(e) if e.kind() == ErrorKind::OutOfDate => {
                    attempts += 1;
                    self.backoff(id, attempts, context).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete an entity when `predicate` allows it.
    ///
    /// Returns the last stored state of the deleted entity, or `None` when
    /// the predicate declined. Fails with `NotFound` when absent.
    pub async fn delete<P>(
        &self,
        id: &str,
        context: &OperationContext,
        mut predicate: P,
    ) -> Result<Option<T>>
    where
        P: FnMut(&T) -> Result<bool> + Send,
    {
        let mut attempts = 0;
        loop {
            let entity = self.get(id, context).await?;
            if !predicate(&entity)? {
                return Ok(None);
            }
            let generation = entity.generation_id().unwrap_or_default();

            let deleted = self
                .dispatch(context, self.store.delete(T::COLLECTION, id, generation))
                .await;
            match deleted {
                Ok(()) => return Ok(Some(entity)),
                Err(e) if e.kind() == ErrorKind::OutOfDate => {
                    attempts += 1;
                    self.backoff(id, attempts, context).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One page of entities matching `filter`, ordered by id.
    pub async fn query(
        &self,
        filter: &DocumentFilter,
        continuation: Option<&str>,
        page_size: usize,
        context: &OperationContext,
    ) -> Result<QueryPage<T>> {
        Self::check_filter(filter)?;
        let page = self
            .guarded(
                context,
                self.store
                    .query(T::COLLECTION, filter, continuation, page_size),
            )
            .await?;
        page.try_map(Self::decode)
    }

    /// Every entity matching `filter`, fetched page by page.
    pub async fn query_all(
        &self,
        filter: &DocumentFilter,
        context: &OperationContext,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .query(filter, continuation.as_deref(), self.page_size, context)
                .await?;
            items.extend(page.items);
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => return Ok(items),
            }
        }
    }
}
