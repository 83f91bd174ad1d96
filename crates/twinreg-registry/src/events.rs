//! Forwarding registry events to a messaging sink.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use twinreg_core::{EventEnvelope, EventSink, RegistryEvent, RegistryListener, Result};

use crate::model::Registration;

/// Listener that wraps every event in an [`EventEnvelope`] and publishes it.
///
/// The envelope entity type is the registration collection.
pub struct SinkForwarder<T> {
    sink: Arc<dyn EventSink>,
    _entity: PhantomData<fn(T)>,
}

impl<T> SinkForwarder<T> {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Registration> RegistryListener<T> for SinkForwarder<T> {
    async fn on_event(&self, event: &RegistryEvent<T>) -> Result<()> {
        let envelope = EventEnvelope::from_event(T::COLLECTION, event.entity.id(), event)?;
        self.sink.publish(envelope).await
    }
}
