//! Event bus for propagating registry events beyond the in-process broker.
//!
//! The bus uses a broadcast channel of [`EventEnvelope`]s. It is the default
//! [`EventSink`]: a registry forwards committed transitions to it and any
//! number of subscribers (other services, bridges to a message broker)
//! receive them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::event::EventEnvelope;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Destination for serialized registry events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;
}

/// Broadcast bus of registry event envelopes.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send an envelope to all subscribers.
    ///
    /// Returns `true` if there was at least one subscriber.
    pub fn send(&self, envelope: EventEnvelope) -> bool {
        self.tx.send(envelope).is_ok()
    }

    /// Subscribe to all events.
    ///
    /// If the subscriber falls behind, older events are dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Create a filtered subscription helper.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        if !self.send(envelope) {
            tracing::trace!(bus = %self.name, "No subscribers, envelope dropped");
        }
        Ok(())
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<EventEnvelope>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event bus receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&EventEnvelope) -> bool + Send,
{
    rx: broadcast::Receiver<EventEnvelope>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&EventEnvelope) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<EventEnvelope>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if (self.filter)(&envelope) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        while let Ok(envelope) = self.rx.try_recv() {
            if (self.filter)(&envelope) {
                return Some(envelope);
            }
        }
        None
    }
}

/// Builder for filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<EventEnvelope>,
}

impl FilterBuilder {
    /// Subscribe to events of one entity type.
    pub fn entity_type(
        &self,
        entity_type: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&EventEnvelope) -> bool + Send + 'static> {
        let target = entity_type.into();
        FilteredReceiver::new(self.tx.subscribe(), move |envelope: &EventEnvelope| {
            envelope.entity_type == target
        })
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
