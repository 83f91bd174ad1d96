//! In-process event broker.
//!
//! The broker owns nothing but listener registrations. Notification walks a
//! snapshot of the listener list in registration order and isolates every
//! listener: an error or a panic in one listener is collected and reported
//! as [`Error::Aggregate`] once all other listeners have been invoked.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::RegistryEvent;

struct BrokerInner<L: ?Sized> {
    listeners: Mutex<Vec<(u64, Arc<L>)>>,
    next_token: AtomicU64,
}

/// Fan-out of notifications to registered listeners.
pub struct EventBroker<L: ?Sized> {
    inner: Arc<BrokerInner<L>>,
}

impl<L: ?Sized> Clone for EventBroker<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> EventBroker<L> {
    /// Create a broker with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                listeners: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener.
    ///
    /// The returned handle removes the listener again; it does not keep the
    /// broker alive.
    pub fn register(&self, listener: Arc<L>) -> Unregister {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((token, listener));

        let weak: Weak<BrokerInner<L>> = Arc::downgrade(&self.inner);
        Unregister::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().retain(|(t, _)| *t != token);
            }
        })
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Invoke `action` against every registered listener.
    pub async fn notify_all<F, Fut>(&self, action: F) -> Result<()>
    where
        F: Fn(Arc<L>) -> Fut + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        // Never hold the lock across an await.
        let listeners: Vec<Arc<L>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let action = &action;
        let mut failures = Vec::new();
        for (index, listener) in listeners.into_iter().enumerate() {
            let outcome = AssertUnwindSafe(async move { action(listener).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(listener = index, error = %e, "Listener failed");
                    failures.push(e);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::warn!(listener = index, panic = %message, "Listener panicked");
                    failures.push(Error::Listener(message));
                }
            }
        }

        Error::aggregate(failures)
    }
}

impl<L: ?Sized + Send + Sync + 'static> Default for EventBroker<L> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle that removes a registered listener. Calling it twice is a no-op.
pub struct Unregister {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unregister {
    fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Remove the listener.
    pub fn unregister(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether the listener has already been removed through this handle.
    pub fn is_unregistered(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl fmt::Debug for Unregister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unregister")
            .field("unregistered", &self.is_unregistered())
            .finish()
    }
}

/// Listener of typed registry events.
#[async_trait]
pub trait RegistryListener<T: Send + Sync>: Send + Sync {
    async fn on_event(&self, event: &RegistryEvent<T>) -> Result<()>;
}

/// Broker of typed registry events.
pub type RegistryEventBroker<T> = EventBroker<dyn RegistryListener<T>>;

impl<T: Send + Sync + 'static> EventBroker<dyn RegistryListener<T>> {
    /// Deliver one event to every listener.
    pub async fn publish(&self, event: RegistryEvent<T>) -> Result<()> {
        let event = Arc::new(event);
        self.notify_all(|listener| {
            let event = Arc::clone(&event);
            async move { listener.on_event(&event).await }
        })
        .await
    }
}

/// Listener backed by a synchronous closure.
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F> RegistryListener<T> for FnListener<F>
where
    T: Send + Sync,
    F: Fn(&RegistryEvent<T>) -> Result<()> + Send + Sync,
{
    async fn on_event(&self, event: &RegistryEvent<T>) -> Result<()> {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, OperationContext};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(log: &Log, name: &'static str) -> Arc<dyn RegistryListener<u32>> {
        let log = log.clone();
        Arc::new(FnListener::new(move |event: &RegistryEvent<u32>| -> Result<()> {
            log.lock().push(format!("{name}:{}", event.entity));
            Ok(())
        }))
    }

    fn event(value: u32) -> RegistryEvent<u32> {
        RegistryEvent::new(EventKind::Updated, value, OperationContext::new())
    }

    #[tokio::test]
    async fn test_notify_in_registration_order() {
        let broker = RegistryEventBroker::<u32>::new();
        let log: Log = Arc::default();
        let _a = broker.register(recording(&log, "a"));
        let _b = broker.register(recording(&log, "b"));

        broker.publish(event(1)).await.unwrap();
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[tokio::test]
    async fn test_failing_listener_is_isolated() {
        let broker = RegistryEventBroker::<u32>::new();
        let log: Log = Arc::default();
        let _a = broker.register(recording(&log, "first"));
        let _b = broker.register(Arc::new(FnListener::new(|_: &RegistryEvent<u32>| -> Result<()> {
            Err(Error::invalid_argument("boom"))
        })));
        let _c = broker.register(recording(&log, "third"));

        let err = broker.publish(event(7)).await.unwrap_err();
        assert_eq!(*log.lock(), vec!["first:7", "third:7"]);
        match err {
            Error::Aggregate(agg) => {
                assert_eq!(agg.len(), 1);
                assert!(agg.errors()[0].to_string().contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_is_isolated() {
        let broker = RegistryEventBroker::<u32>::new();
        let log: Log = Arc::default();
        let _a = broker.register(Arc::new(FnListener::new(|_: &RegistryEvent<u32>| -> Result<()> {
            panic!("listener exploded")
        })));
        let _b = broker.register(recording(&log, "after"));

        let err = broker.publish(event(3)).await.unwrap_err();
        assert_eq!(*log.lock(), vec!["after:3"]);
        assert!(err.to_string().contains("listener exploded"));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let broker = RegistryEventBroker::<u32>::new();
        let log: Log = Arc::default();
        let handle = broker.register(recording(&log, "a"));
        let _other = broker.register(recording(&log, "b"));
        assert_eq!(broker.listener_count(), 2);

        handle.unregister();
        handle.unregister();
        assert!(handle.is_unregistered());
        assert_eq!(broker.listener_count(), 1);

        broker.publish(event(5)).await.unwrap();
        assert_eq!(*log.lock(), vec!["b:5"]);
    }

    #[tokio::test]
    async fn test_unregister_after_broker_dropped() {
        let broker = RegistryEventBroker::<u32>::new();
        let log: Log = Arc::default();
        let handle = broker.register(recording(&log, "a"));
        drop(broker);
        handle.unregister();
        assert!(handle.is_unregistered());
    }
}
