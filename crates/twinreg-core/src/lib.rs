//! Core traits and types for twinreg.
//!
//! This crate defines the foundational abstractions shared by the storage
//! backends and the registries: the error taxonomy, lifecycle events, the
//! in-process event broker, the event bus used as a messaging sink, the
//! document store contract and configuration.

pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod logging;
pub mod storage;

pub use broker::{EventBroker, FnListener, RegistryEventBroker, RegistryListener, Unregister};
pub use config::{RegistryConfig, RetryPolicy, StorageConfig};
pub use error::{AggregateError, Error, ErrorKind, Result};
pub use event::{EventEnvelope, EventKind, OperationContext, RegistryEvent};
pub use eventbus::{EventBus, EventSink, SharedEventBus, DEFAULT_CHANNEL_CAPACITY};
pub use storage::{
    fold_case, DocumentFilter, DocumentStore, FieldCondition, FilterOp, QueryPage,
    SharedDocumentStore, StoredDocument,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::broker::{RegistryEventBroker, RegistryListener, Unregister};
    pub use crate::config::{RegistryConfig, RetryPolicy, StorageConfig};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::event::{EventKind, OperationContext, RegistryEvent};
    pub use crate::eventbus::{EventBus, EventSink};
    pub use crate::storage::{DocumentFilter, DocumentStore, SharedDocumentStore};
}
