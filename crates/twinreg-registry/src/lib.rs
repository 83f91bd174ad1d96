//! Entity registry for discovered industrial applications, endpoints and
//! edge supervisors.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `redb` | ✅ | Persistent document store via `twinreg-storage` |
//!
//! ## Architecture
//!
//! - **Registration**: trait describing an entity type (id derivation,
//!   identity comparison, patch semantics)
//! - **EntityRepository**: optimistic-concurrency reads and writes over a
//!   [`DocumentStore`](twinreg_core::DocumentStore)
//! - **RegistryService**: lifecycle operations (register, unregister,
//!   found/lost, purge) that publish [`RegistryEvent`](twinreg_core::RegistryEvent)s
//! - **SinkForwarder**: bridge from the event broker to an
//!   [`EventSink`](twinreg_core::EventSink)

pub mod events;
pub mod ids;
pub mod model;
pub mod reconcile;
pub mod repository;
pub mod service;

pub use events::SinkForwarder;
pub use ids::derive_id;
pub use model::{
    ActivationState, ApplicationRegistration, ApplicationType, EndpointRegistration,
    PropertyMap, Registration, RegistrationState, SecurityMode, SupervisorRegistration,
    Visibility,
};
pub use reconcile::consolidate;
pub use repository::EntityRepository;
pub use service::{Failures, PurgeSummary, RegistryService, ScanSummary};

/// Registry for discovered OPC UA applications.
pub type ApplicationRegistry = RegistryService<ApplicationRegistration>;
/// Registry for application endpoints.
pub type EndpointRegistry = RegistryService<EndpointRegistration>;
/// Registry for edge supervisor twins.
pub type SupervisorRegistry = RegistryService<SupervisorRegistration>;
