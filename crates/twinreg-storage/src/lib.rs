//! Document store backends for twinreg.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `redb` | ✅ | Persistent storage using redb |
//!
//! The in-memory store is always compiled in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use twinreg_core::{DocumentStore, StorageConfig};
//! use twinreg_storage::create_store;
//!
//! #[tokio::main]
//! async fn main() -> twinreg_core::Result<()> {
//!     let store = create_store(&StorageConfig::from_env())?;
//!     let doc = store.add("applications", "app-1", json!({"name": "demo"})).await?;
//!     store
//!         .replace("applications", "app-1", &doc.generation, json!({"name": "demo2"}))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod error;
pub mod memory;
#[cfg(feature = "redb")]
pub mod singleton;

pub use backends::{available_backends, create_store};
pub use error::{Error, Result};
pub use memory::MemoryDocumentStore;

#[cfg(feature = "redb")]
pub use backends::RedbDocumentStore;
#[cfg(feature = "redb")]
pub use singleton::{close_db, get_or_open_db, is_cached};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
