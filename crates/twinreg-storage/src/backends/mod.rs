//! Document store backends.
//!
//! The in-memory store is always available. Persistent backends are
//! feature-gated for conditional compilation.

use std::sync::Arc;

use twinreg_core::{Error, SharedDocumentStore, StorageConfig};

use crate::memory::MemoryDocumentStore;

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "redb")]
pub use self::redb::RedbDocumentStore;

/// Create a document store from configuration.
///
/// # Example
/// ```no_run
/// use twinreg_core::StorageConfig;
/// use twinreg_storage::backends::create_store;
///
/// # fn main() -> twinreg_core::Result<()> {
/// let store = create_store(&StorageConfig::redb("./data/registry.redb"))?;
/// assert!(store.is_persistent());
/// # Ok(())
/// # }
/// ```
pub fn create_store(config: &StorageConfig) -> twinreg_core::Result<SharedDocumentStore> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryDocumentStore::new())),

        #[cfg(feature = "redb")]
        "redb" => {
            let store = RedbDocumentStore::from_config(config)?;
            tracing::info!(path = %config.path, "Using redb document store");
            Ok(Arc::new(store))
        }

        other => Err(Error::invalid_argument(format!(
            "Unknown storage backend: {}. Available backends: {}",
            other,
            available_backends().join(", ")
        ))),
    }
}

/// Backend identifiers compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = vec!["memory"];
    if cfg!(feature = "redb") {
        backends.push("redb");
    }
    backends
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinreg_core::ErrorKind;

    #[test]
    fn test_available_backends() {
        let backends = available_backends();
        assert!(backends.contains(&"memory"));
    }

    #[test]
    fn test_create_unknown_backend() {
        let config = StorageConfig {
            backend: "cassandra".to_string(),
            ..StorageConfig::default()
        };
        let err = create_store(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn test_create_memory_store() {
        let store = create_store(&StorageConfig::memory()).unwrap();
        assert!(!store.is_persistent());
    }

    #[cfg(feature = "redb")]
    #[test]
    fn test_create_redb_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.redb");
        let store = create_store(&StorageConfig::redb(path.to_string_lossy())).unwrap();
        assert!(store.is_persistent());
        assert!(path.exists());
    }
}
