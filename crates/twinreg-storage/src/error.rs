//! Error types for the storage crate.

use thiserror::Error;

pub use twinreg_core::Error as RegistryError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Document already exists.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// Presented generation does not match.
    #[error("Generation mismatch for {id}: expected {expected}, found {found}")]
    GenerationMismatch {
        id: String,
        expected: String,
        found: String,
    },
}

// Convert to the registry error taxonomy
impl From<Error> for RegistryError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => RegistryError::Storage(e.to_string()),
            Error::Serialization(s) => RegistryError::Serialization(s),
            Error::Storage(s) => RegistryError::Storage(s),
            Error::NotFound(s) => RegistryError::NotFound(s),
            Error::AlreadyExists(s) => RegistryError::Conflict(s),
            e @ Error::GenerationMismatch { .. } => RegistryError::OutOfDate(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Storage(format!("Task join error: {}", e))
    }
}

/// Backend failures all surface as `Storage`, tagged with the redb stage.
#[cfg(feature = "redb")]
macro_rules! redb_storage_error {
    ($($ty:ty => $stage:literal),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Storage(format!("redb {}: {}", $stage, e))
                }
            }
        )*
    };
}

#[cfg(feature = "redb")]
redb_storage_error! {
    redb::Error => "error",
    redb::DatabaseError => "open",
    redb::TransactionError => "transaction",
    redb::TableError => "table",
    redb::StorageError => "io",
    redb::CommitError => "commit",
}
