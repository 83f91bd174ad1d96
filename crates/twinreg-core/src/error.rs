//! Error types shared by every twinreg crate.
//!
//! Callers of the registry only ever need to branch on [`ErrorKind`]; the
//! optimistic-concurrency plumbing retries internally and surfaces
//! [`Error::OutOfDate`] only when the configured retry policy gives up.

use std::fmt;

use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Registry error types.
#[derive(Debug, Error)]
pub enum Error {
    /// The target entity does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// An entity with the same id already exists.
    #[error("Resource conflict: {0}")]
    Conflict(String),

    /// The presented generation does not match the stored generation.
    #[error("Resource out of date: {0}")]
    OutOfDate(String),

    /// The request is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Several independent operations failed.
    #[error("{0}")]
    Aggregate(AggregateError),

    /// A listener panicked while handling an event.
    #[error("Listener failed: {0}")]
    Listener(String),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Discriminant of [`Error`], for branching without matching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    OutOfDate,
    InvalidArgument,
    Aggregate,
    Listener,
    Cancelled,
    Serialization,
    Storage,
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::OutOfDate(_) => ErrorKind::OutOfDate,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Aggregate(_) => ErrorKind::Aggregate,
            Error::Listener(_) => ErrorKind::Listener,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Error::Conflict(what.into())
    }

    pub fn out_of_date(what: impl Into<String>) -> Self {
        Error::OutOfDate(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Error::InvalidArgument(what.into())
    }

    /// Collapse a list of failures: `Ok` when empty, the aggregate otherwise.
    pub fn aggregate(errors: Vec<Error>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(AggregateError::new(errors)))
        }
    }

    /// Whether a caller can reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::OutOfDate(_) | Error::Storage(_))
    }
}

/// A collection of independent failures reported together.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operation(s) failed", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { ":" } else { ";" }, error)?;
        }
        Ok(())
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
