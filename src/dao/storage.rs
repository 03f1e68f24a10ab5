use std::{error::Error, fmt};
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Broad classification of a store failure, independent of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// Backend could not be reached.
    Unavailable,
    /// Optimistic write lost against a concurrent writer.
    Contention,
    /// Backend did not answer in time.
    DeadlineExceeded,
    /// Backend is throttling or a subscriber fell behind.
    ResourceExhausted,
    /// Caller is not allowed to perform the operation.
    PermissionDenied,
    /// Referenced document does not exist.
    NotFound,
    /// Request or stored document does not match the schema.
    InvalidArgument,
    /// Document with the same key is already present.
    AlreadyExists,
    /// Backend rejected the credentials.
    Unauthenticated,
}

impl StorageErrorKind {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            StorageErrorKind::Unavailable
                | StorageErrorKind::Contention
                | StorageErrorKind::DeadlineExceeded
                | StorageErrorKind::ResourceExhausted
        )
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StorageErrorKind::Unavailable => "unavailable",
            StorageErrorKind::Contention => "aborted due to contention",
            StorageErrorKind::DeadlineExceeded => "deadline exceeded",
            StorageErrorKind::ResourceExhausted => "resource exhausted",
            StorageErrorKind::PermissionDenied => "permission denied",
            StorageErrorKind::NotFound => "not found",
            StorageErrorKind::InvalidArgument => "invalid argument",
            StorageErrorKind::AlreadyExists => "already exists",
            StorageErrorKind::Unauthenticated => "unauthenticated",
        };
        f.write_str(label)
    }
}

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
#[error("storage {kind}: {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl StorageError {
    /// Build an error without an underlying cause.
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build an error wrapping a backend failure.
    pub fn with_source(
        kind: StorageErrorKind,
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        Self::with_source(StorageErrorKind::Unavailable, message, source)
    }

    /// Classification of this failure.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Human readable detail without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }
}
