//! Error types shared by the MongoDB storage implementation.

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

use crate::{dao::storage::StorageErrorKind, services::retry::is_non_transient};

/// Convenient result alias returning [`MongoDaoError`] failures.
pub type MongoResult<T> = Result<T, MongoDaoError>;

const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const UNAUTHORIZED: i32 = 13;
const TYPE_MISMATCH: i32 = 14;
const NAMESPACE_NOT_FOUND: i32 = 26;
const WRITE_CONFLICT: i32 = 112;
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;
const DUPLICATE_KEY: i32 = 11000;

const TRANSIENT_TRANSACTION_LABEL: &str = "TransientTransactionError";

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver rejected the client options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A health check ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// A driver call failed.
    #[error("MongoDB {operation} on `{collection}` failed")]
    Operation {
        operation: &'static str,
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    /// Every compare-and-swap attempt on the live state lost a race.
    #[error("live state update lost {attempts} compare-and-swap races")]
    Contention { attempts: u32 },
    /// A stored document could not be converted.
    #[error("document in `{collection}` does not match the schema: {message}")]
    Schema {
        collection: &'static str,
        message: String,
    },
}

impl MongoDaoError {
    pub(super) fn operation(
        operation: &'static str,
        collection: &'static str,
    ) -> impl FnOnce(MongoError) -> Self {
        move |source| MongoDaoError::Operation {
            operation,
            collection,
            source,
        }
    }

    /// Backend-independent classification.
    pub fn storage_kind(&self) -> StorageErrorKind {
        match self {
            MongoDaoError::InvalidUri { .. } => StorageErrorKind::InvalidArgument,
            MongoDaoError::Contention { .. } => StorageErrorKind::Contention,
            MongoDaoError::Schema { .. } => StorageErrorKind::InvalidArgument,
            MongoDaoError::ClientConstruction { source }
            | MongoDaoError::InitialPing { source, .. }
            | MongoDaoError::HealthPing { source }
            | MongoDaoError::EnsureIndex { source, .. }
            | MongoDaoError::Operation { source, .. } => classify(source),
        }
    }

    /// Whether the failure is a unique index violation.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.storage_kind(), StorageErrorKind::AlreadyExists)
    }
}

fn classify(err: &MongoError) -> StorageErrorKind {
    if err.contains_label(TRANSIENT_TRANSACTION_LABEL) {
        return StorageErrorKind::Contention;
    }
    match err.kind.as_ref() {
        ErrorKind::Authentication { .. } => StorageErrorKind::Unauthenticated,
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            StorageErrorKind::InvalidArgument
        }
        ErrorKind::InvalidArgument { .. } => StorageErrorKind::InvalidArgument,
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StorageErrorKind::Unavailable,
        ErrorKind::Write(WriteFailure::WriteError(write)) => {
            classify_code(write.code, &write.message)
        }
        ErrorKind::Command(command) => classify_code(command.code, &command.message),
        _ => classify_message(&err.to_string()),
    }
}

/// Map a server error code, falling back to the message for codes not listed here.
fn classify_code(code: i32, message: &str) -> StorageErrorKind {
    match code {
        DUPLICATE_KEY => StorageErrorKind::AlreadyExists,
        UNAUTHORIZED => StorageErrorKind::PermissionDenied,
        WRITE_CONFLICT => StorageErrorKind::Contention,
        NAMESPACE_NOT_FOUND => StorageErrorKind::NotFound,
        BAD_VALUE | FAILED_TO_PARSE | TYPE_MISMATCH | DOCUMENT_VALIDATION_FAILURE => {
            StorageErrorKind::InvalidArgument
        }
        _ => classify_message(message),
    }
}

/// Driver failures without a recognised code are retried unless the message
/// names a permanent condition.
fn classify_message(message: &str) -> StorageErrorKind {
    if !is_non_transient(&message) {
        return StorageErrorKind::Unavailable;
    }
    let message = message.to_lowercase();
    if message.contains("permission") {
        StorageErrorKind::PermissionDenied
    } else if message.contains("unauthenticated") {
        StorageErrorKind::Unauthenticated
    } else if message.contains("already exists") || message.contains("already-exists") {
        StorageErrorKind::AlreadyExists
    } else if message.contains("not found") || message.contains("not-found") {
        StorageErrorKind::NotFound
    } else {
        StorageErrorKind::InvalidArgument
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_fall_back_to_the_message() {
        assert_eq!(classify_code(-1, "ns not found"), StorageErrorKind::NotFound);
        assert_eq!(
            classify_code(8000, "user is not allowed: permission denied"),
            StorageErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_code(-1, "Invalid argument: $set is empty"),
            StorageErrorKind::InvalidArgument
        );
        assert_eq!(
            classify_code(-1, "connection reset by peer"),
            StorageErrorKind::Unavailable
        );
    }

    #[test]
    fn known_codes_win_over_the_message() {
        assert_eq!(
            classify_code(NAMESPACE_NOT_FOUND, "whatever"),
            StorageErrorKind::NotFound
        );
        assert_eq!(
            classify_code(DOCUMENT_VALIDATION_FAILURE, "Document failed validation"),
            StorageErrorKind::InvalidArgument
        );
        assert_eq!(
            classify_code(DUPLICATE_KEY, "E11000 duplicate key error"),
            StorageErrorKind::AlreadyExists
        );
        assert_eq!(
            classify_code(WRITE_CONFLICT, "WriteConflict"),
            StorageErrorKind::Contention
        );
    }

    #[test]
    fn permanent_messages_are_not_retried() {
        for message in [
            "ns not found",
            "command find requires authentication: unauthenticated",
            "index already exists with different options",
        ] {
            assert!(!classify_message(message).is_transient(), "{message}");
        }
        assert!(classify_message("server selection timeout").is_transient());
    }
}
