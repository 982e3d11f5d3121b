//! Error types for EventVault.
//!
//! Errors are layered the same way the crate is:
//!
//! - **EngineError**: failures reported by a [`DocumentEngine`](crate::engine::DocumentEngine)
//! - **EventStoreError**: stream lifecycle, querying and transaction failures
//! - **ProjectionError**: projector and projection manager failures
//!
//! Engine failures convert into the two higher layers with `?`, so adapters only
//! ever have to speak `EngineError`.

use thiserror::Error;

/// Errors reported by a document engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A write violated a unique index.
    #[error("duplicate key in collection {collection}: {detail}")]
    DuplicateKey {
        /// Collection the write targeted.
        collection: String,
        /// Engine supplied description of the violated key.
        detail: String,
    },

    /// The engine rejected a regular expression.
    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    /// The collection does not exist.
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    /// The referenced session is unknown to the engine.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Any other backend failure, with the operation that produced it.
    #[error("{operation} failed: {message}")]
    Backend {
        /// Engine operation name, e.g. `insert_many`.
        operation: String,
        /// Backend error text.
        message: String,
    },
}

impl EngineError {
    /// Convenience constructor for [`EngineError::Backend`].
    pub fn backend(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Errors that can occur while working with streams.
///
/// # Error Handling Strategy
///
/// - **StreamNotFound**: the stream must be created first
/// - **StreamExistsAlready**: benign race on creation, use `append_to` instead
/// - **ConcurrencyConflict**: reload the aggregate and retry
/// - **InvalidArgument / Configuration**: caller bug, never retried
/// - **Engine**: infrastructure failure
#[derive(Debug, Clone, Error)]
pub enum EventStoreError {
    /// The stream has no registry entry or no physical collection.
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// A stream with the same name was already created.
    #[error("Stream already exists: {0}")]
    StreamExistsAlready(String),

    /// A caller supplied argument was rejected before any I/O happened.
    #[error("{0}")]
    InvalidArgument(String),

    /// The store was configured inconsistently.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A write violated a uniqueness constraint on sequence or version fields.
    #[error("Concurrency conflict on stream {stream}: {detail}")]
    ConcurrencyConflict {
        /// Logical stream name.
        stream: String,
        /// Engine supplied description of the violated key.
        detail: String,
    },

    /// An event written with a versioned strategy carried no `_aggregate_version`.
    #[error("Missing aggregate version in metadata of event {0}")]
    MissingAggregateVersion(String),

    /// `begin_transaction` was called while a transaction was open.
    #[error("Transaction already started")]
    TransactionAlreadyStarted,

    /// `commit` or `rollback` was called without an open transaction.
    #[error("Transaction not started")]
    TransactionNotStarted,

    /// A stored document could not be decoded, or a message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The underlying document engine failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl From<serde_json::Error> for EventStoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Errors that can occur during projection processing and management.
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    /// No projection row exists under this name.
    #[error("Projection not found: {0}")]
    NotFound(String),

    /// Another runner holds the projection lock.
    #[error("Another projection process is already running")]
    AlreadyRunning,

    /// The projections collection has not been created.
    #[error("Projection collection {0} is not set up")]
    CollectionNotSetup(String),

    /// The projection row could not be created.
    #[error("Projection was not created: {0}")]
    ProjectionNotCreated(String),

    /// The projector builder was used incorrectly.
    #[error("{0}")]
    Configuration(String),

    /// A caller supplied argument was rejected before any I/O happened.
    #[error("{0}")]
    InvalidArgument(String),

    /// An engine call produced an outcome that should be impossible.
    #[error("Internal projection error: {0}")]
    Internal(String),

    /// The event store failed.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The underlying document engine failed.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Type alias for event store results.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Type alias for projection results.
pub type ProjectionResult<T> = Result<T, ProjectionError>;

/// Type alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

/// Message used whenever a regular expression is rejected.
pub const INVALID_REGEX_MESSAGE: &str = "Invalid regex pattern given";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_convert_into_store_errors() {
        let engine = EngineError::NamespaceNotFound("_abc".to_string());
        let store: EventStoreError = engine.clone().into();
        assert!(matches!(store, EventStoreError::Engine(e) if e == engine));
    }

    #[test]
    fn invalid_argument_displays_bare_message() {
        let error = EventStoreError::InvalidArgument(INVALID_REGEX_MESSAGE.to_string());
        assert_eq!(error.to_string(), "Invalid regex pattern given");
    }

    #[test]
    fn lock_contention_message_is_stable() {
        assert_eq!(
            ProjectionError::AlreadyRunning.to_string(),
            "Another projection process is already running"
        );
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: EventStoreError = parse.into();
        assert!(matches!(error, EventStoreError::Serialization(_)));
    }
}
