use eventvault::errors::EngineError;
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use tracing::error;

/// Server code for a unique index violation.
pub const DUPLICATE_KEY: i32 = 11000;
/// Server code for a malformed query, including invalid `$regex` patterns.
pub const BAD_VALUE: i32 = 2;
/// Server code for an uncompilable regular expression (MongoDB 5+).
pub const INVALID_REGEX: i32 = 51091;
/// Server code for a missing collection.
pub const NAMESPACE_NOT_FOUND: i32 = 26;
/// Server code for creating a collection that already exists.
pub const NAMESPACE_EXISTS: i32 = 48;

/// Failures while setting up a [`MongoDocumentEngine`](crate::MongoDocumentEngine).
#[derive(Debug, Error)]
pub enum MongoEngineError {
    /// The connection string could not be parsed or the client not built.
    #[error("failed to configure mongodb client")]
    ClientConfiguration(#[source] MongoError),

    /// The server did not answer a ping.
    #[error("mongodb ping failed")]
    Ping(#[source] MongoError),
}

/// Server error code carried by a driver error, if any.
pub fn error_code(error: &MongoError) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code),
        _ => None,
    }
}

/// Map a server code and message onto the engine error vocabulary.
pub fn classify(operation: &str, collection: &str, code: Option<i32>, message: String) -> EngineError {
    match code {
        Some(DUPLICATE_KEY) => EngineError::DuplicateKey {
            collection: collection.to_string(),
            detail: message,
        },
        Some(INVALID_REGEX) => EngineError::InvalidRegex(message),
        Some(BAD_VALUE) if mentions_regex(&message) => EngineError::InvalidRegex(message),
        Some(NAMESPACE_NOT_FOUND) => EngineError::NamespaceNotFound(collection.to_string()),
        _ => EngineError::backend(operation, message),
    }
}

fn mentions_regex(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("regex") || lower.contains("regular expression")
}

/// Translate a driver error raised by `operation` on `collection`.
pub fn map_mongo_error(operation: &str, collection: &str, error: &MongoError) -> EngineError {
    let mapped = classify(operation, collection, error_code(error), error.to_string());
    if matches!(mapped, EngineError::Backend { .. }) {
        error!(
            operation,
            collection,
            %error,
            "[mongodb.error] driver operation failed"
        );
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_code_maps_to_duplicate_key() {
        let mapped = classify("insert_many", "events", Some(11000), "E11000 dup key".to_string());
        assert_eq!(
            mapped,
            EngineError::DuplicateKey {
                collection: "events".to_string(),
                detail: "E11000 dup key".to_string(),
            }
        );
    }

    #[test]
    fn bad_regex_maps_to_invalid_regex() {
        let mapped = classify("find", "event_streams", Some(2), "Regular expression is invalid: missing )".to_string());
        assert!(matches!(mapped, EngineError::InvalidRegex(_)));
        let mapped = classify("find", "event_streams", Some(51091), "invalid".to_string());
        assert!(matches!(mapped, EngineError::InvalidRegex(_)));
        let mapped = classify("find", "event_streams", Some(2), "unknown operator".to_string());
        assert!(matches!(mapped, EngineError::Backend { .. }));
    }

    #[test]
    fn missing_namespace_is_recognised() {
        let mapped = classify("drop", "gone", Some(26), "ns not found".to_string());
        assert_eq!(mapped, EngineError::NamespaceNotFound("gone".to_string()));
    }

    #[test]
    fn other_codes_are_backend_failures() {
        let mapped = classify("find", "events", Some(13), "unauthorized".to_string());
        assert!(matches!(mapped, EngineError::Backend { ref operation, .. } if operation == "find"));
        let mapped = classify("find", "events", None, "network".to_string());
        assert!(matches!(mapped, EngineError::Backend { .. }));
    }
}
