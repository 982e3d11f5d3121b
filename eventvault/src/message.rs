//! Domain messages and their storage shape.
//!
//! A [`Message`] is what callers append and what cursors yield. The
//! [`MessageConverter`] turns it into [`MessageData`] on the write path and
//! the [`MessageFactory`] turns stored [`MessageData`] back into a message.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::Document;
use crate::errors::{EventStoreError, EventStoreResult};
use crate::types::now_micros;

/// Metadata key holding the stored sequence number of an event.
pub const POSITION_KEY: &str = "_position";
/// Metadata key holding the aggregate version.
pub const AGGREGATE_VERSION_KEY: &str = "_aggregate_version";
/// Metadata key holding the aggregate id.
pub const AGGREGATE_ID_KEY: &str = "_aggregate_id";
/// Metadata key holding the aggregate type.
pub const AGGREGATE_TYPE_KEY: &str = "_aggregate_type";

/// An immutable domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    uuid: Uuid,
    message_name: String,
    payload: Document,
    metadata: Document,
    created_at: DateTime<Utc>,
}

impl Message {
    /// A new message with a fresh id and the current time.
    pub fn new(message_name: impl Into<String>, payload: Document) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            message_name: message_name.into(),
            payload,
            metadata: Document::new(),
            created_at: now_micros(),
        }
    }

    /// A new message whose payload is the serialized form of `payload`.
    ///
    /// The payload must serialize to a JSON object.
    pub fn with_payload<T: Serialize>(
        message_name: impl Into<String>,
        payload: &T,
    ) -> EventStoreResult<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self::new(message_name, map)),
            other => Err(EventStoreError::Serialization(format!(
                "message payload must be an object, got {other}"
            ))),
        }
    }

    /// Rebuild a message from all of its parts.
    pub fn from_parts(
        uuid: Uuid,
        message_name: impl Into<String>,
        payload: Document,
        metadata: Document,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid,
            message_name: message_name.into(),
            payload,
            metadata,
            created_at: created_at.trunc_subsecs(6),
        }
    }

    /// Event id.
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Event type name.
    pub fn message_name(&self) -> &str {
        &self.message_name
    }

    /// Event payload.
    pub const fn payload(&self) -> &Document {
        &self.payload
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> EventStoreResult<T> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    /// Event metadata.
    pub const fn metadata(&self) -> &Document {
        &self.metadata
    }

    /// Creation time, microsecond precision.
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// A copy of this message with one more metadata entry.
    #[must_use]
    pub fn with_added_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `_aggregate_version` metadata, if it is an integer.
    pub fn aggregate_version(&self) -> Option<i64> {
        self.metadata.get(AGGREGATE_VERSION_KEY).and_then(Value::as_i64)
    }

    /// `_position` metadata injected on read, if present.
    pub fn position(&self) -> Option<i64> {
        self.metadata.get(POSITION_KEY).and_then(Value::as_i64)
    }
}

/// Storage shape of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageData {
    /// Event id.
    pub uuid: Uuid,
    /// Event type name.
    pub message_name: String,
    /// Event payload.
    pub payload: Document,
    /// Event metadata.
    pub metadata: Document,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Builds messages from their storage shape.
pub trait MessageFactory: Send + Sync {
    /// Create a message of type `message_name` from stored data.
    fn create_message_from_array(
        &self,
        message_name: &str,
        data: MessageData,
    ) -> EventStoreResult<Message>;
}

/// Converts messages into their storage shape.
pub trait MessageConverter: Send + Sync {
    /// Flatten a message for storage.
    fn convert_to_array(&self, message: &Message) -> MessageData;
}

/// Factory producing plain [`Message`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessageFactory;

impl MessageFactory for DefaultMessageFactory {
    fn create_message_from_array(
        &self,
        message_name: &str,
        data: MessageData,
    ) -> EventStoreResult<Message> {
        Ok(Message::from_parts(
            data.uuid,
            message_name,
            data.payload,
            data.metadata,
            data.created_at,
        ))
    }
}

/// Converter reading the fields of a [`Message`] directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessageConverter;

impl MessageConverter for DefaultMessageConverter {
    fn convert_to_array(&self, message: &Message) -> MessageData {
        MessageData {
            uuid: message.uuid(),
            message_name: message.message_name().to_string(),
            payload: message.payload().clone(),
            metadata: message.metadata().clone(),
            created_at: message.created_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct UserCreated {
        name: String,
    }

    #[test]
    fn typed_payloads_roundtrip() {
        let message = Message::with_payload(
            "UserCreated",
            &UserCreated {
                name: "Alex".to_string(),
            },
        )
        .unwrap();
        assert_eq!(message.payload().get("name"), Some(&json!("Alex")));
        let back: UserCreated = message.payload_as().unwrap();
        assert_eq!(back.name, "Alex");
    }

    #[test]
    fn scalar_payloads_are_rejected() {
        assert!(matches!(
            Message::with_payload("Counted", &5),
            Err(EventStoreError::Serialization(_))
        ));
    }

    #[test]
    fn aggregate_version_reads_metadata() {
        let message =
            Message::new("UserCreated", Document::new()).with_added_metadata(AGGREGATE_VERSION_KEY, 7);
        assert_eq!(message.aggregate_version(), Some(7));
        assert_eq!(message.position(), None);
    }

    #[test]
    fn default_converter_and_factory_are_inverse() {
        let message = Message::new("Ping", Document::new()).with_added_metadata("trace", "abc");
        let data = DefaultMessageConverter.convert_to_array(&message);
        let rebuilt = DefaultMessageFactory
            .create_message_from_array(&data.message_name.clone(), data)
            .unwrap();
        assert_eq!(rebuilt, message);
    }
}
