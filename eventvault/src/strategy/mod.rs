//! Persistence strategies.
//!
//! A strategy decides how messages are encoded into stored documents, which
//! unique indexes guard a stream collection, where sequence numbers come
//! from and how a logical stream name maps to a physical collection name.
//!
//! | strategy | `_id` source | unique indexes |
//! |----------|--------------|----------------|
//! | [`AggregateStreamStrategy`] | `metadata._aggregate_version` | `metadata._aggregate_version` |
//! | [`SingleStreamStrategy`] | sequence counter | aggregate type/id/version, `event_id` |
//! | [`SimpleStreamStrategy`] | sequence counter | `event_id` |

mod aggregate;
mod simple;
mod single;

pub use aggregate::AggregateStreamStrategy;
pub use simple::SimpleStreamStrategy;
pub use single::SingleStreamStrategy;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::document::{Document, IndexSpec};
use crate::errors::EventStoreResult;
use crate::message::{Message, MessageData};
use crate::types::{format_timestamp, StreamName};

/// Stored document fields besides `_id`, in storage order.
pub const COLUMN_NAMES: [&str; 5] = ["event_id", "event_name", "payload", "metadata", "created_at"];

/// Encoding and sequencing policy for stream collections.
pub trait PersistenceStrategy: Send + Sync {
    /// Indexes to create on a new stream collection.
    fn create_schema(&self, collection_name: &str) -> Vec<IndexSpec>;

    /// Stored fields besides `_id`.
    fn column_names(&self) -> &'static [&'static str] {
        &COLUMN_NAMES
    }

    /// Encode `events`. Counter-based strategies assign `_id` from
    /// `next_sequence` and advance it by one per event.
    fn prepare_data(
        &self,
        events: &[Message],
        next_sequence: &mut i64,
    ) -> EventStoreResult<Vec<Document>>;

    /// Physical collection holding `stream_name`.
    fn generate_collection_name(&self, stream_name: &StreamName) -> String {
        hashed_collection_name(stream_name.as_ref())
    }

    /// Whether `_id` values are reserved from the shared sequence counter.
    fn uses_sequence_counter(&self) -> bool {
        true
    }
}

/// `_` followed by the hex SHA-256 digest of the stream name.
pub fn hashed_collection_name(stream_name: &str) -> String {
    let digest = Sha256::digest(stream_name.as_bytes());
    format!("_{}", hex::encode(digest))
}

fn encode(data: MessageData, id: i64) -> Document {
    let mut document = Document::new();
    document.insert("_id".to_string(), Value::from(id));
    document.insert("event_id".to_string(), Value::String(data.uuid.to_string()));
    document.insert("event_name".to_string(), Value::String(data.message_name));
    document.insert("payload".to_string(), Value::Object(data.payload));
    document.insert("metadata".to_string(), Value::Object(data.metadata));
    document.insert(
        "created_at".to_string(),
        Value::String(format_timestamp(&data.created_at)),
    );
    document
}
