//! Resumable, batch-refilling cursor over one stream collection.
//!
//! A cursor yields `(position, message)` pairs in ascending or descending
//! `_id` order. It pulls one batch at a time from the engine and, when a batch
//! runs dry, queries again starting just past the last position it returned.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, Stream};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::document::{Document, Filter, FindOptions, SortOrder};
use crate::engine::{DocumentEngine, SessionId};
use crate::errors::{EngineError, EventStoreError, EventStoreResult, INVALID_REGEX_MESSAGE};
use crate::message::{Message, MessageData, MessageFactory, POSITION_KEY};
use crate::types::parse_timestamp;

/// Read direction of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending positions starting at `from_number`.
    Forward,
    /// Descending positions starting at `from_number`.
    Backward,
}

/// Everything a cursor needs to re-query its collection.
#[derive(Clone)]
pub(crate) struct CursorQuery {
    pub(crate) engine: Arc<dyn DocumentEngine>,
    pub(crate) collection: String,
    pub(crate) clauses: Vec<Filter>,
    pub(crate) session: Option<SessionId>,
    pub(crate) batch_size: usize,
    pub(crate) factory: Arc<dyn MessageFactory>,
}

/// Lazy sequence of decoded events from one stream.
pub struct StreamCursor {
    query: CursorQuery,
    direction: Direction,
    from_number: i64,
    count: Option<usize>,
    batch: VecDeque<Document>,
    batch_position: usize,
    last_batch: bool,
    yielded: usize,
    current_position: Option<i64>,
}

impl StreamCursor {
    /// Build a cursor and fetch its first batch.
    pub(crate) async fn open(
        query: CursorQuery,
        direction: Direction,
        from_number: i64,
        count: Option<usize>,
    ) -> EventStoreResult<Self> {
        let mut cursor = Self {
            query,
            direction,
            from_number,
            count,
            batch: VecDeque::new(),
            batch_position: 0,
            last_batch: false,
            yielded: 0,
            current_position: None,
        };
        cursor.rewind().await?;
        Ok(cursor)
    }

    /// Position of the most recently returned event.
    pub const fn current_position(&self) -> Option<i64> {
        self.current_position
    }

    /// Restart from `from_number`.
    pub async fn rewind(&mut self) -> EventStoreResult<()> {
        self.batch.clear();
        self.batch_position = 0;
        self.last_batch = false;
        self.yielded = 0;
        self.current_position = None;
        self.fetch_batch(self.from_number).await
    }

    /// The next event, or `None` once the window is exhausted.
    pub async fn next(&mut self) -> EventStoreResult<Option<(i64, Message)>> {
        if self.count.is_some_and(|count| self.yielded >= count) {
            return Ok(None);
        }

        if self.batch.is_empty() {
            if self.last_batch {
                return Ok(None);
            }
            let start = match (self.current_position, self.direction) {
                (None, _) => self.from_number,
                (Some(position), Direction::Forward) => position.saturating_add(1),
                (Some(position), Direction::Backward) => position.saturating_sub(1),
            };
            self.batch_position += 1;
            self.fetch_batch(start).await?;
        }

        let Some(raw) = self.batch.pop_front() else {
            return Ok(None);
        };
        let (position, message) = decode_event(raw, self.query.factory.as_ref())?;
        self.current_position = Some(position);
        self.yielded += 1;
        Ok(Some((position, message)))
    }

    /// Drain the cursor into a vector.
    pub async fn collect_all(mut self) -> EventStoreResult<Vec<(i64, Message)>> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await? {
            events.push(event);
        }
        Ok(events)
    }

    /// Drain the cursor, keeping only the messages.
    pub async fn messages(self) -> EventStoreResult<Vec<Message>> {
        Ok(self
            .collect_all()
            .await?
            .into_iter()
            .map(|(_, message)| message)
            .collect())
    }

    /// Turn the cursor into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = EventStoreResult<(i64, Message)>> + Send {
        stream::try_unfold(self, |mut cursor| async move {
            let next = cursor.next().await?;
            Ok::<_, EventStoreError>(next.map(|event| (event, cursor)))
        })
    }

    #[instrument(name = "stream_cursor.fetch_batch", skip(self), fields(collection = %self.query.collection))]
    async fn fetch_batch(&mut self, start: i64) -> EventStoreResult<()> {
        let limit = match self.count {
            Some(count) => count.saturating_sub(self.yielded).min(self.query.batch_size),
            None => self.query.batch_size,
        };
        if limit == 0 {
            self.last_batch = true;
            return Ok(());
        }

        let (bound, order) = match self.direction {
            Direction::Forward => (Filter::Gte("_id".to_string(), Value::from(start)), SortOrder::Ascending),
            Direction::Backward => (Filter::Lte("_id".to_string(), Value::from(start)), SortOrder::Descending),
        };
        let mut clauses = self.query.clauses.clone();
        clauses.push(bound);

        let options = FindOptions::new(Filter::And(clauses))
            .sort("_id", order)
            .limit(limit);
        let documents = self
            .query
            .engine
            .find(&self.query.collection, options, self.query.session)
            .await
            .map_err(|error| match error {
                EngineError::InvalidRegex(_) => {
                    EventStoreError::InvalidArgument(INVALID_REGEX_MESSAGE.to_string())
                }
                other => EventStoreError::Engine(other),
            })?;

        debug!(
            start,
            fetched = documents.len(),
            batch = self.batch_position,
            "[stream_cursor.fetch_batch] fetched batch"
        );
        self.last_batch = documents.len() < limit;
        self.batch = documents.into();
        Ok(())
    }
}

impl std::fmt::Debug for StreamCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCursor")
            .field("collection", &self.query.collection)
            .field("direction", &self.direction)
            .field("from_number", &self.from_number)
            .field("count", &self.count)
            .field("current_position", &self.current_position)
            .finish_non_exhaustive()
    }
}

/// Decode a stored event document into its position and message.
///
/// `_position` is injected into the metadata only when the event does not
/// carry one already.
pub fn decode_event(
    mut raw: Document,
    factory: &dyn MessageFactory,
) -> EventStoreResult<(i64, Message)> {
    let position = raw
        .get("_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| EventStoreError::Serialization("stored event has no integer _id".to_string()))?;

    let uuid = string_field(&raw, "event_id")?;
    let uuid = Uuid::parse_str(uuid)
        .map_err(|e| EventStoreError::Serialization(format!("invalid event_id {uuid:?}: {e}")))?;
    let message_name = string_field(&raw, "event_name")?.to_string();
    let created_at = parse_timestamp(string_field(&raw, "created_at")?)?;

    let payload = object_field(&mut raw, "payload");
    let mut metadata = object_field(&mut raw, "metadata");
    metadata
        .entry(POSITION_KEY.to_string())
        .or_insert_with(|| Value::from(position));

    let message = factory.create_message_from_array(
        &message_name,
        MessageData {
            uuid,
            message_name: message_name.clone(),
            payload,
            metadata,
            created_at,
        },
    )?;
    Ok((position, message))
}

fn string_field<'a>(raw: &'a Document, field: &str) -> EventStoreResult<&'a str> {
    raw.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EventStoreError::Serialization(format!("stored event has no string {field}")))
}

fn object_field(raw: &mut Document, field: &str) -> Document {
    match raw.remove(field) {
        Some(Value::Object(map)) => map,
        _ => Document::new(),
    }
}
