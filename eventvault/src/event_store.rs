//! Event store abstraction and its document database implementation.
//!
//! [`DocumentEventStore`] keeps one physical collection per stream (named by
//! the configured [`PersistenceStrategy`]), a registry row per stream in the
//! event streams collection, and a sequence counter document per collection
//! for counter-based strategies.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::collections::{Collections, DEFAULT_COUNTER_COLLECTION, DEFAULT_EVENT_STREAMS_COLLECTION};
use crate::document::{DistinctQuery, Document, Filter, FindOptions, SortOrder, Update};
use crate::engine::{DocumentEngine, SessionId};
use crate::errors::{EngineError, EventStoreError, EventStoreResult, INVALID_REGEX_MESSAGE};
use crate::message::{DefaultMessageFactory, Message, MessageFactory};
use crate::metadata::{compile_clauses, MetadataMatcher};
use crate::strategy::PersistenceStrategy;
use crate::stream_cursor::{CursorQuery, Direction, StreamCursor};
use crate::types::{category_of, StreamName};

/// A stream to create: its name, registry metadata and initial events.
#[derive(Debug, Clone)]
pub struct Stream {
    /// Logical stream name.
    pub name: StreamName,
    /// Initial events, appended right after creation.
    pub events: Vec<Message>,
    /// Free-form stream metadata stored in the registry.
    pub metadata: Document,
}

impl Stream {
    /// A stream with initial events and no metadata.
    pub fn new(name: StreamName, events: Vec<Message>) -> Self {
        Self {
            name,
            events,
            metadata: Document::new(),
        }
    }

    /// Attach registry metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Document) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Document database internals exposed by a store.
///
/// Projection components need the engine, the naming strategy and the
/// registry collection, not just the [`EventStore`] operations. Stores that
/// wrap another store forward this from the inner store.
#[derive(Clone)]
pub struct DocumentBackend {
    /// Engine holding every collection.
    pub engine: Arc<dyn DocumentEngine>,
    /// Strategy naming physical collections.
    pub strategy: Arc<dyn PersistenceStrategy>,
    /// Factory decoding stored events.
    pub message_factory: Arc<dyn MessageFactory>,
    /// Name of the stream registry collection.
    pub event_streams_collection: String,
}

impl fmt::Debug for DocumentBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentBackend")
            .field("event_streams_collection", &self.event_streams_collection)
            .finish_non_exhaustive()
    }
}

/// Stream lifecycle and query operations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create a stream and append its initial events.
    async fn create(&self, stream: Stream) -> EventStoreResult<()>;

    /// Append events to an existing stream. Empty batches are no-ops.
    async fn append_to(&self, stream_name: &StreamName, events: Vec<Message>)
        -> EventStoreResult<()>;

    /// Events with position `>= from_number`, ascending.
    async fn load(
        &self,
        stream_name: &StreamName,
        from_number: i64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> EventStoreResult<StreamCursor>;

    /// Events with position `<= from_number` (default: all), descending.
    async fn load_reverse(
        &self,
        stream_name: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> EventStoreResult<StreamCursor>;

    /// Remove the registry row and drop the stream collection.
    async fn delete(&self, stream_name: &StreamName) -> EventStoreResult<()>;

    /// Whether the stream is registered.
    async fn has_stream(&self, stream_name: &StreamName) -> EventStoreResult<bool>;

    /// Registry metadata of a stream.
    async fn fetch_stream_metadata(&self, stream_name: &StreamName) -> EventStoreResult<Document>;

    /// Replace the registry metadata of a stream.
    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: Document,
    ) -> EventStoreResult<()>;

    /// Stream names equal to `filter` (or all), sorted.
    async fn fetch_stream_names(
        &self,
        filter: Option<&str>,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<StreamName>>;

    /// Stream names matching a regular expression, sorted.
    async fn fetch_stream_names_regex(
        &self,
        filter: &str,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<StreamName>>;

    /// Distinct categories equal to `filter` (or all), sorted.
    async fn fetch_category_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<String>>;

    /// Distinct categories matching a regular expression, sorted.
    async fn fetch_category_names_regex(
        &self,
        filter: &str,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<String>>;

    /// Document database internals, if this store is backed by one.
    fn document_backend(&self) -> Option<DocumentBackend> {
        None
    }
}

/// Stores that can scope writes in a transaction.
#[async_trait]
pub trait TransactionalEventStore: EventStore {
    /// Open a transaction. Nested transactions are rejected.
    async fn begin_transaction(&self) -> EventStoreResult<()>;

    /// Commit the open transaction.
    async fn commit(&self) -> EventStoreResult<()>;

    /// Abort the open transaction and drop collections it created.
    async fn rollback(&self) -> EventStoreResult<()>;

    /// Whether a transaction is open.
    fn in_transaction(&self) -> bool;
}

/// Configuration for [`DocumentEventStore`].
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Page size used by stream cursors (default: 10000).
    pub load_batch_size: usize,
    /// Stream registry collection (default: `event_streams`).
    pub event_streams_collection: String,
    /// Sequence counter collection (default: `counter`).
    pub counter_collection: String,
    /// Turn transaction operations into no-ops for engines without
    /// multi-document transactions (default: false).
    pub disable_transaction_handling: bool,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            load_batch_size: 10_000,
            event_streams_collection: DEFAULT_EVENT_STREAMS_COLLECTION.to_string(),
            counter_collection: DEFAULT_COUNTER_COLLECTION.to_string(),
            disable_transaction_handling: false,
        }
    }
}

impl EventStoreConfig {
    /// Set the cursor page size.
    #[must_use]
    pub const fn with_load_batch_size(mut self, load_batch_size: usize) -> Self {
        self.load_batch_size = load_batch_size;
        self
    }

    /// Set the stream registry collection name.
    #[must_use]
    pub fn with_event_streams_collection(mut self, name: impl Into<String>) -> Self {
        self.event_streams_collection = name.into();
        self
    }

    /// Set the counter collection name.
    #[must_use]
    pub fn with_counter_collection(mut self, name: impl Into<String>) -> Self {
        self.counter_collection = name.into();
        self
    }

    /// Disable transaction handling.
    #[must_use]
    pub const fn with_transactions_disabled(mut self) -> Self {
        self.disable_transaction_handling = true;
        self
    }
}

/// Engine operation names used in logs.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Create,
    Append,
    Load,
    Delete,
    Query,
    Transaction,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Append => "append_to",
            Self::Load => "load",
            Self::Delete => "delete",
            Self::Query => "query",
            Self::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

fn map_engine_error(error: EngineError, operation: Operation) -> EventStoreError {
    if let EngineError::InvalidRegex(detail) = &error {
        debug!(%detail, "[event_store.invalid_regex] engine rejected regex");
        return EventStoreError::InvalidArgument(INVALID_REGEX_MESSAGE.to_string());
    }

    error!(
        error = %error,
        operation = %operation,
        "[event_store.engine_error] engine operation failed"
    );
    EventStoreError::Engine(error)
}

#[derive(Debug, Default)]
struct TransactionState {
    session: Option<SessionId>,
    created_collections: Vec<String>,
}

/// Event store on top of a [`DocumentEngine`].
pub struct DocumentEventStore {
    collections: Collections,
    strategy: Arc<dyn PersistenceStrategy>,
    message_factory: Arc<dyn MessageFactory>,
    config: EventStoreConfig,
    transaction: Mutex<TransactionState>,
}

impl DocumentEventStore {
    /// Store with default configuration.
    pub fn new(engine: Arc<dyn DocumentEngine>, strategy: Arc<dyn PersistenceStrategy>) -> Self {
        Self::build(engine, strategy, EventStoreConfig::default())
    }

    /// Store with custom configuration.
    pub fn with_config(
        engine: Arc<dyn DocumentEngine>,
        strategy: Arc<dyn PersistenceStrategy>,
        config: EventStoreConfig,
    ) -> EventStoreResult<Self> {
        if config.load_batch_size == 0 {
            return Err(EventStoreError::Configuration(
                "load_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(Self::build(engine, strategy, config))
    }

    fn build(
        engine: Arc<dyn DocumentEngine>,
        strategy: Arc<dyn PersistenceStrategy>,
        config: EventStoreConfig,
    ) -> Self {
        let collections = Collections::new(engine)
            .with_event_streams(config.event_streams_collection.clone())
            .with_counter(config.counter_collection.clone());
        Self {
            collections,
            strategy,
            message_factory: Arc::new(DefaultMessageFactory),
            config,
            transaction: Mutex::new(TransactionState::default()),
        }
    }

    /// Use a custom message factory when decoding events.
    #[must_use]
    pub fn with_message_factory(mut self, factory: Arc<dyn MessageFactory>) -> Self {
        self.message_factory = factory;
        self
    }

    /// The store configuration.
    pub const fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Collection accessor bound to this store's engine.
    pub const fn collections(&self) -> &Collections {
        &self.collections
    }

    /// Run `work` inside a transaction: commit on success, roll back and
    /// return the error on failure.
    pub async fn transactional<T, F>(&self, work: F) -> EventStoreResult<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, EventStoreResult<T>> + Send,
    {
        self.begin_transaction().await?;
        match work(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = self.rollback().await {
                    warn!(
                        error = %rollback_error,
                        "[event_store.transactional] rollback after failure also failed"
                    );
                }
                Err(error)
            }
        }
    }

    fn engine(&self) -> &Arc<dyn DocumentEngine> {
        self.collections.engine()
    }

    fn session(&self) -> Option<SessionId> {
        if self.config.disable_transaction_handling {
            return None;
        }
        self.transaction.lock().session
    }

    fn collection_name(&self, stream_name: &StreamName) -> String {
        self.strategy.generate_collection_name(stream_name)
    }

    fn counter_filter(collection_name: &str) -> Filter {
        Filter::eq("_id", collection_name)
    }

    async fn create_schema_for(
        &self,
        stream_name: &StreamName,
        collection_name: &str,
    ) -> EventStoreResult<()> {
        if self.strategy.uses_sequence_counter() {
            let mut counter = Document::new();
            counter.insert("_id".to_string(), Value::from(collection_name));
            counter.insert("seq".to_string(), Value::from(1));
            match self
                .engine()
                .insert_one(self.collections.counter().name(), counter, None)
                .await
            {
                Ok(()) => {}
                Err(EngineError::DuplicateKey { .. }) => {
                    return Err(EventStoreError::StreamExistsAlready(stream_name.to_string()));
                }
                Err(other) => return Err(map_engine_error(other, Operation::Create)),
            }
        }

        let existed = self
            .engine()
            .collection_exists(collection_name)
            .await
            .map_err(|e| map_engine_error(e, Operation::Create))?;
        let schema = self.strategy.create_schema(collection_name);
        self.engine()
            .create_indexes(collection_name, &schema, None)
            .await
            .map_err(|e| map_engine_error(e, Operation::Create))?;

        // Rollback must never drop a collection that belongs to an older stream.
        let mut transaction = self.transaction.lock();
        if transaction.session.is_some() && !existed {
            transaction.created_collections.push(collection_name.to_string());
        }
        Ok(())
    }

    async fn add_stream_to_registry(
        &self,
        stream: &Stream,
        collection_name: &str,
    ) -> EventStoreResult<()> {
        let mut row = Document::new();
        row.insert("real_stream_name".to_string(), Value::from(stream.name.as_str()));
        row.insert("stream_name".to_string(), Value::from(collection_name));
        row.insert("metadata".to_string(), Value::Object(stream.metadata.clone()));
        row.insert(
            "category".to_string(),
            category_of(stream.name.as_ref()).map_or(Value::Null, Value::from),
        );

        match self
            .engine()
            .insert_one(self.collections.event_streams().name(), row, self.session())
            .await
        {
            Ok(()) => Ok(()),
            Err(EngineError::DuplicateKey { .. }) => {
                Err(EventStoreError::StreamExistsAlready(stream.name.to_string()))
            }
            Err(other) => Err(map_engine_error(other, Operation::Create)),
        }
    }

    async fn discard_physical_stream(&self, collection_name: &str) {
        if let Err(error) = self.engine().drop_collection(collection_name, None).await {
            warn!(%error, collection = collection_name, "[event_store.cleanup] failed to drop collection");
        }
        if self.strategy.uses_sequence_counter() {
            if let Err(error) = self
                .engine()
                .delete_one(
                    self.collections.counter().name(),
                    Self::counter_filter(collection_name),
                    None,
                )
                .await
            {
                warn!(%error, collection = collection_name, "[event_store.cleanup] failed to remove counter");
            }
        }
    }

    async fn next_sequence(
        &self,
        stream_name: &StreamName,
        collection_name: &str,
        count: usize,
    ) -> EventStoreResult<i64> {
        let increment = i64::try_from(count)
            .map_err(|_| EventStoreError::InvalidArgument("too many events in one append".to_string()))?;
        let counter = self
            .engine()
            .find_one_and_update(
                self.collections.counter().name(),
                Self::counter_filter(collection_name),
                Update::inc("seq", increment),
                None,
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Append))?;

        let Some(seq) = counter.and_then(|doc| doc.get("seq").and_then(Value::as_i64)) else {
            error!(
                stream = %stream_name,
                "[event_store.next_sequence] sequence counter is missing"
            );
            return Err(EventStoreError::StreamNotFound(stream_name.to_string()));
        };
        Ok(seq - increment)
    }

    async fn open_cursor(
        &self,
        stream_name: &StreamName,
        direction: Direction,
        from_number: i64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> EventStoreResult<StreamCursor> {
        let collection_name = self.collection_name(stream_name);
        let registered = self
            .engine()
            .find(
                self.collections.event_streams().name(),
                FindOptions::new(Filter::eq("stream_name", collection_name.as_str()))
                    .projection(["stream_name"])
                    .limit(1),
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Load))?;
        if registered.is_empty() {
            return Err(EventStoreError::StreamNotFound(stream_name.to_string()));
        }

        let query = CursorQuery {
            engine: Arc::clone(self.engine()),
            collection: collection_name,
            clauses: compile_clauses(matcher),
            session: self.session(),
            batch_size: self.config.load_batch_size,
            factory: Arc::clone(&self.message_factory),
        };
        StreamCursor::open(query, direction, from_number, count).await
    }

    async fn find_stream_names(
        &self,
        clauses: Vec<Filter>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<StreamName>> {
        let rows = self
            .engine()
            .find(
                self.collections.event_streams().name(),
                FindOptions::new(Filter::And(clauses))
                    .projection(["real_stream_name"])
                    .sort("real_stream_name", SortOrder::Ascending)
                    .skip(offset)
                    .limit(limit),
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Query))?;

        rows.iter()
            .map(|row| {
                let raw = row
                    .get("real_stream_name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        EventStoreError::Serialization("registry row without real_stream_name".to_string())
                    })?;
                StreamName::try_new(raw.to_string())
                    .map_err(|e| EventStoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    async fn find_category_names(
        &self,
        filter: Filter,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<String>> {
        let values = self
            .engine()
            .distinct_values(
                self.collections.event_streams().name(),
                DistinctQuery {
                    filter,
                    field: "category".to_string(),
                    skip: offset,
                    limit,
                },
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Query))?;

        Ok(values
            .into_iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect())
    }
}

fn check_limit(limit: usize) -> EventStoreResult<()> {
    if limit == 0 {
        return Err(EventStoreError::InvalidArgument(
            "limit must be a positive number".to_string(),
        ));
    }
    Ok(())
}

/// Reject patterns that fail to compile. Lookaround and backreferences are
/// accepted, matching what the document database's PCRE engine allows.
pub(crate) fn check_regex(pattern: &str) -> EventStoreResult<()> {
    fancy_regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|_| EventStoreError::InvalidArgument(INVALID_REGEX_MESSAGE.to_string()))
}

#[async_trait]
impl EventStore for DocumentEventStore {
    #[instrument(name = "event_store.create", skip(self, stream), fields(stream = %stream.name, event_count = stream.events.len()))]
    async fn create(&self, stream: Stream) -> EventStoreResult<()> {
        let collection_name = self.collection_name(&stream.name);

        let setup = match self.create_schema_for(&stream.name, &collection_name).await {
            Ok(()) => self.add_stream_to_registry(&stream, &collection_name).await,
            Err(error) => Err(error),
        };

        match setup {
            Ok(()) => {}
            Err(EventStoreError::StreamExistsAlready(name)) => {
                warn!(stream = %name, "[event_store.create] stream already exists");
                return Err(EventStoreError::StreamExistsAlready(name));
            }
            Err(error) => {
                self.discard_physical_stream(&collection_name).await;
                if let Err(cleanup) = self
                    .engine()
                    .delete_one(
                        self.collections.event_streams().name(),
                        Filter::eq("real_stream_name", stream.name.as_str()),
                        self.session(),
                    )
                    .await
                {
                    warn!(error = %cleanup, "[event_store.create] failed to remove registry row");
                }
                return Err(error);
            }
        }

        info!(collection = %collection_name, "[event_store.create] stream created");
        self.append_to(&stream.name, stream.events).await
    }

    #[instrument(name = "event_store.append_to", skip(self, events), fields(stream = %stream_name, event_count = events.len()))]
    async fn append_to(
        &self,
        stream_name: &StreamName,
        events: Vec<Message>,
    ) -> EventStoreResult<()> {
        let collection_name = self.collection_name(stream_name);
        let exists = self
            .engine()
            .collection_exists(&collection_name)
            .await
            .map_err(|e| map_engine_error(e, Operation::Append))?;
        if !exists {
            return Err(EventStoreError::StreamNotFound(stream_name.to_string()));
        }
        if events.is_empty() {
            return Ok(());
        }

        let mut next_sequence = if self.strategy.uses_sequence_counter() {
            self.next_sequence(stream_name, &collection_name, events.len())
                .await?
        } else {
            0
        };
        let data = self.strategy.prepare_data(&events, &mut next_sequence)?;
        if data.is_empty() {
            return Ok(());
        }

        match self
            .engine()
            .insert_many(&collection_name, data, self.session())
            .await
        {
            Ok(()) => {
                debug!("[event_store.append_to] events appended");
                Ok(())
            }
            Err(EngineError::DuplicateKey { detail, .. }) => {
                warn!(
                    stream = %stream_name,
                    %detail,
                    "[event_store.concurrency_conflict] aggregate or event ids already used"
                );
                Err(EventStoreError::ConcurrencyConflict {
                    stream: stream_name.to_string(),
                    detail,
                })
            }
            Err(other) => Err(map_engine_error(other, Operation::Append)),
        }
    }

    #[instrument(name = "event_store.load", skip(self, matcher), fields(stream = %stream_name))]
    async fn load(
        &self,
        stream_name: &StreamName,
        from_number: i64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> EventStoreResult<StreamCursor> {
        self.open_cursor(stream_name, Direction::Forward, from_number, count, matcher)
            .await
    }

    #[instrument(name = "event_store.load_reverse", skip(self, matcher), fields(stream = %stream_name))]
    async fn load_reverse(
        &self,
        stream_name: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> EventStoreResult<StreamCursor> {
        self.open_cursor(
            stream_name,
            Direction::Backward,
            from_number.unwrap_or(i64::MAX),
            count,
            matcher,
        )
        .await
    }

    #[instrument(name = "event_store.delete", skip(self), fields(stream = %stream_name))]
    async fn delete(&self, stream_name: &StreamName) -> EventStoreResult<()> {
        let collection_name = self.collection_name(stream_name);
        let deleted = self
            .engine()
            .delete_one(
                self.collections.event_streams().name(),
                Filter::eq("real_stream_name", stream_name.as_str()),
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Delete))?;

        if deleted != 1 {
            // Leftovers of an interrupted delete are removed before reporting.
            let orphaned = self
                .engine()
                .collection_exists(&collection_name)
                .await
                .map_err(|e| map_engine_error(e, Operation::Delete))?;
            if orphaned {
                warn!(collection = %collection_name, "[event_store.delete] removing orphaned collection");
                self.discard_physical_stream(&collection_name).await;
            }
            return Err(EventStoreError::StreamNotFound(stream_name.to_string()));
        }

        self.engine()
            .drop_collection(&collection_name, None)
            .await
            .map_err(|e| map_engine_error(e, Operation::Delete))?;
        if self.strategy.uses_sequence_counter() {
            self.engine()
                .delete_one(
                    self.collections.counter().name(),
                    Self::counter_filter(&collection_name),
                    None,
                )
                .await
                .map_err(|e| map_engine_error(e, Operation::Delete))?;
        }
        info!("[event_store.delete] stream deleted");
        Ok(())
    }

    #[instrument(name = "event_store.has_stream", skip(self), fields(stream = %stream_name))]
    async fn has_stream(&self, stream_name: &StreamName) -> EventStoreResult<bool> {
        let count = self
            .engine()
            .count_documents(
                self.collections.event_streams().name(),
                Filter::eq("real_stream_name", stream_name.as_str()),
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Query))?;
        Ok(count == 1)
    }

    #[instrument(name = "event_store.fetch_stream_metadata", skip(self), fields(stream = %stream_name))]
    async fn fetch_stream_metadata(&self, stream_name: &StreamName) -> EventStoreResult<Document> {
        let row = self
            .engine()
            .find_one(
                self.collections.event_streams().name(),
                Filter::eq("real_stream_name", stream_name.as_str()),
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Query))?
            .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.to_string()))?;

        match row.get("metadata") {
            Some(Value::Object(metadata)) => Ok(metadata.clone()),
            _ => Ok(Document::new()),
        }
    }

    #[instrument(name = "event_store.update_stream_metadata", skip(self, metadata), fields(stream = %stream_name))]
    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: Document,
    ) -> EventStoreResult<()> {
        let outcome = self
            .engine()
            .update_one(
                self.collections.event_streams().name(),
                Filter::eq("real_stream_name", stream_name.as_str()),
                Update::set("metadata", Value::Object(metadata)),
                self.session(),
            )
            .await
            .map_err(|e| map_engine_error(e, Operation::Query))?;

        if outcome.matched != 1 {
            return Err(EventStoreError::StreamNotFound(stream_name.to_string()));
        }
        Ok(())
    }

    #[instrument(name = "event_store.fetch_stream_names", skip(self, matcher))]
    async fn fetch_stream_names(
        &self,
        filter: Option<&str>,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<StreamName>> {
        check_limit(limit)?;
        let mut clauses = compile_clauses(matcher);
        if let Some(name) = filter {
            clauses.push(Filter::eq("real_stream_name", name));
        }
        self.find_stream_names(clauses, limit, offset).await
    }

    #[instrument(name = "event_store.fetch_stream_names_regex", skip(self, matcher))]
    async fn fetch_stream_names_regex(
        &self,
        filter: &str,
        matcher: Option<&MetadataMatcher>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<StreamName>> {
        check_limit(limit)?;
        check_regex(filter)?;
        let mut clauses = compile_clauses(matcher);
        clauses.push(Filter::Regex("real_stream_name".to_string(), filter.to_string()));
        self.find_stream_names(clauses, limit, offset).await
    }

    #[instrument(name = "event_store.fetch_category_names", skip(self))]
    async fn fetch_category_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<String>> {
        check_limit(limit)?;
        let filter = match filter {
            Some(category) => Filter::eq("category", category),
            None => Filter::Ne("category".to_string(), Value::Null),
        };
        self.find_category_names(filter, limit, offset).await
    }

    #[instrument(name = "event_store.fetch_category_names_regex", skip(self))]
    async fn fetch_category_names_regex(
        &self,
        filter: &str,
        limit: usize,
        offset: usize,
    ) -> EventStoreResult<Vec<String>> {
        check_limit(limit)?;
        check_regex(filter)?;
        self.find_category_names(
            Filter::Regex("category".to_string(), filter.to_string()),
            limit,
            offset,
        )
        .await
    }

    fn document_backend(&self) -> Option<DocumentBackend> {
        Some(DocumentBackend {
            engine: Arc::clone(self.engine()),
            strategy: Arc::clone(&self.strategy),
            message_factory: Arc::clone(&self.message_factory),
            event_streams_collection: self.config.event_streams_collection.clone(),
        })
    }
}

#[async_trait]
impl TransactionalEventStore for DocumentEventStore {
    #[instrument(name = "event_store.begin_transaction", skip(self))]
    async fn begin_transaction(&self) -> EventStoreResult<()> {
        if self.config.disable_transaction_handling {
            return Ok(());
        }
        if self.transaction.lock().session.is_some() {
            return Err(EventStoreError::TransactionAlreadyStarted);
        }

        let session = self
            .engine()
            .start_transaction()
            .await
            .map_err(|e| map_engine_error(e, Operation::Transaction))?;

        let raced = {
            let mut transaction = self.transaction.lock();
            if transaction.session.is_some() {
                true
            } else {
                transaction.session = Some(session);
                transaction.created_collections.clear();
                false
            }
        };
        if raced {
            if let Err(error) = self.engine().abort_transaction(session).await {
                warn!(%error, "[event_store.begin_transaction] failed to abort surplus session");
            }
            return Err(EventStoreError::TransactionAlreadyStarted);
        }
        debug!(%session, "[event_store.begin_transaction] transaction started");
        Ok(())
    }

    #[instrument(name = "event_store.commit", skip(self))]
    async fn commit(&self) -> EventStoreResult<()> {
        if self.config.disable_transaction_handling {
            return Ok(());
        }
        let session = {
            let mut transaction = self.transaction.lock();
            let session = transaction
                .session
                .take()
                .ok_or(EventStoreError::TransactionNotStarted)?;
            transaction.created_collections.clear();
            session
        };

        self.engine()
            .commit_transaction(session)
            .await
            .map_err(|e| map_engine_error(e, Operation::Transaction))?;
        debug!(%session, "[event_store.commit] transaction committed");
        Ok(())
    }

    #[instrument(name = "event_store.rollback", skip(self))]
    async fn rollback(&self) -> EventStoreResult<()> {
        if self.config.disable_transaction_handling {
            return Ok(());
        }
        let (session, created) = {
            let mut transaction = self.transaction.lock();
            let session = transaction
                .session
                .take()
                .ok_or(EventStoreError::TransactionNotStarted)?;
            (session, std::mem::take(&mut transaction.created_collections))
        };

        self.engine()
            .abort_transaction(session)
            .await
            .map_err(|e| map_engine_error(e, Operation::Transaction))?;

        for collection_name in &created {
            self.discard_physical_stream(collection_name).await;
        }
        debug!(
            %session,
            dropped = created.len(),
            "[event_store.rollback] transaction rolled back"
        );
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.lock().session.is_some()
    }
}

impl fmt::Debug for DocumentEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentEventStore")
            .field("collections", &self.collections)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
