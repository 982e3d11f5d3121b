use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::collections::DEFAULT_PROJECTIONS_COLLECTION;
use crate::document::{ChangeOperation, Document, Filter, FindOptions, Update};
use crate::engine::ChangeFeed;
use crate::errors::{EventStoreError, ProjectionError, ProjectionResult};
use crate::event_store::{DocumentBackend, EventStore, Stream};
use crate::message::Message;
use crate::stream_cursor::{decode_event, StreamCursor};
use crate::types::{format_timestamp, now_micros, ProjectionName, StreamName};

use super::cache::StreamNameCache;
use super::context::{ContextAction, HandlerContext};
use super::lock::{lock_until, should_update_lock};
use super::position::{is_already_processed, GapTracker, StreamPositions};
use super::status::ProjectionStatus;

/// Event handler: receives the current state, the event and a context, and
/// returns the new state or `None` to keep the current one.
pub type Handler =
    Box<dyn Fn(&Document, &Message, &mut HandlerContext) -> Option<Document> + Send + Sync>;

/// Produces the initial projection state.
pub type InitCallback = Box<dyn Fn() -> Document + Send + Sync>;

/// Box a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Document, &Message, &mut HandlerContext) -> Option<Document> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Tuning knobs of a [`Projector`].
#[derive(Debug, Clone)]
pub struct ProjectorOptions {
    /// Lifetime of the projection lock (default: 1 second).
    pub lock_timeout: Duration,
    /// Capacity of the stream existence cache used by `link_to` (default: 1000).
    pub cache_size: usize,
    /// Handled events between checkpoints during catch-up (default: 1000).
    pub persist_block_size: usize,
    /// Idle sleep between polls (default: 100 ms).
    pub sleep: Duration,
    /// Minimum time between idle lock renewals; zero renews on every poll.
    pub update_lock_threshold: Duration,
    /// Projections collection (default: `projections`).
    pub projections_collection: String,
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(1000),
            cache_size: 1000,
            persist_block_size: 1000,
            sleep: Duration::from_millis(100),
            update_lock_threshold: Duration::ZERO,
            projections_collection: DEFAULT_PROJECTIONS_COLLECTION.to_string(),
        }
    }
}

impl ProjectorOptions {
    /// Set the lock lifetime.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Set the `link_to` cache capacity.
    #[must_use]
    pub const fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Set the checkpoint block size.
    #[must_use]
    pub const fn with_persist_block_size(mut self, persist_block_size: usize) -> Self {
        self.persist_block_size = persist_block_size;
        self
    }

    /// Set the idle sleep.
    #[must_use]
    pub const fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Set the lock renewal threshold.
    #[must_use]
    pub const fn with_update_lock_threshold(mut self, threshold: Duration) -> Self {
        self.update_lock_threshold = threshold;
        self
    }

    /// Set the projections collection name.
    #[must_use]
    pub fn with_projections_collection(mut self, name: impl Into<String>) -> Self {
        self.projections_collection = name.into();
        self
    }
}

/// Cooperative stop request shared with whatever watches process signals.
///
/// Raising the signal has the same effect as a manager writing `stopping`
/// into the projection row; it is observed at the same checkpoints.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    /// Request a stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum Query {
    Streams(Vec<String>),
    Categories(Vec<String>),
    All,
}

enum Handlers {
    Any(Handler),
    ByName(HashMap<String, Handler>),
}

/// Runs handlers over streams and checkpoints into a projection row.
pub struct Projector {
    store: Arc<dyn EventStore>,
    backend: DocumentBackend,
    name: ProjectionName,
    options: ProjectorOptions,
    query: Option<Query>,
    handlers: Option<Handlers>,
    init: Option<InitCallback>,
    state: Document,
    positions: StreamPositions,
    gaps: GapTracker,
    status: ProjectionStatus,
    is_stopped: bool,
    event_counter: usize,
    cached_stream_names: StreamNameCache,
    last_lock_update: Option<DateTime<Utc>>,
    shutdown: ShutdownSignal,
}

impl Projector {
    /// Projector named `name` over a document backed store.
    pub fn new(
        store: Arc<dyn EventStore>,
        name: ProjectionName,
        options: ProjectorOptions,
    ) -> ProjectionResult<Self> {
        let backend = store.document_backend().ok_or_else(|| {
            ProjectionError::InvalidArgument("Unknown event store instance given".to_string())
        })?;
        Ok(Self {
            store,
            backend,
            name,
            cached_stream_names: StreamNameCache::new(options.cache_size),
            options,
            query: None,
            handlers: None,
            init: None,
            state: Document::new(),
            positions: StreamPositions::new(),
            gaps: GapTracker::new(),
            status: ProjectionStatus::Idle,
            is_stopped: false,
            event_counter: 0,
            last_lock_update: None,
            shutdown: ShutdownSignal::default(),
        })
    }

    /// Seed the state. Can be called once; the callback runs again on reset and delete.
    pub fn init<F>(&mut self, callback: F) -> ProjectionResult<&mut Self>
    where
        F: Fn() -> Document + Send + Sync + 'static,
    {
        if self.init.is_some() {
            return Err(ProjectionError::Configuration(
                "Projection already initialized".to_string(),
            ));
        }
        self.state = callback();
        self.init = Some(Box::new(callback));
        Ok(self)
    }

    /// Project a single stream.
    pub fn from_stream(&mut self, stream: &str) -> ProjectionResult<&mut Self> {
        self.set_query(Query::Streams(checked_stream_names([stream])?))
    }

    /// Project several streams.
    pub fn from_streams<I, S>(&mut self, streams: I) -> ProjectionResult<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_query(Query::Streams(checked_stream_names(streams)?))
    }

    /// Project every stream of a category.
    pub fn from_category(&mut self, category: &str) -> ProjectionResult<&mut Self> {
        self.set_query(Query::Categories(vec![category.to_string()]))
    }

    /// Project every stream of several categories.
    pub fn from_categories<I, S>(&mut self, categories: I) -> ProjectionResult<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_query(Query::Categories(
            categories.into_iter().map(Into::into).collect(),
        ))
    }

    /// Project every non-system stream.
    pub fn from_all(&mut self) -> ProjectionResult<&mut Self> {
        self.set_query(Query::All)
    }

    /// Dispatch events by type name.
    pub fn when(&mut self, handlers: HashMap<String, Handler>) -> ProjectionResult<&mut Self> {
        self.set_handlers(Handlers::ByName(handlers))
    }

    /// Handle every event with one handler.
    pub fn when_any<F>(&mut self, handler: F) -> ProjectionResult<&mut Self>
    where
        F: Fn(&Document, &Message, &mut HandlerContext) -> Option<Document> + Send + Sync + 'static,
    {
        self.set_handlers(Handlers::Any(Box::new(handler)))
    }

    /// Projection name.
    pub fn name(&self) -> &ProjectionName {
        &self.name
    }

    /// Current working state.
    pub const fn state(&self) -> &Document {
        &self.state
    }

    /// Current stream positions.
    pub const fn positions(&self) -> &StreamPositions {
        &self.positions
    }

    /// Status as last seen or written by this projector.
    pub const fn status(&self) -> ProjectionStatus {
        self.status
    }

    /// Handle for requesting a cooperative stop from outside the run loop.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    fn set_query(&mut self, query: Query) -> ProjectionResult<&mut Self> {
        if self.query.is_some() {
            return Err(ProjectionError::Configuration(
                "From was already called".to_string(),
            ));
        }
        self.query = Some(query);
        Ok(self)
    }

    fn set_handlers(&mut self, handlers: Handlers) -> ProjectionResult<&mut Self> {
        if self.handlers.is_some() {
            return Err(ProjectionError::Configuration(
                "When was already called".to_string(),
            ));
        }
        self.handlers = Some(handlers);
        Ok(self)
    }

    fn projections(&self) -> &str {
        &self.options.projections_collection
    }

    fn name_filter(&self) -> Filter {
        Filter::eq("name", self.name.as_str())
    }

    fn own_stream(&self) -> ProjectionResult<StreamName> {
        StreamName::try_new(self.name.to_string())
            .map_err(|e| ProjectionError::InvalidArgument(e.to_string()))
    }

    fn initial_state(&self) -> Document {
        self.init.as_ref().map_or_else(Document::new, |init| init())
    }

    /// Run the projection. With `keep_running` false, one catch-up and
    /// live-drain cycle is executed; otherwise it loops until stopped.
    #[instrument(name = "projector.run", skip(self), fields(projection = %self.name))]
    pub async fn run(&mut self, keep_running: bool) -> ProjectionResult<()> {
        if self.query.is_none() || self.handlers.is_none() {
            return Err(ProjectionError::Configuration(
                "No handlers configured".to_string(),
            ));
        }

        match self.fetch_remote_status().await? {
            ProjectionStatus::Stopping => {
                // A fresh runner must not overwrite the checkpoint with its empty state.
                self.load().await?;
                return self.stop().await;
            }
            ProjectionStatus::Deleting => return self.delete(false).await,
            ProjectionStatus::DeletingInclEmittedEvents => return self.delete(true).await,
            ProjectionStatus::Resetting => self.reset().await?,
            _ => {}
        }

        if !self.projection_exists().await? {
            self.create_projection().await?;
        }

        self.acquire_lock().await?;
        self.prepare_stream_positions().await?;
        self.load().await?;
        self.is_stopped = false;

        let processed = self.process_events(keep_running).await;
        let released = self.release_lock().await;
        processed?;
        released
    }

    /// Persist the checkpoint and mark the projection idle.
    #[instrument(name = "projector.stop", skip(self), fields(projection = %self.name))]
    pub async fn stop(&mut self) -> ProjectionResult<()> {
        self.persist().await?;
        self.is_stopped = true;
        self.backend
            .engine
            .update_one(
                self.projections(),
                self.name_filter(),
                Update::set("status", ProjectionStatus::Idle.as_str()),
                None,
            )
            .await?;
        self.status = ProjectionStatus::Idle;
        info!("[projector.stop] projection stopped");
        Ok(())
    }

    /// Forget positions, re-seed the state and delete the output stream.
    #[instrument(name = "projector.reset", skip(self), fields(projection = %self.name))]
    pub async fn reset(&mut self) -> ProjectionResult<()> {
        self.positions.clear();
        self.gaps.clear();
        self.state = self.initial_state();

        let update = Update::set("position", Value::Object(Document::new()))
            .and_set("state", Value::Object(self.state.clone()))
            .and_set("status", self.status.as_str());
        self.backend
            .engine
            .update_one(self.projections(), self.name_filter(), update, None)
            .await?;

        self.delete_own_stream().await?;
        info!("[projector.reset] projection reset");
        Ok(())
    }

    /// Delete the projection row, optionally with the output stream.
    #[instrument(name = "projector.delete", skip(self), fields(projection = %self.name))]
    pub async fn delete(&mut self, delete_emitted_events: bool) -> ProjectionResult<()> {
        self.backend
            .engine
            .delete_one(self.projections(), self.name_filter(), None)
            .await?;

        if delete_emitted_events {
            self.delete_own_stream().await?;
        }

        self.is_stopped = true;
        self.state = self.initial_state();
        self.positions.clear();
        self.gaps.clear();
        info!(delete_emitted_events, "[projector.delete] projection deleted");
        Ok(())
    }

    async fn delete_own_stream(&mut self) -> ProjectionResult<()> {
        let own = self.own_stream()?;
        self.cached_stream_names.clear();
        match self.store.delete(&own).await {
            Ok(()) | Err(EventStoreError::StreamNotFound(_)) => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn emit(&mut self, event: Message) -> ProjectionResult<()> {
        let own = self.own_stream()?;
        if !self.store.has_stream(&own).await? {
            self.store.create(Stream::new(own.clone(), Vec::new())).await?;
        }
        self.link_to(&own, event).await
    }

    async fn link_to(&mut self, stream: &StreamName, event: Message) -> ProjectionResult<()> {
        let append = if self.cached_stream_names.contains(stream.as_str()) {
            true
        } else {
            self.cached_stream_names.rolling_append(stream.as_str());
            self.store.has_stream(stream).await?
        };

        if append {
            self.store.append_to(stream, vec![event]).await?;
        } else {
            self.store
                .create(Stream::new(stream.clone(), vec![event]))
                .await?;
        }
        Ok(())
    }

    async fn fetch_remote_status(&self) -> ProjectionResult<ProjectionStatus> {
        if self.shutdown.is_triggered() {
            return Ok(ProjectionStatus::Stopping);
        }

        let row = self
            .backend
            .engine
            .find(
                self.projections(),
                FindOptions::new(self.name_filter())
                    .projection(["status"])
                    .limit(1),
                None,
            )
            .await?;

        match row
            .first()
            .and_then(|row| row.get("status"))
            .and_then(Value::as_str)
            .filter(|status| !status.is_empty())
        {
            Some(status) => status.parse(),
            None => {
                if !self.backend.engine.collection_exists(self.projections()).await? {
                    return Err(ProjectionError::CollectionNotSetup(
                        self.projections().to_string(),
                    ));
                }
                Ok(ProjectionStatus::Running)
            }
        }
    }

    /// Honour a pending status command. Returns after acting on it.
    async fn apply_remote_status(&mut self) -> ProjectionResult<()> {
        match self.fetch_remote_status().await? {
            ProjectionStatus::Stopping => self.stop().await,
            ProjectionStatus::Deleting => self.delete(false).await,
            ProjectionStatus::DeletingInclEmittedEvents => self.delete(true).await,
            ProjectionStatus::Resetting => self.reset().await,
            _ => Ok(()),
        }
    }

    async fn projection_exists(&self) -> ProjectionResult<bool> {
        Ok(self
            .backend
            .engine
            .find_one(self.projections(), self.name_filter(), None)
            .await?
            .is_some())
    }

    async fn create_projection(&self) -> ProjectionResult<()> {
        let mut row = Document::new();
        row.insert("name".to_string(), Value::from(self.name.as_str()));
        row.insert("position".to_string(), Value::Object(Document::new()));
        row.insert("state".to_string(), Value::Object(Document::new()));
        row.insert("status".to_string(), Value::from(self.status.as_str()));
        row.insert("locked_until".to_string(), Value::Null);

        self.backend
            .engine
            .insert_one(self.projections(), row, None)
            .await
            .map_err(|error| {
                warn!(%error, "[projector.create_projection] insert failed");
                ProjectionError::ProjectionNotCreated(self.name.to_string())
            })
    }

    async fn acquire_lock(&mut self) -> ProjectionResult<()> {
        let now = now_micros();
        let filter = self.name_filter().and(Filter::Or(vec![
            Filter::Eq("locked_until".to_string(), Value::Null),
            Filter::Lt("locked_until".to_string(), Value::from(format_timestamp(&now))),
        ]));
        let update = Update::set(
            "locked_until",
            lock_until(now, self.options.lock_timeout),
        )
        .and_set("status", ProjectionStatus::Running.as_str());

        let outcome = self
            .backend
            .engine
            .update_one(self.projections(), filter, update, None)
            .await?;

        if outcome.matched != 1 {
            if !self.backend.engine.collection_exists(self.projections()).await? {
                return Err(ProjectionError::CollectionNotSetup(
                    self.projections().to_string(),
                ));
            }
            warn!(projection = %self.name, "[projector.acquire_lock] lock is held by another process");
            return Err(ProjectionError::AlreadyRunning);
        }

        self.status = ProjectionStatus::Running;
        self.last_lock_update = Some(now);
        info!(projection = %self.name, "[projector.acquire_lock] lock acquired");
        Ok(())
    }

    async fn update_lock(&mut self) -> ProjectionResult<()> {
        let now = now_micros();
        if !should_update_lock(self.last_lock_update, self.options.update_lock_threshold, now) {
            return Ok(());
        }

        let update = Update::set(
            "locked_until",
            lock_until(now, self.options.lock_timeout),
        )
        .and_set("position", Value::Object(self.positions.to_document()));
        let outcome = self
            .backend
            .engine
            .update_one(self.projections(), self.name_filter(), update, None)
            .await?;

        if outcome.matched != 1 {
            if !self.backend.engine.collection_exists(self.projections()).await? {
                return Err(ProjectionError::CollectionNotSetup(
                    self.projections().to_string(),
                ));
            }
            return Err(ProjectionError::Internal("Unknown error occurred".to_string()));
        }

        self.last_lock_update = Some(now);
        Ok(())
    }

    async fn release_lock(&mut self) -> ProjectionResult<()> {
        let update = Update::set("locked_until", Value::Null)
            .and_set("status", ProjectionStatus::Idle.as_str());
        self.backend
            .engine
            .update_one(self.projections(), self.name_filter(), update, None)
            .await?;
        self.status = ProjectionStatus::Idle;
        info!(projection = %self.name, "[projector.release_lock] lock released");
        Ok(())
    }

    async fn persist(&mut self) -> ProjectionResult<()> {
        let update = Update::set(
            "locked_until",
            lock_until(now_micros(), self.options.lock_timeout),
        )
        .and_set("position", Value::Object(self.positions.to_document()))
        .and_set("state", Value::Object(self.state.clone()));
        self.backend
            .engine
            .update_one(self.projections(), self.name_filter(), update, None)
            .await?;
        debug!(projection = %self.name, "[projector.persist] checkpoint written");
        Ok(())
    }

    async fn prepare_stream_positions(&mut self) -> ProjectionResult<()> {
        let names = match self.query.clone() {
            Some(Query::All) => {
                self.registry_names(Filter::Regex(
                    "real_stream_name".to_string(),
                    "^[^$]".to_string(),
                ))
                .await?
            }
            Some(Query::Categories(categories)) => {
                self.registry_names(Filter::In(
                    "category".to_string(),
                    categories.into_iter().map(Value::from).collect(),
                ))
                .await?
            }
            Some(Query::Streams(streams)) => streams,
            None => Vec::new(),
        };
        self.positions.seed(names);
        Ok(())
    }

    async fn registry_names(&self, filter: Filter) -> ProjectionResult<Vec<String>> {
        let rows = self
            .backend
            .engine
            .find(
                &self.backend.event_streams_collection,
                FindOptions::new(filter).projection(["real_stream_name"]),
                None,
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("real_stream_name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn load(&mut self) -> ProjectionResult<()> {
        let Some(row) = self
            .backend
            .engine
            .find_one(self.projections(), self.name_filter(), None)
            .await?
        else {
            return Ok(());
        };

        if let Some(Value::Object(position)) = row.get("position") {
            self.positions
                .merge_stored(&StreamPositions::from_document(position));
        }
        if let Some(Value::Object(state)) = row.get("state") {
            if !state.is_empty() {
                self.state = state.clone();
            }
        }
        Ok(())
    }

    async fn idle_tick(&mut self) -> ProjectionResult<()> {
        tokio::time::sleep(self.options.sleep).await;
        self.update_lock().await
    }

    async fn process_events(&mut self, keep_running: bool) -> ProjectionResult<()> {
        loop {
            let mut collection_names: HashMap<String, String> = HashMap::new();
            for stream in self.positions.names() {
                if let Ok(name) = StreamName::try_new(stream.clone()) {
                    collection_names.insert(self.backend.strategy.generate_collection_name(&name), stream);
                }
            }

            // Opened before catch-up so that concurrent appends are not lost.
            let watched: Vec<String> = collection_names.keys().cloned().collect();
            let mut feed = self.backend.engine.watch(&watched).await?;

            let mut catch_up_started: HashMap<String, i64> = HashMap::new();
            for stream in self.positions.names() {
                catch_up_started.insert(stream.clone(), Utc::now().timestamp());
                let Ok(name) = StreamName::try_new(stream.clone()) else {
                    continue;
                };
                let from = self.positions.get(&stream).saturating_add(1);
                let cursor = match self.store.load(&name, from, None, None).await {
                    Ok(cursor) => cursor,
                    Err(EventStoreError::StreamNotFound(_)) => continue,
                    Err(error) => return Err(error.into()),
                };
                self.handle_stream(&stream, cursor).await?;
                if self.is_stopped {
                    break;
                }
            }

            if self.event_counter == 0 {
                self.idle_tick().await?;
            } else {
                self.persist().await?;
            }
            self.event_counter = 0;

            self.apply_remote_status().await?;

            if !self.is_stopped && self.status == ProjectionStatus::Running {
                self.drain_feed(feed.as_mut(), &collection_names, &catch_up_started, keep_running)
                    .await?;
            }

            self.prepare_stream_positions().await?;

            if !keep_running || self.is_stopped {
                return Ok(());
            }
        }
    }

    async fn drain_feed(
        &mut self,
        feed: &mut dyn ChangeFeed,
        collection_names: &HashMap<String, String>,
        catch_up_started: &HashMap<String, i64>,
        keep_running: bool,
    ) -> ProjectionResult<()> {
        loop {
            let Some(change) = feed.try_next().await? else {
                self.idle_tick().await?;
                self.apply_remote_status().await?;
                if self.is_stopped || !keep_running {
                    return Ok(());
                }
                continue;
            };

            match change.operation {
                ChangeOperation::Invalidate => return Ok(()),
                ChangeOperation::Other(_) => continue,
                ChangeOperation::Insert => {}
            }

            let (Some(stream), Some(document)) = (
                collection_names.get(&change.collection),
                change.full_document,
            ) else {
                continue;
            };
            let Some(position) = document.get("_id").and_then(Value::as_i64) else {
                continue;
            };

            let started = catch_up_started.get(stream).copied().unwrap_or(i64::MIN);
            if is_already_processed(
                change.cluster_time,
                started,
                position,
                self.positions.get(stream),
                self.gaps.contains(stream, position),
            ) {
                self.update_lock().await?;
                continue;
            }

            let (position, message) =
                decode_event(document, self.backend.message_factory.as_ref())?;
            self.handle_event(stream, position, message).await?;
            self.persist().await?;

            self.apply_remote_status().await?;
            if self.is_stopped {
                return Ok(());
            }
        }
    }

    async fn handle_stream(&mut self, stream: &str, mut cursor: StreamCursor) -> ProjectionResult<()> {
        while let Some((position, message)) = cursor.next().await? {
            self.handle_event(stream, position, message).await?;
            if self.is_stopped {
                break;
            }
        }
        Ok(())
    }

    async fn handle_event(
        &mut self,
        stream: &str,
        position: i64,
        message: Message,
    ) -> ProjectionResult<()> {
        self.gaps.observe(&mut self.positions, stream, position);

        let handler = match &self.handlers {
            Some(Handlers::Any(handler)) => Some(handler),
            Some(Handlers::ByName(handlers)) => handlers.get(message.message_name()),
            None => None,
        };
        let Some(handler) = handler else {
            return Ok(());
        };

        self.event_counter += 1;
        let mut context = HandlerContext::new(Some(stream));
        if let Some(state) = handler(&self.state, &message, &mut context) {
            self.state = state;
        }

        let (actions, stop_requested) = context.into_parts();
        for action in actions {
            match action {
                ContextAction::Emit(event) => self.emit(event).await?,
                ContextAction::LinkTo(target, event) => self.link_to(&target, event).await?,
            }
        }
        if stop_requested {
            self.stop().await?;
        }

        if self.event_counter == self.options.persist_block_size {
            self.persist().await?;
            self.event_counter = 0;
        }
        Ok(())
    }
}

/// Names that parse as [`StreamName`]s; the first invalid one is a
/// configuration error.
fn checked_stream_names<I, S>(streams: I) -> ProjectionResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    streams
        .into_iter()
        .map(|stream| {
            let stream = stream.into();
            StreamName::try_new(stream.clone())
                .map(|name| name.as_ref().to_string())
                .map_err(|e| ProjectionError::Configuration(format!("Invalid stream name {stream:?}: {e}")))
        })
        .collect()
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("query", &self.query)
            .field("status", &self.status)
            .field("positions", &self.positions)
            .field("is_stopped", &self.is_stopped)
            .finish_non_exhaustive()
    }
}
