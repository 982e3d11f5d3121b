//! Collection accessor: binds an engine to the logical system collections.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::document::IndexSpec;
use crate::engine::DocumentEngine;
use crate::errors::EngineResult;

/// Default name of the stream registry collection.
pub const DEFAULT_EVENT_STREAMS_COLLECTION: &str = "event_streams";
/// Default name of the projections collection.
pub const DEFAULT_PROJECTIONS_COLLECTION: &str = "projections";
/// Default name of the sequence counter collection.
pub const DEFAULT_COUNTER_COLLECTION: &str = "counter";

/// A collection name bound to the engine that holds it.
#[derive(Clone)]
pub struct CollectionRef {
    engine: Arc<dyn DocumentEngine>,
    name: String,
}

impl CollectionRef {
    /// Physical collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The engine holding the collection.
    pub fn engine(&self) -> &dyn DocumentEngine {
        self.engine.as_ref()
    }

    /// Whether the collection exists.
    pub async fn exists(&self) -> EngineResult<bool> {
        self.engine.collection_exists(&self.name).await
    }
}

impl std::fmt::Debug for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionRef").field("name", &self.name).finish()
    }
}

/// Resolves logical collection names against one engine.
#[derive(Clone)]
pub struct Collections {
    engine: Arc<dyn DocumentEngine>,
    event_streams: String,
    projections: String,
    counter: String,
}

impl Collections {
    /// Accessor using the default system collection names.
    pub fn new(engine: Arc<dyn DocumentEngine>) -> Self {
        Self {
            engine,
            event_streams: DEFAULT_EVENT_STREAMS_COLLECTION.to_string(),
            projections: DEFAULT_PROJECTIONS_COLLECTION.to_string(),
            counter: DEFAULT_COUNTER_COLLECTION.to_string(),
        }
    }

    /// Override the stream registry collection name.
    #[must_use]
    pub fn with_event_streams(mut self, name: impl Into<String>) -> Self {
        self.event_streams = name.into();
        self
    }

    /// Override the projections collection name.
    #[must_use]
    pub fn with_projections(mut self, name: impl Into<String>) -> Self {
        self.projections = name.into();
        self
    }

    /// Override the counter collection name.
    #[must_use]
    pub fn with_counter(mut self, name: impl Into<String>) -> Self {
        self.counter = name.into();
        self
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<dyn DocumentEngine> {
        &self.engine
    }

    /// Any collection by physical name.
    pub fn collection(&self, name: impl Into<String>) -> CollectionRef {
        CollectionRef {
            engine: Arc::clone(&self.engine),
            name: name.into(),
        }
    }

    /// The stream registry.
    pub fn event_streams(&self) -> CollectionRef {
        self.collection(self.event_streams.clone())
    }

    /// The projections collection.
    pub fn projections(&self) -> CollectionRef {
        self.collection(self.projections.clone())
    }

    /// The sequence counter collection.
    pub fn counter(&self) -> CollectionRef {
        self.collection(self.counter.clone())
    }

    /// Create the stream registry with a unique index on `stream_name`.
    #[instrument(name = "collections.create_event_streams", skip(self), fields(collection = %self.event_streams))]
    pub async fn create_event_streams_collection(&self) -> EngineResult<()> {
        self.engine
            .create_indexes(
                &self.event_streams,
                &[IndexSpec::unique("ix_query_events", ["stream_name"])],
                None,
            )
            .await?;
        info!("[collections.create_event_streams] stream registry ready");
        Ok(())
    }

    /// Create the projections collection with a unique index on `name`.
    #[instrument(name = "collections.create_projections", skip(self), fields(collection = %self.projections))]
    pub async fn create_projections_collection(&self) -> EngineResult<()> {
        self.engine
            .create_indexes(
                &self.projections,
                &[IndexSpec::unique("ix_name", ["name"])],
                None,
            )
            .await?;
        info!("[collections.create_projections] projections collection ready");
        Ok(())
    }
}

impl std::fmt::Debug for Collections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collections")
            .field("event_streams", &self.event_streams)
            .field("projections", &self.projections)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}
