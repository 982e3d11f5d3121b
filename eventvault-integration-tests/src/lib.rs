//! Integration tests for `EventVault`.
//!
//! The tests live in `tests/`; this library only holds the fixtures they
//! share: an in-memory engine with the system collections set up, stores
//! for each persistence strategy and a few event builders.

use std::sync::Arc;
use std::time::Duration;

use eventvault::message::AGGREGATE_VERSION_KEY;
use eventvault::{
    document, AggregateStreamStrategy, Collections, Document, DocumentEngine, DocumentEventStore,
    Message, PersistenceStrategy, ProjectionManager, ProjectionName, ProjectionStatus,
    ProjectorOptions, SimpleStreamStrategy, SingleStreamStrategy, StreamName,
};
use eventvault_memory::InMemoryDocumentEngine;
use serde_json::Value;

/// Which persistence strategy a fixture store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// [`AggregateStreamStrategy`]
    Aggregate,
    /// [`SingleStreamStrategy`]
    Single,
    /// [`SimpleStreamStrategy`]
    Simple,
}

impl StrategyKind {
    fn build(self) -> Arc<dyn PersistenceStrategy> {
        match self {
            Self::Aggregate => Arc::new(AggregateStreamStrategy::new()),
            Self::Single => Arc::new(SingleStreamStrategy::new()),
            Self::Simple => Arc::new(SimpleStreamStrategy::new()),
        }
    }
}

/// An engine and a store over it, with the registry and projections
/// collections already created.
#[derive(Debug, Clone)]
pub struct Fixture {
    /// The engine, for inspecting raw collections.
    pub engine: Arc<InMemoryDocumentEngine>,
    /// The store under test.
    pub store: Arc<DocumentEventStore>,
}

impl Fixture {
    /// Fixture with the given strategy.
    pub async fn new(kind: StrategyKind) -> Self {
        let engine = Arc::new(InMemoryDocumentEngine::new());
        let shared: Arc<dyn DocumentEngine> = engine.clone();
        Collections::new(Arc::clone(&shared))
            .create_event_streams_collection()
            .await
            .expect("registry collection");
        Collections::new(Arc::clone(&shared))
            .create_projections_collection()
            .await
            .expect("projections collection");
        let store = Arc::new(DocumentEventStore::new(shared, kind.build()));
        Self { engine, store }
    }

    /// Fixture using [`SimpleStreamStrategy`].
    pub async fn simple() -> Self {
        Self::new(StrategyKind::Simple).await
    }

    /// Fixture using [`AggregateStreamStrategy`].
    pub async fn aggregate() -> Self {
        Self::new(StrategyKind::Aggregate).await
    }

    /// The store as the trait object projections take.
    pub fn event_store(&self) -> Arc<dyn eventvault::EventStore> {
        self.store.clone()
    }
}

/// Parse a stream name.
pub fn stream(name: &str) -> StreamName {
    StreamName::try_new(name.to_string()).expect("valid stream name")
}

/// Parse a projection name.
pub fn projection(name: &str) -> ProjectionName {
    ProjectionName::try_new(name.to_string()).expect("valid projection name")
}

/// An event with a JSON object payload.
pub fn event(name: &str, payload: Value) -> Message {
    Message::new(name, document(payload))
}

/// An event carrying `_aggregate_version` metadata.
pub fn versioned(name: &str, version: i64, payload: Value) -> Message {
    event(name, payload).with_added_metadata(AGGREGATE_VERSION_KEY, version)
}

/// Projector options with short sleeps so tests do not idle.
pub fn fast_options() -> ProjectorOptions {
    ProjectorOptions::default()
        .with_sleep(Duration::from_millis(5))
        .with_lock_timeout(Duration::from_secs(5))
}

/// Poll the checkpointed state of `name` until `predicate` accepts it.
pub async fn wait_for_state<F>(
    manager: &ProjectionManager,
    name: &str,
    timeout: Duration,
    predicate: F,
) -> Option<Document>
where
    F: Fn(&Document) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(state) = manager.fetch_projection_state(name).await {
            if predicate(&state) {
                return Some(state);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the status of `name` until it equals `expected`.
pub async fn wait_for_status(
    manager: &ProjectionManager,
    name: &str,
    expected: ProjectionStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if matches!(manager.fetch_projection_status(name).await, Ok(status) if status == expected) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
