//! `EventVault` - event sourcing on a document database
//!
//! Streams of immutable events are stored one collection per stream and
//! registered in a shared `event_streams` collection. Projections replay
//! those streams through handler callbacks, checkpoint their progress in a
//! `projections` collection and then follow new events through the engine's
//! change feed.
//!
//! The crate is engine-neutral: everything talks to a [`DocumentEngine`].
//! `eventvault-memory` provides an in-process engine for tests and
//! `eventvault-mongodb` the production one.
//!
//! # Overview
//!
//! - [`DocumentEventStore`]: create, append, load, delete and list streams
//! - [`PersistenceStrategy`]: how events map to documents and collections
//! - [`StreamCursor`]: batched, rewindable iteration over a stream
//! - [`Projector`] and [`ProjectionManager`]: long-running projections

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collections;
pub mod document;
pub mod engine;
pub mod errors;
pub mod event_store;
pub mod message;
pub mod metadata;
pub mod projection;
pub mod strategy;
pub mod stream_cursor;
pub mod types;

pub use collections::{CollectionRef, Collections};
pub use document::{document, Document, Filter};
pub use engine::{ChangeFeed, DocumentEngine, SessionId};
pub use errors::{
    EngineError, EngineResult, EventStoreError, EventStoreResult, ProjectionError,
    ProjectionResult,
};
pub use event_store::{
    DocumentBackend, DocumentEventStore, EventStore, EventStoreConfig, Stream,
    TransactionalEventStore,
};
pub use message::{
    DefaultMessageConverter, DefaultMessageFactory, Message, MessageConverter, MessageData,
    MessageFactory,
};
pub use metadata::{FieldType, MetadataMatcher, Operator};
pub use projection::{
    handler, Handler, HandlerContext, ProjectionManager, ProjectionStatus, Projector,
    ProjectorOptions, ShutdownSignal,
};
pub use strategy::{
    AggregateStreamStrategy, PersistenceStrategy, SimpleStreamStrategy, SingleStreamStrategy,
};
pub use stream_cursor::{Direction, StreamCursor};
pub use types::{ProjectionName, StreamName};
