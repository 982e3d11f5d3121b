//! The document engine port.
//!
//! Everything the event store and the projector need from the underlying
//! database goes through [`DocumentEngine`]. Implementations live in the
//! `eventvault-memory` and `eventvault-mongodb` crates.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::document::{
    ChangeEvent, DistinctQuery, Document, Filter, FindOptions, IndexSpec, Update, UpdateOutcome,
};
use crate::errors::EngineResult;

/// Handle of a multi-document transaction opened on an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Allocate a fresh session id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Operations a document database must provide.
///
/// Every data operation takes an optional session; `Some` runs the
/// operation inside that transaction.
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Whether a collection with this name exists.
    async fn collection_exists(&self, collection: &str) -> EngineResult<bool>;

    /// Create indexes, creating the collection when it does not exist yet.
    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
        session: Option<SessionId>,
    ) -> EngineResult<()>;

    /// Drop a collection. Dropping a missing collection succeeds.
    async fn drop_collection(&self, collection: &str, session: Option<SessionId>)
        -> EngineResult<()>;

    /// Insert one document.
    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> EngineResult<()>;

    /// Insert documents in order. A unique index violation rejects the whole batch.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<SessionId>,
    ) -> EngineResult<()>;

    /// Find documents.
    async fn find(
        &self,
        collection: &str,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<Document>>;

    /// Find the first document matching `filter`.
    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<Option<Document>> {
        let mut found = self
            .find(collection, FindOptions::new(filter).limit(1), session)
            .await?;
        Ok(found.pop())
    }

    /// Count documents matching `filter`.
    async fn count_documents(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<u64>;

    /// Update the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        session: Option<SessionId>,
    ) -> EngineResult<UpdateOutcome>;

    /// Atomically update the first document matching `filter` and return it
    /// as it is after the update.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        session: Option<SessionId>,
    ) -> EngineResult<Option<Document>>;

    /// Delete the first document matching `filter`; returns the number deleted.
    async fn delete_one(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<u64>;

    /// Distinct values of one field, grouped, sorted ascending and paged.
    async fn distinct_values(
        &self,
        collection: &str,
        query: DistinctQuery,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<Value>>;

    /// Subscribe to inserts into the given collections.
    ///
    /// Changes committed after this call returns are delivered by the feed.
    async fn watch(&self, collections: &[String]) -> EngineResult<Box<dyn ChangeFeed>>;

    /// Open a transaction (snapshot reads, majority writes where supported).
    async fn start_transaction(&self) -> EngineResult<SessionId>;

    /// Commit and close a transaction.
    async fn commit_transaction(&self, session: SessionId) -> EngineResult<()>;

    /// Abort and close a transaction, discarding its writes.
    async fn abort_transaction(&self, session: SessionId) -> EngineResult<()>;
}

/// A live change subscription.
#[async_trait]
pub trait ChangeFeed: Send {
    /// The next pending change, or `None` when nothing is pending right now.
    ///
    /// Never waits for new changes to arrive.
    async fn try_next(&mut self) -> EngineResult<Option<ChangeEvent>>;
}
