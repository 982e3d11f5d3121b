//! In-memory document engine for `EventVault`
//!
//! This crate provides an in-memory implementation of the `DocumentEngine`
//! port from the eventvault crate, useful for testing and development
//! scenarios where persistence is not required.
//!
//! Collections keep insertion order and enforce their unique indexes (plus
//! the implicit one on `_id`). Transactions snapshot every collection they
//! touch and restore the snapshots on abort; their inserts reach change
//! feeds only on commit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod matcher;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eventvault::document::{
    lookup, ChangeEvent, ChangeOperation, DistinctQuery, Document, Filter, FindOptions, IndexSpec,
    SortOrder, Update, UpdateOutcome,
};
use eventvault::engine::{ChangeFeed, DocumentEngine, SessionId};
use eventvault::errors::{EngineError, EngineResult};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use crate::matcher::{apply_update, compare, equals, matches, project, validate};

const CHANGE_FEED_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    fn key_of(document: &Document, index: &IndexSpec) -> Vec<Value> {
        index
            .keys
            .iter()
            .map(|key| lookup(document, key).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn same_key(a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(a, b)| equals(Some(a), b))
    }

    /// Check `candidate` against every document except the one at `skip`.
    fn check_unique(
        &self,
        name: &str,
        candidate: &Document,
        others: &[Document],
        skip: Option<usize>,
    ) -> EngineResult<()> {
        let id_index = IndexSpec::unique("_id_", ["_id"]);
        let unique = std::iter::once(&id_index).chain(self.indexes.iter().filter(|i| i.unique));
        for index in unique {
            let key = Self::key_of(candidate, index);
            if index.name == "_id_" && key.first().is_some_and(Value::is_null) {
                continue;
            }
            let clash = others
                .iter()
                .enumerate()
                .filter(|(position, _)| Some(*position) != skip)
                .any(|(_, other)| Self::same_key(&key, &Self::key_of(other, index)));
            if clash {
                return Err(EngineError::DuplicateKey {
                    collection: name.to_string(),
                    detail: format!("index {} dup key {:?}", index.name, key),
                });
            }
        }
        Ok(())
    }

    fn matching(&self, filter: &Filter) -> EngineResult<Vec<usize>> {
        let mut found = Vec::new();
        for (position, document) in self.documents.iter().enumerate() {
            if matches(document, filter)? {
                found.push(position);
            }
        }
        Ok(found)
    }
}

#[derive(Debug, Default)]
struct Session {
    snapshots: HashMap<String, Option<Collection>>,
    pending_changes: Vec<ChangeEvent>,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Collection>,
    sessions: HashMap<SessionId, Session>,
}

impl State {
    /// Record the pre-transaction state of `collection` on first touch.
    fn touch(&mut self, collection: &str, session: Option<SessionId>) -> EngineResult<()> {
        let Some(id) = session else {
            return Ok(());
        };
        let snapshot = self.collections.get(collection).cloned();
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))?;
        session
            .snapshots
            .entry(collection.to_string())
            .or_insert(snapshot);
        Ok(())
    }

    fn check_session(&self, session: Option<SessionId>) -> EngineResult<()> {
        match session {
            Some(id) if !self.sessions.contains_key(&id) => {
                Err(EngineError::SessionNotFound(id.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Thread-safe in-memory [`DocumentEngine`] for testing.
#[derive(Clone)]
pub struct InMemoryDocumentEngine {
    state: Arc<Mutex<State>>,
    changes: broadcast::Sender<ChangeEvent>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryDocumentEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            changes,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Names of all existing collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of documents in a collection (0 when it does not exist).
    pub fn document_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    fn with_id(&self, mut document: Document) -> Document {
        if !document.contains_key("_id") {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            document.insert("_id".to_string(), Value::from(format!("mem-{id:020}")));
        }
        document
    }

    fn publish(&self, state: &mut State, session: Option<SessionId>, changes: Vec<ChangeEvent>) {
        if let Some(session) = session.and_then(|id| state.sessions.get_mut(&id)) {
            session.pending_changes.extend(changes);
            return;
        }
        for change in changes {
            // No subscribers is fine.
            let _ = self.changes.send(change);
        }
    }

    fn insert_change(collection: &str, document: &Document) -> ChangeEvent {
        ChangeEvent {
            operation: ChangeOperation::Insert,
            collection: collection.to_string(),
            full_document: Some(document.clone()),
            cluster_time: Utc::now().timestamp(),
        }
    }
}

impl Default for InMemoryDocumentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryDocumentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDocumentEngine")
            .field("collections", &self.collection_names())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentEngine for InMemoryDocumentEngine {
    async fn collection_exists(&self, collection: &str) -> EngineResult<bool> {
        Ok(self.state.lock().collections.contains_key(collection))
    }

    #[instrument(name = "memory.create_indexes", skip(self, indexes))]
    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.touch(collection, session)?;
        let target = state.collections.entry(collection.to_string()).or_default();
        for index in indexes {
            if !target.indexes.iter().any(|existing| existing.name == index.name) {
                target.indexes.push(index.clone());
            }
        }
        debug!("[memory.create_indexes] indexes ready");
        Ok(())
    }

    async fn drop_collection(
        &self,
        collection: &str,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.touch(collection, session)?;
        state.collections.remove(collection);
        Ok(())
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        self.insert_many(collection, vec![document], session).await
    }

    #[instrument(name = "memory.insert_many", skip(self, documents), fields(document_count = documents.len()))]
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let documents: Vec<Document> = documents.into_iter().map(|d| self.with_id(d)).collect();
        let mut state = self.state.lock();
        state.check_session(session)?;

        {
            let existing = state.collections.get(collection).cloned().unwrap_or_default();
            let mut combined = existing.documents.clone();
            for document in &documents {
                existing.check_unique(collection, document, &combined, None)?;
                combined.push(document.clone());
            }
        }

        state.touch(collection, session)?;
        let changes = documents
            .iter()
            .map(|document| Self::insert_change(collection, document))
            .collect();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(documents);
        self.publish(&mut state, session, changes);
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<Document>> {
        validate(&options.filter)?;
        let state = self.state.lock();
        state.check_session(session)?;
        let Some(target) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<&Document> = target
            .matching(&options.filter)?
            .into_iter()
            .map(|position| &target.documents[position])
            .collect();

        if let Some((field, order)) = &options.sort {
            found.sort_by(|a, b| {
                let ordering = compare(lookup(a, field), lookup(b, field));
                match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        Ok(found
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .map(|document| match &options.projection {
                Some(fields) => project(document, fields),
                None => document.clone(),
            })
            .collect())
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        validate(&filter)?;
        let state = self.state.lock();
        state.check_session(session)?;
        let count = match state.collections.get(collection) {
            Some(target) => target.matching(&filter)?.len(),
            None => 0,
        };
        Ok(count as u64)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        session: Option<SessionId>,
    ) -> EngineResult<UpdateOutcome> {
        let mut state = self.state.lock();
        let Some((before, after)) = update_first(&mut state, collection, &filter, &update, session)?
        else {
            return Ok(UpdateOutcome::default());
        };
        Ok(UpdateOutcome {
            matched: 1,
            modified: u64::from(before != after),
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        session: Option<SessionId>,
    ) -> EngineResult<Option<Document>> {
        let mut state = self.state.lock();
        Ok(update_first(&mut state, collection, &filter, &update, session)?.map(|(_, after)| after))
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        validate(&filter)?;
        let mut state = self.state.lock();
        state.check_session(session)?;
        let Some(position) = state
            .collections
            .get(collection)
            .map(|target| target.matching(&filter))
            .transpose()?
            .and_then(|found| found.first().copied())
        else {
            return Ok(0);
        };
        state.touch(collection, session)?;
        if let Some(target) = state.collections.get_mut(collection) {
            target.documents.remove(position);
        }
        Ok(1)
    }

    async fn distinct_values(
        &self,
        collection: &str,
        query: DistinctQuery,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<Value>> {
        validate(&query.filter)?;
        let state = self.state.lock();
        state.check_session(session)?;
        let Some(target) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut groups: Vec<Value> = Vec::new();
        for position in target.matching(&query.filter)? {
            let value = lookup(&target.documents[position], &query.field)
                .cloned()
                .unwrap_or(Value::Null);
            if !groups.iter().any(|group| equals(Some(group), &value)) {
                groups.push(value);
            }
        }
        groups.sort_by(|a, b| compare(Some(a), Some(b)));
        Ok(groups
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .collect())
    }

    async fn watch(&self, collections: &[String]) -> EngineResult<Box<dyn ChangeFeed>> {
        Ok(Box::new(InMemoryChangeFeed {
            receiver: self.changes.subscribe(),
            collections: collections.iter().cloned().collect(),
        }))
    }

    #[instrument(name = "memory.start_transaction", skip(self))]
    async fn start_transaction(&self) -> EngineResult<SessionId> {
        let id = SessionId::new();
        self.state.lock().sessions.insert(id, Session::default());
        debug!(session = %id, "[memory.start_transaction] session opened");
        Ok(id)
    }

    #[instrument(name = "memory.commit_transaction", skip(self, session), fields(session = %session))]
    async fn commit_transaction(&self, session: SessionId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let closed = state
            .sessions
            .remove(&session)
            .ok_or_else(|| EngineError::SessionNotFound(session.to_string()))?;
        self.publish(&mut state, None, closed.pending_changes);
        Ok(())
    }

    #[instrument(name = "memory.abort_transaction", skip(self, session), fields(session = %session))]
    async fn abort_transaction(&self, session: SessionId) -> EngineResult<()> {
        let mut state = self.state.lock();
        let closed = state
            .sessions
            .remove(&session)
            .ok_or_else(|| EngineError::SessionNotFound(session.to_string()))?;
        for (name, snapshot) in closed.snapshots {
            match snapshot {
                Some(collection) => {
                    state.collections.insert(name, collection);
                }
                None => {
                    state.collections.remove(&name);
                }
            }
        }
        Ok(())
    }
}

/// Apply `update` to the first match; returns the document before and after.
fn update_first(
    state: &mut State,
    collection: &str,
    filter: &Filter,
    update: &Update,
    session: Option<SessionId>,
) -> EngineResult<Option<(Document, Document)>> {
    validate(filter)?;
    state.check_session(session)?;
    let Some(target) = state.collections.get(collection) else {
        return Ok(None);
    };
    let Some(position) = target.matching(filter)?.first().copied() else {
        return Ok(None);
    };

    let before = target.documents[position].clone();
    let after = apply_update(&before, update)?;
    target.check_unique(collection, &after, &target.documents, Some(position))?;

    state.touch(collection, session)?;
    if let Some(target) = state.collections.get_mut(collection) {
        target.documents[position] = after.clone();
    }
    Ok(Some((before, after)))
}

/// Change feed over the engine's broadcast channel.
struct InMemoryChangeFeed {
    receiver: broadcast::Receiver<ChangeEvent>,
    collections: HashSet<String>,
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn try_next(&mut self) -> EngineResult<Option<ChangeEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if self.collections.contains(&change.collection) => {
                    return Ok(Some(change));
                }
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "[memory.change_feed] subscriber lagged, invalidating feed");
                    return Ok(Some(ChangeEvent {
                        operation: ChangeOperation::Invalidate,
                        collection: String::new(),
                        full_document: None,
                        cluster_time: Utc::now().timestamp(),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventvault::document::document;
    use serde_json::json;

    #[tokio::test]
    async fn unique_indexes_reject_the_whole_batch() {
        let engine = InMemoryDocumentEngine::new();
        engine
            .create_indexes("events", &[IndexSpec::unique("event_id", ["event_id"])], None)
            .await
            .unwrap();

        let result = engine
            .insert_many(
                "events",
                vec![
                    document(json!({"_id": 1, "event_id": "a"})),
                    document(json!({"_id": 2, "event_id": "a"})),
                ],
                None,
            )
            .await;

        assert!(matches!(result, Err(EngineError::DuplicateKey { .. })));
        assert_eq!(engine.document_count("events"), 0);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let engine = InMemoryDocumentEngine::new();
        engine
            .insert_one("counter", document(json!({"_id": "c", "seq": 1})), None)
            .await
            .unwrap();
        let result = engine
            .insert_one("counter", document(json!({"_id": "c", "seq": 1})), None)
            .await;
        assert!(matches!(result, Err(EngineError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn find_one_and_update_returns_the_updated_document() {
        let engine = InMemoryDocumentEngine::new();
        engine
            .insert_one("counter", document(json!({"_id": "c", "seq": 1})), None)
            .await
            .unwrap();

        let updated = engine
            .find_one_and_update("counter", Filter::eq("_id", "c"), Update::inc("seq", 3), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated["seq"], json!(4));
    }

    #[tokio::test]
    async fn find_sorts_skips_and_limits() {
        let engine = InMemoryDocumentEngine::new();
        let documents = (1..=5).map(|id| document(json!({"_id": id}))).collect();
        engine.insert_many("s", documents, None).await.unwrap();

        let found = engine
            .find(
                "s",
                FindOptions::new(Filter::Gte("_id".into(), json!(2)))
                    .sort("_id", SortOrder::Descending)
                    .skip(1)
                    .limit(2),
                None,
            )
            .await
            .unwrap();

        let ids: Vec<i64> = found.iter().filter_map(|d| d["_id"].as_i64()).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn distinct_values_are_grouped_and_sorted() {
        let engine = InMemoryDocumentEngine::new();
        let rows = ["user", "order", "user", "audit"]
            .iter()
            .map(|category| document(json!({"category": category})))
            .collect();
        engine.insert_many("registry", rows, None).await.unwrap();

        let values = engine
            .distinct_values(
                "registry",
                DistinctQuery {
                    filter: Filter::all(),
                    field: "category".to_string(),
                    skip: 1,
                    limit: 5,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(values, vec![json!("order"), json!("user")]);
    }

    #[tokio::test]
    async fn aborted_transactions_restore_touched_collections() {
        let engine = InMemoryDocumentEngine::new();
        engine
            .insert_one("registry", document(json!({"_id": 1})), None)
            .await
            .unwrap();

        let session = engine.start_transaction().await.unwrap();
        engine
            .insert_one("registry", document(json!({"_id": 2})), Some(session))
            .await
            .unwrap();
        engine
            .create_indexes("fresh", &[], Some(session))
            .await
            .unwrap();
        engine.abort_transaction(session).await.unwrap();

        assert_eq!(engine.document_count("registry"), 1);
        assert!(!engine.collection_exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_sessions_are_rejected() {
        let engine = InMemoryDocumentEngine::new();
        let result = engine
            .insert_one("s", Document::new(), Some(SessionId::new()))
            .await;
        assert!(matches!(result, Err(EngineError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn change_feed_delivers_inserts_of_watched_collections_only() {
        let engine = InMemoryDocumentEngine::new();
        let mut feed = engine.watch(&["watched".to_string()]).await.unwrap();

        engine
            .insert_one("other", document(json!({"_id": 1})), None)
            .await
            .unwrap();
        engine
            .insert_one("watched", document(json!({"_id": 7})), None)
            .await
            .unwrap();

        let change = feed.try_next().await.unwrap().unwrap();
        assert_eq!(change.operation, ChangeOperation::Insert);
        assert_eq!(change.collection, "watched");
        assert_eq!(change.full_document.unwrap()["_id"], json!(7));
        assert!(feed.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transactional_inserts_reach_feeds_on_commit() {
        let engine = InMemoryDocumentEngine::new();
        let mut feed = engine.watch(&["s".to_string()]).await.unwrap();
        let session = engine.start_transaction().await.unwrap();
        engine
            .insert_one("s", document(json!({"_id": 1})), Some(session))
            .await
            .unwrap();

        assert!(feed.try_next().await.unwrap().is_none());
        engine.commit_transaction(session).await.unwrap();
        assert!(feed.try_next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_regex_is_reported() {
        let engine = InMemoryDocumentEngine::new();
        engine
            .insert_one("s", document(json!({"name": "x"})), None)
            .await
            .unwrap();
        let result = engine
            .find("s", FindOptions::new(Filter::Regex("name".into(), "(".into())), None)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidRegex(_))));
    }
}
