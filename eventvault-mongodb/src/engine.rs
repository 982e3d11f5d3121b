use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use chrono::Utc;
use eventvault::document::{
    ChangeEvent, ChangeOperation, DistinctQuery, Document, Filter, FindOptions, IndexSpec, Update,
    UpdateOutcome,
};
use eventvault::engine::{ChangeFeed, DocumentEngine, SessionId};
use eventvault::errors::{EngineError, EngineResult};
use futures::TryStreamExt;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{
    Acknowledgment, ClientOptions, IndexOptions, ReadConcern, ReturnDocument, WriteConcern,
};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::config::MongoConfig;
use crate::convert::{
    from_bson, from_bson_document, render_filter, render_index_keys, render_projection,
    render_sort, render_update, to_bson_document,
};
use crate::error::{
    error_code, map_mongo_error, MongoEngineError, NAMESPACE_EXISTS, NAMESPACE_NOT_FOUND,
};

const CHANGE_STREAM_BATCH_SIZE: u32 = 1000;

type Sessions = HashMap<SessionId, ClientSession>;

fn session_mut(sessions: &mut Sessions, id: SessionId) -> EngineResult<&mut ClientSession> {
    sessions
        .get_mut(&id)
        .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
}

/// [`DocumentEngine`] backed by a MongoDB database.
///
/// Transactions require a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoDocumentEngine {
    client: Client,
    database: Database,
    sessions: Arc<Mutex<Sessions>>,
}

impl MongoDocumentEngine {
    /// Connect with the given configuration and verify the server answers.
    #[instrument(name = "mongodb.connect", skip(config), fields(database = %config.database))]
    pub async fn connect(config: MongoConfig) -> Result<Self, MongoEngineError> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(MongoEngineError::ClientConfiguration)?;
        options.server_selection_timeout = Some(config.server_selection_timeout);
        options.connect_timeout = Some(config.connect_timeout);

        let client = Client::with_options(options).map_err(MongoEngineError::ClientConfiguration)?;
        let database = client.database(&config.database);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(MongoEngineError::Ping)?;

        info!("[mongodb.connect] connected");
        Ok(Self::from_client(client, &config.database))
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client, database: &str) -> Self {
        let database = client.database(database);
        Self {
            client,
            database,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The underlying driver client.
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// The database holding every collection.
    pub const fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection::<BsonDocument>(name)
    }
}

impl std::fmt::Debug for MongoDocumentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoDocumentEngine")
            .field("database", &self.database.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentEngine for MongoDocumentEngine {
    async fn collection_exists(&self, collection: &str) -> EngineResult<bool> {
        let names = self
            .database
            .list_collection_names()
            .filter(doc! { "name": collection })
            .await
            .map_err(|e| map_mongo_error("list_collections", collection, &e))?;
        Ok(!names.is_empty())
    }

    #[instrument(name = "mongodb.create_indexes", skip(self, indexes, session), fields(index_count = indexes.len()))]
    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let target = self.collection(collection);
        if indexes.is_empty() {
            let result = match session {
                Some(id) => {
                    let mut sessions = self.sessions.lock().await;
                    let session = session_mut(&mut sessions, id)?;
                    self.database
                        .create_collection(collection)
                        .session(session)
                        .await
                }
                None => self.database.create_collection(collection).await,
            };
            return match result {
                Ok(()) => Ok(()),
                Err(e) if error_code(&e) == Some(NAMESPACE_EXISTS) => Ok(()),
                Err(e) => Err(map_mongo_error("create_collection", collection, &e)),
            };
        }

        let models: Vec<IndexModel> = indexes
            .iter()
            .map(|index| {
                IndexModel::builder()
                    .keys(render_index_keys(index))
                    .options(
                        IndexOptions::builder()
                            .name(index.name.clone())
                            .unique(index.unique)
                            .build(),
                    )
                    .build()
            })
            .collect();

        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.create_indexes(models).session(session).await
            }
            None => target.create_indexes(models).await,
        };
        result.map_err(|e| map_mongo_error("create_indexes", collection, &e))?;
        debug!("[mongodb.create_indexes] indexes ready");
        Ok(())
    }

    #[instrument(name = "mongodb.drop_collection", skip(self, session))]
    async fn drop_collection(
        &self,
        collection: &str,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let target = self.collection(collection);
        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.drop().session(session).await
            }
            None => target.drop().await,
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if error_code(&e) == Some(NAMESPACE_NOT_FOUND) => Ok(()),
            Err(e) => Err(map_mongo_error("drop", collection, &e)),
        }
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        let document = to_bson_document(&document)?;
        let target = self.collection(collection);
        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.insert_one(document).session(session).await
            }
            None => target.insert_one(document).await,
        };
        result.map_err(|e| map_mongo_error("insert_one", collection, &e))?;
        Ok(())
    }

    #[instrument(name = "mongodb.insert_many", skip(self, documents, session), fields(document_count = documents.len()))]
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
        session: Option<SessionId>,
    ) -> EngineResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let documents = documents
            .iter()
            .map(to_bson_document)
            .collect::<EngineResult<Vec<_>>>()?;
        let target = self.collection(collection);
        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.insert_many(documents).session(session).await
            }
            None => target.insert_many(documents).await,
        };
        result.map_err(|e| map_mongo_error("insert_many", collection, &e))?;
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        options: FindOptions,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<Document>> {
        let filter = render_filter(&options.filter)?;
        let target = self.collection(collection);
        let limit = options
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let skip = u64::try_from(options.skip).unwrap_or(u64::MAX);
        let mut find = target.find(filter).skip(skip);
        if let Some(sort) = render_sort(&options) {
            find = find.sort(sort);
        }
        if let Some(projection) = render_projection(&options) {
            find = find.projection(projection);
        }
        if let Some(limit) = limit {
            find = find.limit(limit);
        }

        let found: Vec<BsonDocument> = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                let mut cursor = find
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_mongo_error("find", collection, &e))?;
                cursor
                    .stream(session)
                    .try_collect()
                    .await
                    .map_err(|e| map_mongo_error("find", collection, &e))?
            }
            None => find
                .await
                .map_err(|e| map_mongo_error("find", collection, &e))?
                .try_collect()
                .await
                .map_err(|e| map_mongo_error("find", collection, &e))?,
        };
        Ok(found.into_iter().map(from_bson_document).collect())
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        let filter = render_filter(&filter)?;
        let target = self.collection(collection);
        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.count_documents(filter).session(session).await
            }
            None => target.count_documents(filter).await,
        };
        result.map_err(|e| map_mongo_error("count_documents", collection, &e))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        session: Option<SessionId>,
    ) -> EngineResult<UpdateOutcome> {
        let filter = render_filter(&filter)?;
        let update = render_update(&update)?;
        let target = self.collection(collection);
        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.update_one(filter, update).session(session).await
            }
            None => target.update_one(filter, update).await,
        }
        .map_err(|e| map_mongo_error("update_one", collection, &e))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Filter,
        update: Update,
        session: Option<SessionId>,
    ) -> EngineResult<Option<Document>> {
        let filter = render_filter(&filter)?;
        let update = render_update(&update)?;
        let target = self.collection(collection);
        let action = target
            .find_one_and_update(filter, update)
            .return_document(ReturnDocument::After);
        let found = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                action.session(session).await
            }
            None => action.await,
        }
        .map_err(|e| map_mongo_error("find_one_and_update", collection, &e))?;
        Ok(found.map(from_bson_document))
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: Filter,
        session: Option<SessionId>,
    ) -> EngineResult<u64> {
        let filter = render_filter(&filter)?;
        let target = self.collection(collection);
        let result = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                target.delete_one(filter).session(session).await
            }
            None => target.delete_one(filter).await,
        }
        .map_err(|e| map_mongo_error("delete_one", collection, &e))?;
        Ok(result.deleted_count)
    }

    async fn distinct_values(
        &self,
        collection: &str,
        query: DistinctQuery,
        session: Option<SessionId>,
    ) -> EngineResult<Vec<serde_json::Value>> {
        let filter = render_filter(&query.filter)?;
        let mut pipeline = vec![
            doc! { "$match": filter },
            doc! { "$group": { "_id": format!("${}", query.field) } },
            doc! { "$sort": { "_id": 1 } },
        ];
        if query.skip > 0 {
            pipeline.push(doc! { "$skip": i64::try_from(query.skip).unwrap_or(i64::MAX) });
        }
        if query.limit > 0 {
            pipeline.push(doc! { "$limit": i64::try_from(query.limit).unwrap_or(i64::MAX) });
        }

        let target = self.collection(collection);
        let groups: Vec<BsonDocument> = match session {
            Some(id) => {
                let mut sessions = self.sessions.lock().await;
                let session = session_mut(&mut sessions, id)?;
                let mut cursor = target
                    .aggregate(pipeline)
                    .session(&mut *session)
                    .await
                    .map_err(|e| map_mongo_error("aggregate", collection, &e))?;
                cursor
                    .stream(session)
                    .try_collect()
                    .await
                    .map_err(|e| map_mongo_error("aggregate", collection, &e))?
            }
            None => target
                .aggregate(pipeline)
                .await
                .map_err(|e| map_mongo_error("aggregate", collection, &e))?
                .try_collect()
                .await
                .map_err(|e| map_mongo_error("aggregate", collection, &e))?,
        };

        Ok(groups
            .into_iter()
            .map(|mut group| from_bson(group.remove("_id").unwrap_or(Bson::Null)))
            .collect())
    }

    #[instrument(name = "mongodb.watch", skip(self), fields(collection_count = collections.len()))]
    async fn watch(&self, collections: &[String]) -> EngineResult<Box<dyn ChangeFeed>> {
        let pipeline = [doc! {
            "$match": {
                "ns.coll": { "$in": collections.to_vec() },
                "operationType": { "$in": ["insert", "invalidate"] },
            }
        }];
        let stream = self
            .database
            .watch()
            .pipeline(pipeline)
            .batch_size(CHANGE_STREAM_BATCH_SIZE)
            .await
            .map_err(|e| map_mongo_error("watch", self.database.name(), &e))?;
        Ok(Box::new(MongoChangeFeed { stream }))
    }

    #[instrument(name = "mongodb.start_transaction", skip(self))]
    async fn start_transaction(&self) -> EngineResult<SessionId> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| map_mongo_error("start_session", self.database.name(), &e))?;
        session
            .start_transaction()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .await
            .map_err(|e| map_mongo_error("start_transaction", self.database.name(), &e))?;

        let id = SessionId::new();
        self.sessions.lock().await.insert(id, session);
        debug!(session = %id, "[mongodb.start_transaction] transaction started");
        Ok(id)
    }

    #[instrument(name = "mongodb.commit_transaction", skip(self, session), fields(session = %session))]
    async fn commit_transaction(&self, session: SessionId) -> EngineResult<()> {
        let mut client_session = self
            .sessions
            .lock()
            .await
            .remove(&session)
            .ok_or_else(|| EngineError::SessionNotFound(session.to_string()))?;
        client_session
            .commit_transaction()
            .await
            .map_err(|e| map_mongo_error("commit_transaction", self.database.name(), &e))
    }

    #[instrument(name = "mongodb.abort_transaction", skip(self, session), fields(session = %session))]
    async fn abort_transaction(&self, session: SessionId) -> EngineResult<()> {
        let mut client_session = self
            .sessions
            .lock()
            .await
            .remove(&session)
            .ok_or_else(|| EngineError::SessionNotFound(session.to_string()))?;
        client_session
            .abort_transaction()
            .await
            .map_err(|e| map_mongo_error("abort_transaction", self.database.name(), &e))
    }
}

/// Database change stream restricted to inserts into the watched collections.
struct MongoChangeFeed {
    stream: ChangeStream<ChangeStreamEvent<BsonDocument>>,
}

fn to_change_event(event: ChangeStreamEvent<BsonDocument>) -> ChangeEvent {
    let operation = match event.operation_type {
        OperationType::Insert => ChangeOperation::Insert,
        OperationType::Invalidate => ChangeOperation::Invalidate,
        other => ChangeOperation::Other(format!("{other:?}")),
    };
    ChangeEvent {
        operation,
        collection: event.ns.and_then(|ns| ns.coll).unwrap_or_default(),
        full_document: event.full_document.map(from_bson_document),
        cluster_time: event
            .cluster_time
            .map_or_else(|| Utc::now().timestamp(), |ts| i64::from(ts.time)),
    }
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn try_next(&mut self) -> EngineResult<Option<ChangeEvent>> {
        let next = self
            .stream
            .next_if_any()
            .await
            .map_err(|e| map_mongo_error("change_stream", "", &e))?;
        Ok(next.map(to_change_event))
    }
}
