//! Integration tests for the MongoDB document engine.
//!
//! These start a single-node replica set in a container and are ignored by
//! default; run them with `cargo test -p eventvault-mongodb -- --ignored`.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use eventvault::document::{document, DistinctQuery, Filter, FindOptions, IndexSpec, Update};
use eventvault::engine::DocumentEngine;
use eventvault::errors::EngineError;
use eventvault::{
    Collections, DocumentEventStore, EventStore, Message, SimpleStreamStrategy, Stream, StreamName,
};
use eventvault_mongodb::{MongoConfig, MongoDocumentEngine};
use serde_json::json;
use testcontainers::{core::WaitFor, runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};

const MONGO_VERSION: &str = "7.0";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("eventvault=debug")),
        )
        .with_test_writer()
        .try_init();
}

async fn setup_mongo_container() -> (ContainerAsync<GenericImage>, MongoDocumentEngine) {
    init_tracing();
    let container = GenericImage::new("mongo", MONGO_VERSION)
        .with_wait_for(WaitFor::message_on_stdout("Waiting for connections"))
        .with_cmd(["--replSet", "rs0", "--bind_ip_all"])
        .start()
        .await
        .unwrap();
    let port = container.get_host_port_ipv4(27017).await.unwrap();

    let config = MongoConfig::new(
        format!("mongodb://localhost:{port}/?directConnection=true"),
        "eventvault_test",
    )
    .with_server_selection_timeout(Duration::from_secs(10));
    let engine = MongoDocumentEngine::connect(config).await.unwrap();

    engine
        .client()
        .database("admin")
        .run_command(bson::doc! {
            "replSetInitiate": {
                "_id": "rs0",
                "members": [{ "_id": 0, "host": "localhost:27017" }],
            }
        })
        .await
        .unwrap();

    // Give the node a moment to become primary
    tokio::time::sleep(Duration::from_secs(2)).await;

    (container, engine)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn counter_reservation_returns_the_updated_document() {
    let (_container, engine) = setup_mongo_container().await;

    // Given: a counter document
    engine
        .insert_one("counter", document(json!({"_id": "c", "seq": 1})), None)
        .await
        .unwrap();

    // When: reserving three ids
    let updated = engine
        .find_one_and_update("counter", Filter::eq("_id", "c"), Update::inc("seq", 3), None)
        .await
        .unwrap()
        .unwrap();

    // Then: the document after the update is returned
    assert_eq!(updated["seq"], json!(4));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn unique_index_violations_map_to_duplicate_key() {
    let (_container, engine) = setup_mongo_container().await;

    // Given: a collection with a unique index
    engine
        .create_indexes("registry", &[IndexSpec::unique("ix_name", ["name"])], None)
        .await
        .unwrap();
    engine
        .insert_one("registry", document(json!({"name": "a"})), None)
        .await
        .unwrap();

    // When: inserting the same key again
    let result = engine
        .insert_many("registry", vec![document(json!({"name": "a"}))], None)
        .await;

    // Then: the engine reports a duplicate key
    assert!(matches!(result, Err(EngineError::DuplicateKey { .. })));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn distinct_values_are_sorted_and_paged() {
    let (_container, engine) = setup_mongo_container().await;

    // Given: registry rows in three categories
    let rows = ["user", "order", "user", "audit"]
        .iter()
        .map(|category| document(json!({"category": category})))
        .collect();
    engine.insert_many("registry", rows, None).await.unwrap();

    // When: listing distinct categories after the first
    let values = engine
        .distinct_values(
            "registry",
            DistinctQuery {
                filter: Filter::all(),
                field: "category".to_string(),
                skip: 1,
                limit: 10,
            },
            None,
        )
        .await
        .unwrap();

    // Then: the remaining groups come back sorted
    assert_eq!(values, vec![json!("order"), json!("user")]);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn aborted_transactions_leave_no_writes() {
    let (_container, engine) = setup_mongo_container().await;
    engine.create_indexes("tx", &[], None).await.unwrap();

    // Given: an insert inside a transaction
    let session = engine.start_transaction().await.unwrap();
    engine
        .insert_one("tx", document(json!({"_id": 1})), Some(session))
        .await
        .unwrap();

    // When: the transaction is aborted
    engine.abort_transaction(session).await.unwrap();

    // Then: nothing was written
    let found = engine
        .find("tx", FindOptions::new(Filter::all()), None)
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn event_store_round_trip_on_mongodb() {
    let (_container, engine) = setup_mongo_container().await;
    let engine: Arc<dyn DocumentEngine> = Arc::new(engine);
    Collections::new(Arc::clone(&engine))
        .create_event_streams_collection()
        .await
        .unwrap();
    let store = DocumentEventStore::new(engine, Arc::new(SimpleStreamStrategy::new()));
    let name = StreamName::try_new("user-123".to_string()).unwrap();

    // Given: a stream with two events
    store
        .create(Stream::new(
            name.clone(),
            vec![
                Message::new("UserRegistered", document(json!({"name": "Ada"}))),
                Message::new("UserRenamed", document(json!({"name": "Grace"}))),
            ],
        ))
        .await
        .unwrap();

    // When: loading it from the start
    let loaded = store
        .load(&name, 1, None, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    // Then: both events come back with positions 1 and 2
    let positions: Vec<i64> = loaded.iter().map(|(position, _)| *position).collect();
    assert_eq!(positions, vec![1, 2]);
    assert_eq!(loaded[1].1.message_name(), "UserRenamed");
}
