//! Sequencing and conflict behaviour of the persistence strategies.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use eventvault::message::{AGGREGATE_ID_KEY, AGGREGATE_TYPE_KEY};
use eventvault::{EventStore, EventStoreError, Stream};
use eventvault_integration_tests::{event, stream, versioned, Fixture, StrategyKind};
use serde_json::{json, Value};

#[tokio::test]
async fn aggregate_versions_are_the_positions() {
    let fixture = Fixture::aggregate().await;
    let name = stream("user-1");
    fixture
        .store
        .create(Stream::new(
            name.clone(),
            vec![versioned("UserCreated", 1, json!({})), versioned("UserRenamed", 2, json!({}))],
        ))
        .await
        .unwrap();
    fixture
        .store
        .append_to(&name, vec![versioned("UserRenamed", 5, json!({}))])
        .await
        .unwrap();

    let positions: Vec<i64> = fixture
        .store
        .load(&name, 1, None, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap()
        .into_iter()
        .map(|(position, _)| position)
        .collect();

    assert_eq!(positions, vec![1, 2, 5]);
}

#[tokio::test]
async fn reused_aggregate_version_is_a_concurrency_conflict() {
    let fixture = Fixture::aggregate().await;
    let name = stream("user-2");
    fixture
        .store
        .create(Stream::new(name.clone(), vec![versioned("UserCreated", 1, json!({}))]))
        .await
        .unwrap();

    // When: a second writer appends the same version
    let result = fixture
        .store
        .append_to(&name, vec![versioned("UserRenamed", 1, json!({}))])
        .await;

    // Then: the optimistic concurrency check fails and nothing is written
    assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { ref stream, .. }) if stream == "user-2"));
    let events = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.message_name(), "UserCreated");
}

#[tokio::test]
async fn versioned_strategies_require_an_aggregate_version() {
    for kind in [StrategyKind::Aggregate, StrategyKind::Single] {
        let fixture = Fixture::new(kind).await;
        let name = stream("user-3");
        fixture.store.create(Stream::new(name.clone(), Vec::new())).await.unwrap();

        let result = fixture
            .store
            .append_to(&name, vec![event("UserCreated", json!({}))])
            .await;

        assert!(
            matches!(result, Err(EventStoreError::MissingAggregateVersion(_))),
            "{kind:?} accepted an unversioned event"
        );
    }
}

fn aggregate_event(aggregate_id: &str, version: i64) -> eventvault::Message {
    versioned("Deposited", version, json!({"amount": 10}))
        .with_added_metadata(AGGREGATE_TYPE_KEY, "account")
        .with_added_metadata(AGGREGATE_ID_KEY, aggregate_id)
}

#[tokio::test]
async fn single_stream_partitions_by_aggregate() {
    let fixture = Fixture::new(StrategyKind::Single).await;
    let name = stream("accounts");

    // Given: two aggregates sharing one stream
    fixture
        .store
        .create(Stream::new(
            name.clone(),
            vec![aggregate_event("a", 1), aggregate_event("b", 1), aggregate_event("a", 2)],
        ))
        .await
        .unwrap();

    // When: aggregate "b" is written again at an already used version
    let conflict = fixture.store.append_to(&name, vec![aggregate_event("b", 1)]).await;
    fixture.store.append_to(&name, vec![aggregate_event("b", 2)]).await.unwrap();

    // Then: the reuse conflicts while the stream keeps counter positions
    assert!(matches!(conflict, Err(EventStoreError::ConcurrencyConflict { .. })));
    let events = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();
    let ids: Vec<(i64, Value)> = events
        .iter()
        .map(|(position, message)| (*position, message.metadata()[AGGREGATE_ID_KEY].clone()))
        .collect();
    // The conflicting append reserved position 4 before it failed.
    assert_eq!(
        ids,
        vec![(1, json!("a")), (2, json!("b")), (3, json!("a")), (5, json!("b"))]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_reserve_disjoint_contiguous_ranges() {
    let fixture = Fixture::simple().await;
    let name = stream("orders");
    fixture.store.create(Stream::new(name.clone(), Vec::new())).await.unwrap();

    // When: eight writers append batches of sizes 1 through 8 at once
    let mut writers = Vec::new();
    for writer in 1..=8_i64 {
        let store = fixture.store.clone();
        let name = name.clone();
        writers.push(tokio::spawn(async move {
            let batch = (0..writer)
                .map(|seq| event("OrderPlaced", json!({"writer": writer, "seq": seq})))
                .collect();
            store.append_to(&name, batch).await
        }));
    }
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    // Then: positions cover 1..=36 exactly once and each batch is contiguous
    let events = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();
    let positions: Vec<i64> = events.iter().map(|(position, _)| *position).collect();
    assert_eq!(positions, (1..=36).collect::<Vec<_>>());

    let mut by_writer: BTreeMap<i64, Vec<(i64, i64)>> = BTreeMap::new();
    for (position, message) in &events {
        let writer = message.payload()["writer"].as_i64().unwrap();
        let seq = message.payload()["seq"].as_i64().unwrap();
        by_writer.entry(writer).or_default().push((seq, *position));
    }
    for (writer, mut entries) in by_writer {
        entries.sort_unstable();
        assert_eq!(entries.len() as i64, writer);
        let first = entries[0].1;
        for (seq, position) in entries {
            assert_eq!(position, first + seq, "writer {writer} got a split range");
        }
    }
}
