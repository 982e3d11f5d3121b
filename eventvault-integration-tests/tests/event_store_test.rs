//! Stream lifecycle, loading and listing against the in-memory engine.

#![allow(missing_docs)]

use eventvault::strategy::hashed_collection_name;
use eventvault::{
    document, DocumentEventStore, EventStore, EventStoreConfig, EventStoreError, FieldType,
    MetadataMatcher, Operator, SimpleStreamStrategy, Stream,
};
use eventvault_integration_tests::{event, stream, versioned, Fixture};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn created_aggregate_stream_loads_its_first_event() {
    let fixture = Fixture::aggregate().await;
    let name = stream("user-123");

    // Given: a stream created with one event at version 1
    fixture
        .store
        .create(Stream::new(
            name.clone(),
            vec![versioned("UserCreated", 1, json!({"name": "Alex"}))],
        ))
        .await
        .unwrap();

    // When: loading from position 1
    let events = fixture
        .store
        .load(&name, 1, None, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    // Then: exactly that event comes back at position 1
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 1);
    assert_eq!(events[0].1.message_name(), "UserCreated");
    assert_eq!(events[0].1.position(), Some(1));
}

#[tokio::test]
async fn forward_and_reverse_loads_mirror_append_order() {
    let fixture = Fixture::simple().await;
    let name = stream("order-1");

    // Given: events written by create and two appends
    fixture
        .store
        .create(Stream::new(name.clone(), vec![event("A", json!({"n": 1}))]))
        .await
        .unwrap();
    fixture
        .store
        .append_to(&name, vec![event("B", json!({"n": 2})), event("C", json!({"n": 3}))])
        .await
        .unwrap();
    fixture
        .store
        .append_to(&name, vec![event("D", json!({"n": 4}))])
        .await
        .unwrap();

    // When: loading in both directions
    let forward = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();
    let backward = fixture
        .store
        .load_reverse(&name, None, None, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    // Then: forward is append order and reverse is its mirror image
    let forward_names: Vec<_> = forward.iter().map(|(p, m)| (*p, m.message_name().to_string())).collect();
    assert_eq!(
        forward_names,
        vec![(1, "A".to_string()), (2, "B".to_string()), (3, "C".to_string()), (4, "D".to_string())]
    );
    let mut mirrored: Vec<_> = backward.iter().map(|(p, m)| (*p, m.message_name().to_string())).collect();
    mirrored.reverse();
    assert_eq!(mirrored, forward_names);
}

#[tokio::test]
async fn windows_are_bounded_by_start_and_count() {
    let fixture = Fixture::simple().await;
    let name = stream("window-1");
    let events = (1..=6).map(|n| event("Tick", json!({"n": n}))).collect();
    fixture.store.create(Stream::new(name.clone(), events)).await.unwrap();

    // When: reading two events from position 3 forwards and from 4 backwards
    let forward = fixture.store.load(&name, 3, Some(2), None).await.unwrap().collect_all().await.unwrap();
    let backward = fixture
        .store
        .load_reverse(&name, Some(4), Some(2), None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    // Then: only the requested windows are returned
    assert_eq!(forward.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(backward.iter().map(|(p, _)| *p).collect::<Vec<_>>(), vec![4, 3]);
}

#[tokio::test]
async fn small_batches_refill_until_the_stream_is_exhausted() {
    let fixture = Fixture::simple().await;
    let store = DocumentEventStore::with_config(
        fixture.engine.clone(),
        Arc::new(SimpleStreamStrategy::new()),
        EventStoreConfig::default().with_load_batch_size(2),
    )
    .unwrap();
    let name = stream("batched-1");
    let events = (1..=5).map(|n| event("Tick", json!({"n": n}))).collect();
    store.create(Stream::new(name.clone(), events)).await.unwrap();

    // When: draining a cursor with a page size of two, then rewinding it
    let mut cursor = store.load(&name, 1, None, None).await.unwrap();
    let mut first_pass = Vec::new();
    while let Some((position, _)) = cursor.next().await.unwrap() {
        first_pass.push(position);
    }
    cursor.rewind().await.unwrap();
    let second_pass = cursor.collect_all().await.unwrap();

    // Then: every event is yielded once per pass and in order
    assert_eq!(first_pass, vec![1, 2, 3, 4, 5]);
    assert_eq!(second_pass.len(), 5);
    assert_eq!(second_pass[4].0, 5);
}

#[tokio::test]
async fn zero_batch_size_is_a_configuration_error() {
    let fixture = Fixture::simple().await;
    let result = DocumentEventStore::with_config(
        fixture.engine.clone(),
        Arc::new(SimpleStreamStrategy::new()),
        EventStoreConfig::default().with_load_batch_size(0),
    );
    assert!(matches!(result, Err(EventStoreError::Configuration(_))));
}

#[tokio::test]
async fn stored_events_round_trip_with_microsecond_timestamps() {
    let fixture = Fixture::simple().await;
    let name = stream("round-1");
    let original = event("UserCreated", json!({"name": "Alex", "tags": ["a", "b"]}))
        .with_added_metadata("trace", "abc");

    // Given: a stored event
    fixture
        .store
        .create(Stream::new(name.clone(), vec![original.clone()]))
        .await
        .unwrap();

    // When: it is read back
    let loaded = fixture.store.load(&name, 1, None, None).await.unwrap().messages().await.unwrap();

    // Then: identity, payload, metadata and timestamp survive, with the position added
    let restored = &loaded[0];
    assert_eq!(restored.uuid(), original.uuid());
    assert_eq!(restored.message_name(), original.message_name());
    assert_eq!(restored.payload(), original.payload());
    assert_eq!(restored.created_at(), original.created_at());
    assert_eq!(restored.metadata().get("trace"), Some(&json!("abc")));
    assert_eq!(restored.position(), Some(1));
}

#[tokio::test]
async fn authored_position_metadata_is_preserved() {
    let fixture = Fixture::simple().await;
    let name = stream("linked-1");
    let linked = event("Linked", json!({})).with_added_metadata("_position", 42);
    fixture.store.create(Stream::new(name.clone(), vec![linked])).await.unwrap();

    let loaded = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();

    assert_eq!(loaded[0].0, 1);
    assert_eq!(loaded[0].1.position(), Some(42));
}

#[tokio::test]
async fn missing_streams_are_reported() {
    let fixture = Fixture::simple().await;
    let name = stream("ghost-1");

    let appended = fixture.store.append_to(&name, vec![event("A", json!({}))]).await;
    let loaded = fixture.store.load(&name, 1, None, None).await;
    let reversed = fixture.store.load_reverse(&name, None, None, None).await;

    assert!(matches!(appended, Err(EventStoreError::StreamNotFound(_))));
    assert!(matches!(loaded, Err(EventStoreError::StreamNotFound(_))));
    assert!(matches!(reversed, Err(EventStoreError::StreamNotFound(_))));
}

#[tokio::test]
async fn empty_appends_are_no_ops() {
    let fixture = Fixture::simple().await;
    let name = stream("quiet-1");
    fixture.store.create(Stream::new(name.clone(), Vec::new())).await.unwrap();

    fixture.store.append_to(&name, Vec::new()).await.unwrap();

    assert_eq!(fixture.engine.document_count(&hashed_collection_name("quiet-1")), 0);
    assert!(fixture.store.has_stream(&name).await.unwrap());
}

#[tokio::test]
async fn creating_an_existing_stream_fails_without_touching_it() {
    for fixture in [Fixture::simple().await, Fixture::aggregate().await] {
        let name = stream("user-7");
        fixture
            .store
            .create(Stream::new(name.clone(), vec![versioned("UserCreated", 1, json!({}))]))
            .await
            .unwrap();

        // When: the same stream is created again
        let result = fixture
            .store
            .create(Stream::new(name.clone(), vec![versioned("UserCreated", 1, json!({}))]))
            .await;

        // Then: the collision is reported and the original stream is intact
        assert!(matches!(result, Err(EventStoreError::StreamExistsAlready(ref s)) if s == "user-7"));
        let events = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();
        assert_eq!(events.len(), 1);
    }
}

#[tokio::test]
async fn physical_collections_are_named_by_hash() {
    let fixture = Fixture::simple().await;
    fixture
        .store
        .create(Stream::new(stream("user-123"), Vec::new()))
        .await
        .unwrap();

    let names = fixture.engine.collection_names();

    assert!(names.contains(&hashed_collection_name("user-123")));
    assert!(!names.contains(&"user-123".to_string()));
}

#[tokio::test]
async fn deleted_streams_can_be_created_again_from_position_one() {
    let fixture = Fixture::simple().await;
    let name = stream("cart-9");
    fixture
        .store
        .create(Stream::new(name.clone(), vec![event("A", json!({})), event("B", json!({}))]))
        .await
        .unwrap();

    // When: the stream is deleted
    fixture.store.delete(&name).await.unwrap();

    // Then: it is gone, a second delete fails and a re-created stream starts over
    assert!(!fixture.store.has_stream(&name).await.unwrap());
    assert!(!fixture.engine.collection_names().contains(&hashed_collection_name("cart-9")));
    assert!(matches!(
        fixture.store.delete(&name).await,
        Err(EventStoreError::StreamNotFound(_))
    ));

    fixture
        .store
        .create(Stream::new(name.clone(), vec![event("C", json!({}))]))
        .await
        .unwrap();
    let events = fixture.store.load(&name, 1, None, None).await.unwrap().collect_all().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 1);
    assert_eq!(events[0].1.message_name(), "C");
}

#[tokio::test]
async fn metadata_matchers_filter_loaded_events() {
    let fixture = Fixture::simple().await;
    let name = stream("mixed-1");
    let events = vec![
        event("UserCreated", json!({})).with_added_metadata("kind", "a").with_added_metadata("rank", 1),
        event("UserRenamed", json!({})).with_added_metadata("kind", "b").with_added_metadata("rank", 2),
        event("UserRenamed", json!({})).with_added_metadata("kind", "a").with_added_metadata("rank", 3),
        event("UserDeleted", json!({})).with_added_metadata("rank", 4),
    ];
    fixture.store.create(Stream::new(name.clone(), events)).await.unwrap();

    let load = |matcher: MetadataMatcher| {
        let store = fixture.store.clone();
        let name = name.clone();
        async move {
            store
                .load(&name, 1, None, Some(&matcher))
                .await
                .unwrap()
                .collect_all()
                .await
                .unwrap()
                .into_iter()
                .map(|(position, _)| position)
                .collect::<Vec<_>>()
        }
    };

    let equals = load(MetadataMatcher::new().with_metadata_match("kind", Operator::Equals, "a")).await;
    let not_equals = load(MetadataMatcher::new().with_metadata_match("kind", Operator::NotEquals, "a")).await;
    let ranked = load(
        MetadataMatcher::new()
            .with_metadata_match("rank", Operator::GreaterThan, 1)
            .with_metadata_match("rank", Operator::LowerThanEquals, 3),
    )
    .await;
    let listed = load(MetadataMatcher::new().with_metadata_match("rank", Operator::In, json!([1, 4]))).await;
    let by_name = load(MetadataMatcher::new().with_match(
        "event_name",
        FieldType::MessageProperty,
        Operator::Regex,
        "Renamed$",
    ))
    .await;

    assert_eq!(equals, vec![1, 3]);
    // The event without a kind is not "different from a", it has none.
    assert_eq!(not_equals, vec![2]);
    assert_eq!(ranked, vec![2, 3]);
    assert_eq!(listed, vec![1, 4]);
    assert_eq!(by_name, vec![2, 3]);
}

#[tokio::test]
async fn stream_names_are_listed_sorted_and_paged() {
    let fixture = Fixture::simple().await;
    for (name, tier) in [("user-2", "gold"), ("user-1", "free"), ("order-1", "gold"), ("audit", "free")] {
        fixture
            .store
            .create(Stream::new(stream(name), Vec::new()).with_metadata(document(json!({"tier": tier}))))
            .await
            .unwrap();
    }

    let all = fixture.store.fetch_stream_names(None, None, 10, 0).await.unwrap();
    let page = fixture.store.fetch_stream_names(None, None, 2, 1).await.unwrap();
    let exact = fixture.store.fetch_stream_names(Some("user-1"), None, 10, 0).await.unwrap();
    let users = fixture.store.fetch_stream_names_regex("^user-", None, 10, 0).await.unwrap();
    let gold = MetadataMatcher::new().with_metadata_match("tier", Operator::Equals, "gold");
    let gold_streams = fixture.store.fetch_stream_names(None, Some(&gold), 10, 0).await.unwrap();

    let as_strings = |names: Vec<eventvault::StreamName>| names.into_iter().map(|n| n.to_string()).collect::<Vec<_>>();
    assert_eq!(as_strings(all), vec!["audit", "order-1", "user-1", "user-2"]);
    assert_eq!(as_strings(page), vec!["order-1", "user-1"]);
    assert_eq!(as_strings(exact), vec!["user-1"]);
    assert_eq!(as_strings(users), vec!["user-1", "user-2"]);
    assert_eq!(as_strings(gold_streams), vec!["order-1", "user-2"]);
}

#[tokio::test]
async fn categories_are_distinct_and_skip_uncategorised_streams() {
    let fixture = Fixture::simple().await;
    for name in ["user-2", "user-1", "order-1", "audit", "invoice-3"] {
        fixture.store.create(Stream::new(stream(name), Vec::new())).await.unwrap();
    }

    let all = fixture.store.fetch_category_names(None, 10, 0).await.unwrap();
    let paged = fixture.store.fetch_category_names(None, 1, 1).await.unwrap();
    let exact = fixture.store.fetch_category_names(Some("user"), 10, 0).await.unwrap();
    let matching = fixture.store.fetch_category_names_regex("^(order|user)$", 10, 0).await.unwrap();

    assert_eq!(all, vec!["invoice", "order", "user"]);
    assert_eq!(paged, vec!["order"]);
    assert_eq!(exact, vec!["user"]);
    assert_eq!(matching, vec!["order", "user"]);
}

#[tokio::test]
async fn invalid_regex_is_rejected_before_querying() {
    let fixture = Fixture::simple().await;

    // When: listing with an uncompilable pattern
    let streams = fixture.store.fetch_stream_names_regex("invalid)", None, 10, 0).await;
    let categories = fixture.store.fetch_category_names_regex("invalid)", 10, 0).await;

    // Then: both fail with the fixed invalid-argument message
    match streams {
        Err(EventStoreError::InvalidArgument(message)) => {
            assert_eq!(message, "Invalid regex pattern given");
        }
        other => panic!("expected invalid argument, got {other:?}"),
    }
    assert!(matches!(categories, Err(EventStoreError::InvalidArgument(_))));
}

#[tokio::test]
async fn lookahead_patterns_reach_the_engine() {
    let fixture = Fixture::simple().await;
    for name in ["user-1", "user-2", "order-1"] {
        fixture.store.create(Stream::new(stream(name), Vec::new())).await.unwrap();
    }

    // When: listing with patterns that need lookaround
    let not_users = fixture
        .store
        .fetch_stream_names_regex("^(?!user-)", None, 10, 0)
        .await
        .unwrap();
    let categories = fixture
        .store
        .fetch_category_names_regex("^(?=u)", 10, 0)
        .await
        .unwrap();

    // Then: they are evaluated instead of rejected
    let names: Vec<String> = not_users.into_iter().map(|n| n.to_string()).collect();
    assert_eq!(names, vec!["order-1"]);
    assert_eq!(categories, vec!["user"]);
}

#[tokio::test]
async fn zero_limits_are_rejected() {
    let fixture = Fixture::simple().await;

    assert!(matches!(
        fixture.store.fetch_stream_names(None, None, 0, 0).await,
        Err(EventStoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        fixture.store.fetch_category_names(None, 0, 0).await,
        Err(EventStoreError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn stream_metadata_can_be_read_and_replaced() {
    let fixture = Fixture::simple().await;
    let name = stream("user-5");
    fixture
        .store
        .create(Stream::new(name.clone(), Vec::new()).with_metadata(document(json!({"tier": "free"}))))
        .await
        .unwrap();

    fixture
        .store
        .update_stream_metadata(&name, document(json!({"tier": "gold"})))
        .await
        .unwrap();

    assert_eq!(
        fixture.store.fetch_stream_metadata(&name).await.unwrap(),
        document(json!({"tier": "gold"}))
    );
    assert!(matches!(
        fixture.store.fetch_stream_metadata(&stream("user-6")).await,
        Err(EventStoreError::StreamNotFound(_))
    ));
    assert!(matches!(
        fixture.store.update_stream_metadata(&stream("user-6"), document(json!({}))).await,
        Err(EventStoreError::StreamNotFound(_))
    ));
}
