use std::sync::Arc;

use crate::document::{Document, IndexSpec};
use crate::errors::{EventStoreError, EventStoreResult};
use crate::message::{
    DefaultMessageConverter, Message, MessageConverter, AGGREGATE_ID_KEY, AGGREGATE_TYPE_KEY,
    AGGREGATE_VERSION_KEY,
};

use super::{encode, PersistenceStrategy};

/// Many aggregates share one collection, partitioned by
/// `(aggregate_type, aggregate_id, aggregate_version)`.
#[derive(Clone)]
pub struct SingleStreamStrategy {
    converter: Arc<dyn MessageConverter>,
}

impl SingleStreamStrategy {
    /// Strategy using the default message converter.
    pub fn new() -> Self {
        Self::with_converter(Arc::new(DefaultMessageConverter))
    }

    /// Strategy using a custom message converter.
    pub fn with_converter(converter: Arc<dyn MessageConverter>) -> Self {
        Self { converter }
    }
}

impl Default for SingleStreamStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceStrategy for SingleStreamStrategy {
    fn create_schema(&self, _collection_name: &str) -> Vec<IndexSpec> {
        vec![
            IndexSpec::unique(
                "aggregate",
                [
                    format!("metadata.{AGGREGATE_TYPE_KEY}"),
                    format!("metadata.{AGGREGATE_ID_KEY}"),
                    format!("metadata.{AGGREGATE_VERSION_KEY}"),
                ],
            ),
            IndexSpec::unique("event_id", ["event_id"]),
        ]
    }

    fn prepare_data(
        &self,
        events: &[Message],
        next_sequence: &mut i64,
    ) -> EventStoreResult<Vec<Document>> {
        let mut data = Vec::with_capacity(events.len());
        for event in events {
            if event.metadata().get(AGGREGATE_VERSION_KEY).is_none() {
                return Err(EventStoreError::MissingAggregateVersion(event.uuid().to_string()));
            }
            data.push(encode(self.converter.convert_to_array(event), *next_sequence));
            *next_sequence += 1;
        }
        Ok(data)
    }
}

impl std::fmt::Debug for SingleStreamStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleStreamStrategy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_come_from_the_counter() {
        let strategy = SingleStreamStrategy::new();
        let events: Vec<_> = (1..=3)
            .map(|v| Message::new("Renamed", Document::new()).with_added_metadata(AGGREGATE_VERSION_KEY, v))
            .collect();
        let mut next = 10;
        let data = strategy.prepare_data(&events, &mut next).unwrap();
        let ids: Vec<_> = data.iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(10), json!(11), json!(12)]);
        assert_eq!(next, 13);
    }

    #[test]
    fn schema_guards_aggregate_and_event_id() {
        let schema = SingleStreamStrategy::new().create_schema("_x");
        assert_eq!(schema.len(), 2);
        assert!(schema.iter().all(|index| index.unique));
        assert_eq!(schema[0].keys.len(), 3);
    }
}
