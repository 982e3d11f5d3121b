use std::sync::Arc;

use crate::document::{Document, IndexSpec};
use crate::errors::{EventStoreError, EventStoreResult};
use crate::message::{DefaultMessageConverter, Message, MessageConverter, AGGREGATE_VERSION_KEY};

use super::{encode, PersistenceStrategy};

/// One stream per aggregate instance; the aggregate version is the sequence id.
#[derive(Clone)]
pub struct AggregateStreamStrategy {
    converter: Arc<dyn MessageConverter>,
}

impl AggregateStreamStrategy {
    /// Strategy using the default message converter.
    pub fn new() -> Self {
        Self::with_converter(Arc::new(DefaultMessageConverter))
    }

    /// Strategy using a custom message converter.
    pub fn with_converter(converter: Arc<dyn MessageConverter>) -> Self {
        Self { converter }
    }
}

impl Default for AggregateStreamStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceStrategy for AggregateStreamStrategy {
    fn create_schema(&self, _collection_name: &str) -> Vec<IndexSpec> {
        vec![IndexSpec::unique(
            "aggregate_version",
            [format!("metadata.{AGGREGATE_VERSION_KEY}")],
        )]
    }

    fn prepare_data(
        &self,
        events: &[Message],
        _next_sequence: &mut i64,
    ) -> EventStoreResult<Vec<Document>> {
        events
            .iter()
            .map(|event| {
                let version = event
                    .aggregate_version()
                    .ok_or_else(|| EventStoreError::MissingAggregateVersion(event.uuid().to_string()))?;
                Ok(encode(self.converter.convert_to_array(event), version))
            })
            .collect()
    }

    fn uses_sequence_counter(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for AggregateStreamStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStreamStrategy").finish_non_exhaustive()
    }
}
