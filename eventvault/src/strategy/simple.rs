use std::sync::Arc;

use crate::document::{Document, IndexSpec};
use crate::errors::EventStoreResult;
use crate::message::{DefaultMessageConverter, Message, MessageConverter};

use super::{encode, PersistenceStrategy};

/// General multi-writer stream; ids from the sequence counter, only event ids are unique.
#[derive(Clone)]
pub struct SimpleStreamStrategy {
    converter: Arc<dyn MessageConverter>,
}

impl SimpleStreamStrategy {
    /// Strategy using the default message converter.
    pub fn new() -> Self {
        Self::with_converter(Arc::new(DefaultMessageConverter))
    }

    /// Strategy using a custom message converter.
    pub fn with_converter(converter: Arc<dyn MessageConverter>) -> Self {
        Self { converter }
    }
}

impl Default for SimpleStreamStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceStrategy for SimpleStreamStrategy {
    fn create_schema(&self, _collection_name: &str) -> Vec<IndexSpec> {
        vec![IndexSpec::unique("event_id", ["event_id"])]
    }

    fn prepare_data(
        &self,
        events: &[Message],
        next_sequence: &mut i64,
    ) -> EventStoreResult<Vec<Document>> {
        Ok(events
            .iter()
            .map(|event| {
                let document = encode(self.converter.convert_to_array(event), *next_sequence);
                *next_sequence += 1;
                document
            })
            .collect())
    }
}

impl std::fmt::Debug for SimpleStreamStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleStreamStrategy").finish_non_exhaustive()
    }
}
