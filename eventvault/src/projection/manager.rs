use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument};

use crate::collections::DEFAULT_PROJECTIONS_COLLECTION;
use crate::document::{Document, Filter, FindOptions, SortOrder, Update};
use crate::errors::{ProjectionError, ProjectionResult, INVALID_REGEX_MESSAGE};
use crate::event_store::{DocumentBackend, EventStore};
use crate::types::ProjectionName;

use super::position::StreamPositions;
use super::projector::{Projector, ProjectorOptions};
use super::status::ProjectionStatus;

/// Creates projectors and controls running ones through their rows.
///
/// Commands are asynchronous: the manager writes a status into the row and
/// the projector owning the lock acts on it at its next checkpoint.
pub struct ProjectionManager {
    store: Arc<dyn EventStore>,
    backend: DocumentBackend,
    projections_collection: String,
}

impl ProjectionManager {
    /// Manager over a document backed store.
    pub fn new(store: Arc<dyn EventStore>) -> ProjectionResult<Self> {
        let backend = store.document_backend().ok_or_else(|| {
            ProjectionError::InvalidArgument("Unknown event store instance given".to_string())
        })?;
        Ok(Self {
            store,
            backend,
            projections_collection: DEFAULT_PROJECTIONS_COLLECTION.to_string(),
        })
    }

    /// Use another projections collection.
    #[must_use]
    pub fn with_projections_collection(mut self, name: impl Into<String>) -> Self {
        self.projections_collection = name.into();
        self
    }

    /// Name of the projections collection.
    pub fn projections_collection(&self) -> &str {
        &self.projections_collection
    }

    /// A projector bound to this manager's store and projections collection.
    pub fn create_projection(
        &self,
        name: ProjectionName,
        options: ProjectorOptions,
    ) -> ProjectionResult<Projector> {
        Projector::new(
            Arc::clone(&self.store),
            name,
            options.with_projections_collection(self.projections_collection.clone()),
        )
    }

    /// Ask a running projection to stop.
    pub async fn stop_projection(&self, name: &str) -> ProjectionResult<()> {
        self.command(name, ProjectionStatus::Stopping).await
    }

    /// Ask a projection to reset.
    pub async fn reset_projection(&self, name: &str) -> ProjectionResult<()> {
        self.command(name, ProjectionStatus::Resetting).await
    }

    /// Ask a projection to delete itself, optionally with its output stream.
    pub async fn delete_projection(
        &self,
        name: &str,
        delete_emitted_events: bool,
    ) -> ProjectionResult<()> {
        let status = if delete_emitted_events {
            ProjectionStatus::DeletingInclEmittedEvents
        } else {
            ProjectionStatus::Deleting
        };
        self.command(name, status).await
    }

    #[instrument(name = "projection_manager.command", skip(self), fields(projection = name, status = %status))]
    async fn command(&self, name: &str, status: ProjectionStatus) -> ProjectionResult<()> {
        let outcome = self
            .backend
            .engine
            .update_one(
                &self.projections_collection,
                Filter::eq("name", name),
                Update::set("status", status.as_str()),
                None,
            )
            .await?;

        if outcome.matched != 1 {
            return Err(ProjectionError::NotFound(name.to_string()));
        }
        info!("[projection_manager.command] status written");
        Ok(())
    }

    /// Projection names equal to `filter` (or all), sorted.
    pub async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> ProjectionResult<Vec<String>> {
        let filter = filter.map_or_else(Filter::all, |name| Filter::eq("name", name));
        self.find_names(filter, limit, offset).await
    }

    /// Projection names matching a regular expression, sorted.
    pub async fn fetch_projection_names_regex(
        &self,
        regex: &str,
        limit: usize,
        offset: usize,
    ) -> ProjectionResult<Vec<String>> {
        if regex.is_empty() || fancy_regex::Regex::new(regex).is_err() {
            return Err(ProjectionError::InvalidArgument(
                INVALID_REGEX_MESSAGE.to_string(),
            ));
        }
        self.find_names(
            Filter::Regex("name".to_string(), regex.to_string()),
            limit,
            offset,
        )
        .await
    }

    #[instrument(name = "projection_manager.fetch_names", skip(self, filter))]
    async fn find_names(
        &self,
        filter: Filter,
        limit: usize,
        offset: usize,
    ) -> ProjectionResult<Vec<String>> {
        if limit == 0 {
            return Err(ProjectionError::InvalidArgument(
                "limit must be a positive number".to_string(),
            ));
        }
        self.ensure_collection().await?;

        let rows = self
            .backend
            .engine
            .find(
                &self.projections_collection,
                FindOptions::new(filter)
                    .sort("name", SortOrder::Ascending)
                    .skip(offset)
                    .limit(limit)
                    .projection(["name"]),
                None,
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Status stored in the projection row.
    pub async fn fetch_projection_status(&self, name: &str) -> ProjectionResult<ProjectionStatus> {
        let row = self.fetch_row(name, "status").await?;
        row.get("status")
            .and_then(Value::as_str)
            .map_or(Ok(ProjectionStatus::Idle), str::parse)
    }

    /// Checkpointed stream positions of a projection.
    pub async fn fetch_projection_stream_positions(
        &self,
        name: &str,
    ) -> ProjectionResult<StreamPositions> {
        let row = self.fetch_row(name, "position").await?;
        Ok(match row.get("position") {
            Some(Value::Object(position)) => StreamPositions::from_document(position),
            _ => StreamPositions::new(),
        })
    }

    /// Checkpointed state of a projection.
    pub async fn fetch_projection_state(&self, name: &str) -> ProjectionResult<Document> {
        let row = self.fetch_row(name, "state").await?;
        Ok(match row.get("state") {
            Some(Value::Object(state)) => state.clone(),
            _ => Document::new(),
        })
    }

    async fn fetch_row(&self, name: &str, field: &str) -> ProjectionResult<Document> {
        self.backend
            .engine
            .find(
                &self.projections_collection,
                FindOptions::new(Filter::eq("name", name))
                    .projection([field])
                    .limit(1),
                None,
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProjectionError::NotFound(name.to_string()))
    }

    async fn ensure_collection(&self) -> ProjectionResult<()> {
        if self
            .backend
            .engine
            .collection_exists(&self.projections_collection)
            .await?
        {
            Ok(())
        } else {
            Err(ProjectionError::CollectionNotSetup(
                self.projections_collection.clone(),
            ))
        }
    }
}

impl std::fmt::Debug for ProjectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionManager")
            .field("backend", &self.backend)
            .field("projections_collection", &self.projections_collection)
            .finish_non_exhaustive()
    }
}
