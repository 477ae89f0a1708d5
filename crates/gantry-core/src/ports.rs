//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external
//! adapters.

use crate::events::Event;
use crate::ids::*;
use crate::run::Run;
use crate::workflow::{Workflow, WorkflowDefinition};
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Event bus for publishing and subscribing to events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching a pattern.
    /// Pattern supports wildcards: `run.*.started`, `artifact.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Repository for workflow definitions.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Create a new workflow.
    async fn create(&self, definition: &WorkflowDefinition) -> Result<Workflow>;

    /// Get a workflow by ID.
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>>;

    /// Get a workflow by name.
    async fn get_by_name(&self, name: &str) -> Result<Option<Workflow>>;

    /// List all workflows.
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Workflow>>;

    /// Update a workflow.
    async fn update(&self, id: WorkflowId, definition: &WorkflowDefinition) -> Result<Workflow>;

    /// Delete a workflow.
    async fn delete(&self, id: WorkflowId) -> Result<()>;
}

/// Repository for workflow runs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Create a new run.
    async fn create(&self, run: &Run) -> Result<RunId>;

    /// Get a run by ID.
    async fn get(&self, id: RunId) -> Result<Option<Run>>;

    /// Get runs for a workflow.
    async fn get_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Run>>;

    /// Get the next run number for a workflow.
    async fn next_run_number(&self, workflow_id: WorkflowId) -> Result<u32>;

    /// Update a run.
    async fn update(&self, run: &Run) -> Result<()>;

    /// Get non-terminal runs holding the given concurrency key.
    async fn find_in_flight(&self, concurrency_key: &str) -> Result<Vec<Run>>;
}

/// A stored artifact's metadata.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    pub id: ArtifactId,
    pub run_id: RunId,
    pub name: String,
    pub size_bytes: u64,
    pub retention_days: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Store for named artifacts passed between jobs of a run.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Publish a named artifact for a run, replacing any previous
    /// artifact of the same name.
    async fn publish(
        &self,
        run_id: RunId,
        name: &str,
        files: Vec<(String, Vec<u8>)>,
        retention_days: u32,
    ) -> Result<ArtifactMeta>;

    /// Download an artifact by name.
    async fn download(&self, run_id: RunId, name: &str)
        -> Result<(ArtifactMeta, Vec<(String, Vec<u8>)>)>;

    /// List artifacts for a run.
    async fn list(&self, run_id: RunId) -> Result<Vec<ArtifactMeta>>;
}
