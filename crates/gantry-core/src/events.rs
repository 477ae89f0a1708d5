//! Event types published on the bus during a run.

use crate::ids::{ArtifactId, JobId, RunId, WorkflowId};
use crate::run::{CancelReason, FailureKind, JobStatus, RunStatus};
use crate::workflow::TriggerType;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All events in the Gantry system.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Run lifecycle
    RunQueued(RunQueuedPayload),
    RunStarted(RunStartedPayload),
    RunCompleted(RunCompletedPayload),
    RunCancelled(RunCancelledPayload),

    // Job lifecycle
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),
    JobSkipped(JobSkippedPayload),

    // Fan-out
    FanOutExpanded(FanOutExpandedPayload),
    FanOutEmpty(FanOutEmptyPayload),

    // Artifacts
    ArtifactPublished(ArtifactPublishedPayload),
    ArtifactDownloaded(ArtifactDownloadedPayload),
}

impl Event {
    /// Returns the bus subject for this event.
    pub fn subject(&self) -> String {
        match self {
            Event::RunQueued(p) => format!("run.queued.{}", p.workflow_id),
            Event::RunStarted(p) => format!("run.started.{}.{}", p.workflow_id, p.run_id),
            Event::RunCompleted(p) => format!("run.completed.{}.{}", p.workflow_id, p.run_id),
            Event::RunCancelled(p) => format!("run.cancelled.{}.{}", p.workflow_id, p.run_id),
            Event::JobStarted(p) => format!("run.{}.job.{}.started", p.run_id, p.job_name),
            Event::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job_name),
            Event::JobSkipped(p) => format!("run.{}.job.{}.skipped", p.run_id, p.job_name),
            Event::FanOutExpanded(p) => format!("run.{}.fanout.{}.expanded", p.run_id, p.job_name),
            Event::FanOutEmpty(p) => format!("run.{}.fanout.{}.empty", p.run_id, p.job_name),
            Event::ArtifactPublished(p) => format!("artifact.published.{}", p.run_id),
            Event::ArtifactDownloaded(p) => format!("artifact.downloaded.{}", p.run_id),
        }
    }
}

// === Run payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunQueuedPayload {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub run_number: u32,
    pub trigger: TriggerType,
    pub git_ref: Option<String>,
    pub git_sha: Option<String>,
    pub concurrency_key: Option<String>,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub run_number: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub run_number: u32,
    pub status: RunStatus,
    pub jobs_succeeded: u32,
    pub jobs_failed: u32,
    pub jobs_skipped: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCancelledPayload {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub reason: CancelReason,
    /// Run that superseded this one, when cancelled by concurrency group.
    pub superseded_by: Option<RunId>,
    pub cancelled_at: DateTime<Utc>,
}

// === Job payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStartedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub instance_index: Option<usize>,
    pub combination: HashMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub instance_index: Option<usize>,
    pub status: JobStatus,
    pub failure: Option<FailureKind>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSkippedPayload {
    pub run_id: RunId,
    pub job_name: String,
    /// Upstream dependency whose outcome forced the skip.
    pub blocked_by: String,
    pub skipped_at: DateTime<Utc>,
}

// === Fan-out payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FanOutExpandedPayload {
    pub run_id: RunId,
    pub job_name: String,
    pub group_count: u32,
    pub matrix_count: u32,
    /// Always `group_count * matrix_count`.
    pub instance_count: u32,
    pub fail_fast: bool,
    pub expanded_at: DateTime<Utc>,
}

/// The fan-out set resolved to zero instances. Surfaced as an explicit
/// warning so an empty expansion is never mistaken for a passing test
/// matrix.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FanOutEmptyPayload {
    pub run_id: RunId,
    pub job_name: String,
    pub source_job: String,
    pub expanded_at: DateTime<Utc>,
}

// === Artifact payloads ===

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactPublishedPayload {
    pub run_id: RunId,
    pub artifact_id: ArtifactId,
    pub name: String,
    pub job_name: String,
    pub size_bytes: u64,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDownloadedPayload {
    pub run_id: RunId,
    pub artifact_id: ArtifactId,
    pub name: String,
    pub job_name: String,
    pub downloaded_at: DateTime<Utc>,
}
