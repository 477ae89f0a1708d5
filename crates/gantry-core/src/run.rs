//! Run and job execution state.

use crate::context::RunContext;
use crate::ids::{JobId, RunId, WorkflowId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Run {
    pub id: RunId,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub run_number: u32,
    pub status: RunStatus,
    pub context: RunContext,
    /// Resolved concurrency-group key, when the workflow declares one.
    pub concurrency_key: Option<String>,
    pub jobs: Vec<JobExecution>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl Run {
    pub fn instances_of(&self, job_name: &str) -> Vec<&JobExecution> {
        self.jobs.iter().filter(|j| j.name == job_name).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Cancelled
        )
    }

    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

/// One scheduled execution unit: a plain job, or a single matrix/fan-out
/// combination of an expanded job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobExecution {
    pub id: JobId,
    pub name: String,
    pub display_name: Option<String>,
    pub status: JobStatus,
    pub needs: Vec<String>,
    /// Index within the expanded instance set; `None` for plain jobs.
    pub instance_index: Option<usize>,
    /// Matrix values and injected fan-out variables for this instance.
    pub combination: HashMap<String, serde_json::Value>,
    pub outputs: HashMap<String, String>,
    pub exit_code: Option<i32>,
    pub failure: Option<FailureKind>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl JobExecution {
    pub fn new(name: impl Into<String>, needs: Vec<String>) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            display_name: None,
            status: JobStatus::Pending,
            needs,
            instance_index: None,
            combination: HashMap::new(),
            outputs: HashMap::new(),
            exit_code: None,
            failure: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }
}

/// Job state machine.
///
/// `Pending -> Blocked -> Runnable -> Running -> terminal`. `Cancelled`
/// is reachable from any non-terminal state when the run is superseded
/// or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Blocked,
    Runnable,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    /// Whether this status, on an upstream dependency, forces a
    /// dependent job to be skipped rather than scheduled.
    pub fn blocks_dependents(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }
}

/// Why a job instance terminated as `Failed`. A timeout is treated
/// identically to a step failure; only the kind differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StepFailed,
    Timeout,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    Timeout,
    Superseded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Blocked.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_blocking_statuses() {
        assert!(JobStatus::Failed.blocks_dependents());
        assert!(JobStatus::Skipped.blocks_dependents());
        assert!(JobStatus::Cancelled.blocks_dependents());
        assert!(!JobStatus::Succeeded.blocks_dependents());
    }
}
