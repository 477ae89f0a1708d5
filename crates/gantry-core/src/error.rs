//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Workflow validation failed: {0}")]
    WorkflowValidation(String),

    // Run errors
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already completed")]
    RunAlreadyCompleted,

    #[error("Run cancelled: {reason}")]
    RunCancelled { reason: String },

    #[error("Run timeout after {minutes} minutes")]
    RunTimeout { minutes: u32 },

    // Job errors
    #[error("Job not found in run: {0}")]
    JobNotFound(String),

    #[error("Job failed with exit code {exit_code}: {message}")]
    JobFailed { exit_code: i32, message: String },

    #[error("Job timeout after {minutes} minutes")]
    JobTimeout { minutes: u32 },

    // Fan-out errors
    #[error("Collector output missing for job '{job}': no '{output}' value was recorded")]
    CollectorOutputMissing { job: String, output: String },

    #[error("Invalid group descriptor list: {0}")]
    InvalidGroupList(String),

    // Artifact errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact upload failed: {0}")]
    ArtifactUploadFailed(String),

    // Infrastructure errors
    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
