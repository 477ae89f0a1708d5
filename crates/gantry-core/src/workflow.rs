//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML configuration:
//! a DAG of jobs with `needs` edges, optional static matrix axes, and at
//! most one dynamic fan-out axis fed by a collector job's output.

use crate::ids::WorkflowId;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobDefinition>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default = "default_workflow_timeout")]
    pub timeout_minutes: u32,
}

fn default_workflow_timeout() -> u32 {
    180
}

impl WorkflowDefinition {
    /// Look up a job definition by name.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// How a run was started. The stability filter applied to test selection
/// is derived from this, uniformly for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    PullRequest,
    Schedule,
    WorkflowCall,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default = "default_job_timeout")]
    pub timeout_minutes: u32,
    /// Output values this job publishes for downstream consumption,
    /// as `key -> expression` (e.g. `groups: "${{ steps.collect.outputs.groups }}"`).
    #[serde(default)]
    pub outputs: HashMap<String, String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    #[serde(default)]
    pub fan_out: Option<FanOutConfig>,
    /// Named artifact this job publishes on success.
    #[serde(default)]
    pub publish: Option<ArtifactConfig>,
    /// Artifacts (by name) downloaded into the workspace before steps run.
    #[serde(default)]
    pub download_artifacts: Vec<String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_job_timeout() -> u32 {
    60
}

impl JobDefinition {
    /// Whether this job expands into more than one scheduled instance.
    pub fn is_expanded(&self) -> bool {
        self.matrix.is_some() || self.fan_out.is_some()
    }

    /// Effective fail-fast policy for expanded instances.
    ///
    /// Fan-out jobs default to isolation (sibling failures do not cancel
    /// the rest); static matrices keep the matrix's own setting.
    pub fn fail_fast(&self) -> bool {
        if let Some(fan_out) = &self.fan_out {
            return fan_out.fail_fast;
        }
        self.matrix.as_ref().map(|m| m.fail_fast).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<SecretReference>,
    #[serde(default = "default_step_timeout")]
    pub timeout_minutes: u32,
    /// Output keys this step may write to the output file.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_step_timeout() -> u32 {
    30
}

/// Static matrix configuration: named axes of discrete values that
/// multiply job instantiation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    pub dimensions: HashMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<HashMap<String, serde_json::Value>>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Dynamic fan-out axis: the job instantiates one instance per group
/// descriptor emitted by the collector job named in `source`, crossed
/// with any static matrix axes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FanOutConfig {
    /// Name of the collector job producing the group list. Must also
    /// appear in this job's `needs`.
    pub source: String,
    /// Output key on the collector job holding the serialized group list.
    #[serde(default = "default_fan_out_output")]
    pub output: String,
    #[serde(default)]
    pub fail_fast: bool,
}

fn default_fan_out_output() -> String {
    "groups".to_string()
}

/// Concurrency group: at most one in-flight run per resolved key; a
/// newer run cancels an older one when `cancel_in_progress` is set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConcurrencyConfig {
    /// Key template, interpolated per run (e.g. `"${{ workflow }}-${{ ref }}"`).
    pub group: String,
    #[serde(default)]
    pub cancel_in_progress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactConfig {
    pub name: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default = "default_retention")]
    pub retention_days: u32,
}

fn default_retention() -> u32 {
    30
}

/// Reference to an opaque secret surfaced to a step as an env var.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    pub name: String,
    /// Environment variable the secret is exposed under.
    pub env: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

/// A stored workflow with identity and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
version: "1"
name: ci
jobs:
  - name: lint
    steps:
      - name: tox
        run: tox run -e lint
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.name, "ci");
        assert_eq!(def.jobs.len(), 1);
        assert_eq!(def.jobs[0].timeout_minutes, 60);
        assert_eq!(def.jobs[0].steps[0].shell, "bash");
    }

    #[test]
    fn test_parse_fan_out_job() {
        let yaml = r#"
version: "1"
name: ci
jobs:
  - name: collect-integration-tests
    steps:
      - name: collect
        run: gantry collect --catalog tests/integration/groups.yaml
        outputs: [groups]
    outputs:
      groups: "${{ steps.collect.outputs.groups }}"
  - name: integration-test
    needs: [collect-integration-tests]
    fan_out:
      source: collect-integration-tests
    matrix:
      dimensions:
        series: ["22.04"]
      fail_fast: false
    steps:
      - name: run
        run: tox run -e integration
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        let job = def.job("integration-test").unwrap();
        let fan_out = job.fan_out.as_ref().unwrap();
        assert_eq!(fan_out.source, "collect-integration-tests");
        assert_eq!(fan_out.output, "groups");
        assert!(!fan_out.fail_fast);
        assert!(job.is_expanded());
        assert!(!job.fail_fast());
    }
}
