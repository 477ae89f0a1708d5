//! Run context and stability filtering.
//!
//! The stability filter is computed exactly once per run from the trigger
//! and passed explicitly to the collector and to every fan-out instance,
//! so the two can never disagree.

use crate::workflow::TriggerType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Context of a single run: how it was triggered and against what ref.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunContext {
    pub trigger: TriggerType,
    pub git_ref: Option<String>,
    pub git_sha: Option<String>,
    pub actor: Option<String>,
}

impl RunContext {
    pub fn new(trigger: TriggerType) -> Self {
        Self {
            trigger,
            git_ref: None,
            git_sha: None,
            actor: None,
        }
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn stability_filter(&self) -> StabilityFilter {
        StabilityFilter::for_context(self)
    }
}

/// Test selection filter applied uniformly across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StabilityFilter {
    /// Run everything, including groups marked unstable.
    IncludeUnstable,
    /// Exclude groups marked unstable.
    ExcludeUnstable,
}

impl StabilityFilter {
    /// Derive the filter from the run context. Scheduled runs exercise
    /// the full set; every other trigger excludes unstable groups.
    pub fn for_context(context: &RunContext) -> Self {
        match context.trigger {
            TriggerType::Schedule => StabilityFilter::IncludeUnstable,
            TriggerType::PullRequest | TriggerType::WorkflowCall | TriggerType::Manual => {
                StabilityFilter::ExcludeUnstable
            }
        }
    }

    /// Marker exclusion expression in pytest `-m` syntax: empty when
    /// nothing is excluded.
    pub fn exclusion_expr(&self) -> &'static str {
        match self {
            StabilityFilter::IncludeUnstable => "",
            StabilityFilter::ExcludeUnstable => "not unstable",
        }
    }

    pub fn excludes_unstable(&self) -> bool {
        matches!(self, StabilityFilter::ExcludeUnstable)
    }
}
