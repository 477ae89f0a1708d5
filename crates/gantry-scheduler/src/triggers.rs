//! Trigger matching and run-context derivation.

use chrono::{DateTime, Utc};
use gantry_core::context::RunContext;
use gantry_core::workflow::{TriggerConfig, TriggerType, WorkflowDefinition};
use std::str::FromStr;

/// Event that can start a workflow run.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    PullRequest {
        source_branch: String,
        target_branch: String,
        sha: Option<String>,
    },
    Schedule {
        fired_at: DateTime<Utc>,
    },
    WorkflowCall {
        caller: String,
        git_ref: Option<String>,
    },
    Manual {
        actor: Option<String>,
        git_ref: Option<String>,
    },
}

impl TriggerEvent {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerEvent::PullRequest { .. } => TriggerType::PullRequest,
            TriggerEvent::Schedule { .. } => TriggerType::Schedule,
            TriggerEvent::WorkflowCall { .. } => TriggerType::WorkflowCall,
            TriggerEvent::Manual { .. } => TriggerType::Manual,
        }
    }

    /// Derive the run context carried through the whole run. The
    /// stability filter falls out of this uniformly.
    pub fn run_context(&self) -> RunContext {
        let mut context = RunContext::new(self.trigger_type());
        match self {
            TriggerEvent::PullRequest {
                source_branch, sha, ..
            } => {
                context.git_ref = Some(source_branch.clone());
                context.git_sha = sha.clone();
            }
            TriggerEvent::Schedule { .. } => {}
            TriggerEvent::WorkflowCall { caller, git_ref } => {
                context.actor = Some(caller.clone());
                context.git_ref = git_ref.clone();
            }
            TriggerEvent::Manual { actor, git_ref } => {
                context.actor = actor.clone();
                context.git_ref = git_ref.clone();
            }
        }
        context
    }
}

/// Matcher for determining if a workflow should be triggered.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a workflow should be triggered by an event.
    pub fn matches(&self, workflow: &WorkflowDefinition, event: &TriggerEvent) -> bool {
        if workflow.triggers.is_empty() {
            // Default: trigger on pull requests to any branch
            return matches!(event, TriggerEvent::PullRequest { .. });
        }

        workflow
            .triggers
            .iter()
            .any(|trigger| self.trigger_matches(trigger, event))
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, event: &TriggerEvent) -> bool {
        if trigger.trigger_type != event.trigger_type() {
            return false;
        }

        match event {
            TriggerEvent::PullRequest { target_branch, .. } => {
                self.branch_matches(&trigger.branches, target_branch)
            }
            TriggerEvent::Schedule { fired_at } => match &trigger.cron {
                Some(expr) => self.cron_due(expr, *fired_at),
                None => false,
            },
            TriggerEvent::WorkflowCall { .. } | TriggerEvent::Manual { .. } => true,
        }
    }

    /// Whether a cron expression fires at the given minute.
    fn cron_due(&self, expr: &str, at: DateTime<Utc>) -> bool {
        let Ok(schedule) = cron::Schedule::from_str(expr) else {
            return false;
        };
        // Compare at minute granularity: did an occurrence land in the
        // minute containing `at`?
        let window_start = at - chrono::Duration::seconds(at.timestamp() % 60);
        schedule
            .after(&(window_start - chrono::Duration::seconds(1)))
            .next()
            .is_some_and(|next| next < window_start + chrono::Duration::seconds(60))
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true; // Match all branches if no patterns specified
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return text.starts_with(prefix);
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            let prefix_slash = format!("{}/", prefix);
            if text.starts_with(&prefix_slash) {
                return !text[prefix_slash.len()..].contains('/');
            }
            return false;
        }
        if pattern.contains('*') {
            let parts: Vec<&str> = pattern.split('*').collect();
            if parts.len() == 2 {
                return text.starts_with(parts[0]) && text.ends_with(parts[1]);
            }
        }
        pattern == text
    }

    /// Validate that a cron expression parses.
    pub fn validate_cron(&self, expr: &str) -> bool {
        cron::Schedule::from_str(expr).is_ok()
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::context::StabilityFilter;

    #[test]
    fn test_branch_match_exact() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&["main".to_string()], "main"));
        assert!(!matcher.branch_matches(&["main".to_string()], "develop"));
    }

    #[test]
    fn test_branch_match_glob() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&["feature/*".to_string()], "feature/foo"));
        assert!(matcher.branch_matches(&["release/**".to_string()], "release/v1/hotfix"));
    }

    #[test]
    fn test_empty_patterns_match_all() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.branch_matches(&[], "any-branch"));
    }

    #[test]
    fn test_schedule_context_includes_unstable() {
        let event = TriggerEvent::Schedule {
            fired_at: Utc::now(),
        };
        let context = event.run_context();
        assert_eq!(context.stability_filter(), StabilityFilter::IncludeUnstable);
    }

    #[test]
    fn test_workflow_call_context_excludes_unstable() {
        let event = TriggerEvent::WorkflowCall {
            caller: "release".to_string(),
            git_ref: Some("refs/tags/v1".to_string()),
        };
        let context = event.run_context();
        assert_eq!(context.stability_filter(), StabilityFilter::ExcludeUnstable);
        assert_eq!(context.actor.as_deref(), Some("release"));
    }

    #[test]
    fn test_cron_validation() {
        let matcher = TriggerMatcher::new();
        // Seconds-resolution syntax of the cron crate
        assert!(matcher.validate_cron("0 53 7 * * * *"));
        assert!(!matcher.validate_cron("not a cron"));
    }
}
