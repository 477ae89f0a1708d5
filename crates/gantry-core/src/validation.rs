//! Structural validation of workflow definitions.

use crate::workflow::WorkflowDefinition;
use std::collections::HashSet;

/// Result of validating a workflow definition.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub workflow_name: String,
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

/// Validator for workflow definitions.
///
/// Checks everything that can be decided without building the DAG;
/// cycle detection lives with the DAG builder.
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, definition: &WorkflowDefinition) -> ValidationResult {
        let mut result = ValidationResult {
            workflow_name: definition.name.clone(),
            is_valid: true,
            errors: vec![],
            warnings: vec![],
        };

        if definition.jobs.is_empty() {
            result.error("/jobs", "Workflow has no jobs");
        }

        let job_names: HashSet<&str> = definition.jobs.iter().map(|j| j.name.as_str()).collect();
        if job_names.len() != definition.jobs.len() {
            let mut seen = HashSet::new();
            for job in &definition.jobs {
                if !seen.insert(job.name.as_str()) {
                    result.error(
                        &format!("/jobs/{}", job.name),
                        &format!("Duplicate job name '{}'", job.name),
                    );
                }
            }
        }

        for job in &definition.jobs {
            let path = format!("/jobs/{}", job.name);

            if job.steps.is_empty() {
                result.error(&path, "Job has no steps");
            }
            if job.timeout_minutes == 0 {
                result.error(&path, "Job timeout must be greater than zero");
            }

            for dep in &job.needs {
                if !job_names.contains(dep.as_str()) {
                    result.error(&path, &format!("Unknown dependency '{}'", dep));
                }
                if dep == &job.name {
                    result.error(&path, "Job cannot depend on itself");
                }
            }

            if let Some(fan_out) = &job.fan_out {
                if !job_names.contains(fan_out.source.as_str()) {
                    result.error(
                        &path,
                        &format!("Fan-out source '{}' is not a job", fan_out.source),
                    );
                } else if !job.needs.contains(&fan_out.source) {
                    // The group list must be fully resolved before fan-out
                    // instantiation, which only `needs` guarantees.
                    result.error(
                        &path,
                        &format!(
                            "Fan-out source '{}' must be listed in needs",
                            fan_out.source
                        ),
                    );
                } else if let Some(source) = definition.job(&fan_out.source)
                    && !source.outputs.contains_key(&fan_out.output)
                {
                    result.error(
                        &path,
                        &format!(
                            "Fan-out source '{}' does not declare output '{}'",
                            fan_out.source, fan_out.output
                        ),
                    );
                }
            }

            if let Some(matrix) = &job.matrix
                && matrix.dimensions.values().any(|v| v.is_empty())
            {
                result.error(&path, "Matrix dimension has no values");
            }

            for artifact in &job.download_artifacts {
                let published = definition
                    .jobs
                    .iter()
                    .any(|j| j.publish.as_ref().is_some_and(|a| &a.name == artifact));
                if !published {
                    result.warnings.push(format!(
                        "{}: downloads artifact '{}' that no job publishes",
                        path, artifact
                    ));
                }
            }
        }

        if let Some(concurrency) = &definition.concurrency
            && concurrency.group.trim().is_empty()
        {
            result.error("/concurrency", "Concurrency group key is empty");
        }

        result.is_valid = result.errors.is_empty();
        result
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    fn error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationError {
            path: path.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{FanOutConfig, JobDefinition, StepDefinition};
    use std::collections::HashMap;

    fn step(name: &str) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            run: Some("true".to_string()),
            shell: "bash".to_string(),
            variables: HashMap::new(),
            secrets: vec![],
            timeout_minutes: 30,
            outputs: vec![],
            continue_on_error: false,
        }
    }

    fn job(name: &str, needs: Vec<&str>) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            display_name: None,
            needs: needs.into_iter().map(String::from).collect(),
            variables: HashMap::new(),
            steps: vec![step("run")],
            timeout_minutes: 60,
            outputs: HashMap::new(),
            matrix: None,
            fan_out: None,
            publish: None,
            download_artifacts: vec![],
            continue_on_error: false,
        }
    }

    fn workflow(jobs: Vec<JobDefinition>) -> WorkflowDefinition {
        WorkflowDefinition {
            version: "1".to_string(),
            name: "ci".to_string(),
            description: None,
            triggers: vec![],
            variables: HashMap::new(),
            jobs,
            concurrency: None,
            timeout_minutes: 180,
        }
    }

    #[test]
    fn test_valid_workflow() {
        let def = workflow(vec![job("lint", vec![]), job("build", vec!["lint"])]);
        let result = WorkflowValidator::new().validate(&def);
        assert!(result.is_valid, "{:?}", result.errors);
    }

    #[test]
    fn test_unknown_dependency() {
        let def = workflow(vec![job("build", vec!["missing"])]);
        let result = WorkflowValidator::new().validate(&def);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_fan_out_source_must_be_in_needs() {
        let mut collector = job("collect", vec![]);
        collector
            .outputs
            .insert("groups".to_string(), "${{ steps.run.outputs.groups }}".to_string());
        let mut fanned = job("integration-test", vec![]);
        fanned.fan_out = Some(FanOutConfig {
            source: "collect".to_string(),
            output: "groups".to_string(),
            fail_fast: false,
        });
        let def = workflow(vec![collector, fanned]);
        let result = WorkflowValidator::new().validate(&def);
        assert!(!result.is_valid);
        assert!(result.errors[0].message.contains("must be listed in needs"));
    }

    #[test]
    fn test_fan_out_source_output_declared() {
        let collector = job("collect", vec![]);
        let mut fanned = job("integration-test", vec!["collect"]);
        fanned.fan_out = Some(FanOutConfig {
            source: "collect".to_string(),
            output: "groups".to_string(),
            fail_fast: false,
        });
        let def = workflow(vec![collector, fanned]);
        let result = WorkflowValidator::new().validate(&def);
        assert!(!result.is_valid);
        assert!(result.errors[0].message.contains("does not declare output"));
    }
}
