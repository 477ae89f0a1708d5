//! Dynamic fan-out expansion.
//!
//! Crosses the group list produced by a collector job with the job's
//! static matrix axes: exactly `groups x matrix` instances. Each
//! instance carries the group fields, the matrix values, and the run's
//! stability filter as explicit combination variables, so no instance
//! re-derives the filter on its own.

use crate::matrix::{MatrixExpander, MatrixExpansion};
use gantry_core::context::StabilityFilter;
use gantry_core::groups::GroupDescriptor;
use gantry_core::workflow::JobDefinition;
use gantry_core::{Error, Result};
use std::collections::HashMap;

/// One fan-out instance: a (group, matrix combination) pair.
#[derive(Debug, Clone)]
pub struct FanOutInstance {
    pub index: usize,
    pub group: GroupDescriptor,
    /// Combination variables for the instance: matrix values plus
    /// `group`, `group_name`, `group_path`, and `stability_filter`.
    pub variables: HashMap<String, serde_json::Value>,
    pub display_name: String,
}

/// Result of fan-out expansion.
#[derive(Debug, Clone)]
pub struct FanOutExpansion {
    pub instances: Vec<FanOutInstance>,
    pub group_count: usize,
    pub matrix_count: usize,
    pub fail_fast: bool,
}

impl FanOutExpansion {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Expander for fan-out jobs.
pub struct FanOutExpander {
    matrix_expander: MatrixExpander,
}

impl FanOutExpander {
    pub fn new() -> Self {
        Self {
            matrix_expander: MatrixExpander::new(),
        }
    }

    /// Expand a fan-out job from the collector's recorded output value.
    ///
    /// `raw_groups` is the serialized descriptor list published by the
    /// collector job. An empty list yields an empty expansion, which the
    /// coordinator surfaces explicitly rather than silently passing.
    pub fn expand(
        &self,
        job: &JobDefinition,
        raw_groups: &str,
        filter: StabilityFilter,
    ) -> Result<FanOutExpansion> {
        let fan_out = job.fan_out.as_ref().ok_or_else(|| {
            Error::Internal(format!("Job '{}' has no fan-out configuration", job.name))
        })?;

        let groups = GroupDescriptor::decode_list(raw_groups)?;

        let matrix = match &job.matrix {
            Some(matrix) => self.matrix_expander.expand(&job.name, matrix),
            None => MatrixExpansion::identity(),
        };

        let mut instances = Vec::with_capacity(groups.len() * matrix.len());
        for group in &groups {
            for combo in &matrix.instances {
                let mut variables = combo.values.clone();
                variables.insert("group".to_string(), serde_json::json!(group.group));
                variables.insert("group_name".to_string(), serde_json::json!(group.name));
                variables.insert("group_path".to_string(), serde_json::json!(group.path));
                variables.insert(
                    "stability_filter".to_string(),
                    serde_json::json!(filter.exclusion_expr()),
                );

                let display_name = self.format_display_name(job, group, combo.values.clone());
                instances.push(FanOutInstance {
                    index: instances.len(),
                    group: group.clone(),
                    variables,
                    display_name,
                });
            }
        }

        Ok(FanOutExpansion {
            group_count: groups.len(),
            matrix_count: matrix.len(),
            fail_fast: fan_out.fail_fast,
            instances,
        })
    }

    fn format_display_name(
        &self,
        job: &JobDefinition,
        group: &GroupDescriptor,
        matrix_values: HashMap<String, serde_json::Value>,
    ) -> String {
        let base = job.display_name.as_deref().unwrap_or(&job.name);
        if matrix_values.is_empty() {
            return format!("{} ({})", base, group.name);
        }

        let mut parts: Vec<String> = matrix_values
            .iter()
            .map(|(k, v)| {
                let v_str = match v {
                    serde_json::Value::String(s) => s.clone(),
                    _ => v.to_string(),
                };
                format!("{}={}", k, v_str)
            })
            .collect();
        parts.sort();

        format!("{} ({}, {})", base, group.name, parts.join(", "))
    }
}

impl Default for FanOutExpander {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::workflow::{FanOutConfig, MatrixConfig, StepDefinition};

    fn fan_out_job(matrix: Option<MatrixConfig>) -> JobDefinition {
        JobDefinition {
            name: "integration-test".to_string(),
            display_name: Some("Integration test".to_string()),
            needs: vec!["collect-integration-tests".to_string()],
            variables: HashMap::new(),
            steps: vec![StepDefinition {
                name: "run".to_string(),
                run: Some("tox run -e integration".to_string()),
                shell: "bash".to_string(),
                variables: HashMap::new(),
                secrets: vec![],
                timeout_minutes: 120,
                outputs: vec![],
                continue_on_error: false,
            }],
            timeout_minutes: 180,
            outputs: HashMap::new(),
            matrix,
            fan_out: Some(FanOutConfig {
                source: "collect-integration-tests".to_string(),
                output: "groups".to_string(),
                fail_fast: false,
            }),
            publish: None,
            download_artifacts: vec![],
            continue_on_error: false,
        }
    }

    fn groups_json(n: usize) -> String {
        let groups: Vec<GroupDescriptor> = (0..n)
            .map(|i| GroupDescriptor {
                group: "1".to_string(),
                name: format!("group-{}", i),
                path: format!("tests/integration/test_{}.py", i),
            })
            .collect();
        GroupDescriptor::encode_list(&groups).unwrap()
    }

    fn series_matrix(values: &[&str]) -> MatrixConfig {
        let mut dimensions = HashMap::new();
        dimensions.insert(
            "series".to_string(),
            values.iter().map(|v| serde_json::json!(v)).collect(),
        );
        MatrixConfig {
            dimensions,
            include: vec![],
            exclude: vec![],
            fail_fast: false,
            max_parallel: None,
        }
    }

    #[test]
    fn test_n_by_m_instances() {
        let job = fan_out_job(Some(series_matrix(&["22.04", "24.04"])));
        let expansion = FanOutExpander::new()
            .expand(&job, &groups_json(3), StabilityFilter::ExcludeUnstable)
            .unwrap();

        assert_eq!(expansion.group_count, 3);
        assert_eq!(expansion.matrix_count, 2);
        assert_eq!(expansion.instances.len(), 6);
        assert!(!expansion.fail_fast);
    }

    #[test]
    fn test_filter_injected_into_every_instance() {
        let job = fan_out_job(Some(series_matrix(&["22.04"])));
        let expansion = FanOutExpander::new()
            .expand(&job, &groups_json(2), StabilityFilter::ExcludeUnstable)
            .unwrap();

        for instance in &expansion.instances {
            assert_eq!(
                instance.variables["stability_filter"],
                serde_json::json!("not unstable")
            );
        }

        let scheduled = FanOutExpander::new()
            .expand(&job, &groups_json(2), StabilityFilter::IncludeUnstable)
            .unwrap();
        for instance in &scheduled.instances {
            assert_eq!(instance.variables["stability_filter"], serde_json::json!(""));
        }
    }

    #[test]
    fn test_no_matrix_yields_one_instance_per_group() {
        let job = fan_out_job(None);
        let expansion = FanOutExpander::new()
            .expand(&job, &groups_json(4), StabilityFilter::ExcludeUnstable)
            .unwrap();
        assert_eq!(expansion.matrix_count, 1);
        assert_eq!(expansion.instances.len(), 4);
    }

    #[test]
    fn test_empty_group_list() {
        let job = fan_out_job(Some(series_matrix(&["22.04"])));
        let expansion = FanOutExpander::new()
            .expand(&job, "[]", StabilityFilter::ExcludeUnstable)
            .unwrap();
        assert!(expansion.is_empty());
        assert_eq!(expansion.group_count, 0);
    }

    #[test]
    fn test_invalid_group_list_is_an_error() {
        let job = fan_out_job(None);
        assert!(
            FanOutExpander::new()
                .expand(&job, "not json", StabilityFilter::ExcludeUnstable)
                .is_err()
        );
    }
}
