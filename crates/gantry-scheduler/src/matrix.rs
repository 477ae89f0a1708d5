//! Static matrix expansion for parallel instance generation.

use gantry_core::workflow::MatrixConfig;
use std::collections::HashMap;

/// A single combination of matrix axis values.
#[derive(Debug, Clone)]
pub struct MatrixInstance {
    pub index: usize,
    pub values: HashMap<String, serde_json::Value>,
    pub display_name: String,
}

/// Result of matrix expansion.
#[derive(Debug, Clone)]
pub struct MatrixExpansion {
    pub instances: Vec<MatrixInstance>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
}

impl MatrixExpansion {
    /// The identity expansion: one instance with no matrix values.
    /// Used when a fan-out job declares no static axes.
    pub fn identity() -> Self {
        Self {
            instances: vec![MatrixInstance {
                index: 0,
                values: HashMap::new(),
                display_name: String::new(),
            }],
            fail_fast: false,
            max_parallel: None,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Expander for matrix configurations.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a matrix configuration into individual combinations.
    pub fn expand(&self, job_name: &str, matrix: &MatrixConfig) -> MatrixExpansion {
        let mut combinations = self.generate_combinations(&matrix.dimensions);

        // Apply includes
        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        // Apply excludes
        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| self.matches_exclude(combo, exclude))
        });

        let instances: Vec<MatrixInstance> = combinations
            .into_iter()
            .enumerate()
            .map(|(idx, values)| {
                let display_name = self.format_display_name(job_name, &values);
                MatrixInstance {
                    index: idx,
                    values,
                    display_name,
                }
            })
            .collect();

        MatrixExpansion {
            instances,
            fail_fast: matrix.fail_fast,
            max_parallel: matrix.max_parallel,
        }
    }

    fn generate_combinations(
        &self,
        dimensions: &HashMap<String, Vec<serde_json::Value>>,
    ) -> Vec<HashMap<String, serde_json::Value>> {
        if dimensions.is_empty() {
            return vec![HashMap::new()];
        }

        // Deterministic axis order for stable instance indices
        let mut axes: Vec<(&String, &Vec<serde_json::Value>)> = dimensions.iter().collect();
        axes.sort_by_key(|(k, _)| k.as_str());

        let mut result = vec![HashMap::new()];

        for (key, values) in axes {
            let mut new_result = Vec::new();

            for combo in result {
                for value in values {
                    let mut new_combo: HashMap<String, serde_json::Value> = combo.clone();
                    new_combo.insert(key.clone(), value.clone());
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    fn matches_exclude(
        &self,
        combo: &HashMap<String, serde_json::Value>,
        exclude: &HashMap<String, serde_json::Value>,
    ) -> bool {
        exclude
            .iter()
            .all(|(key, value)| combo.get(key) == Some(value))
    }

    fn format_display_name(
        &self,
        job_name: &str,
        values: &HashMap<String, serde_json::Value>,
    ) -> String {
        if values.is_empty() {
            return job_name.to_string();
        }

        let mut parts: Vec<String> = values
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

        format!("{} ({})", job_name, parts.join(", "))
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
