use regex::Regex;
use std::collections::HashMap;

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Workflow and job variables
    pub variables: HashMap<String, String>,
    /// Upstream job outputs: "job_name.output_key" -> value
    pub outputs: HashMap<String, String>,
    /// Step outputs within the current job: "step_name.output_key" -> value
    pub step_outputs: HashMap<String, String>,
    /// Matrix / fan-out values for the current instance
    pub matrix: HashMap<String, String>,
    /// Secrets to mask in output
    pub secrets: HashMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ variable }}` - direct variable lookup
    /// - `${{ env.VAR }}` - environment variable
    /// - `${{ matrix.key }}` - matrix or fan-out value
    /// - `${{ needs.job.outputs.key }}` - upstream job output
    /// - `${{ steps.name.outputs.key }}` - step output within the job
    pub fn interpolate(&self, input: &str) -> String {
        // Simple regex for ${{ ... }}; nesting not supported
        let re = Regex::new(r"\$\{\{\s*([^}]+)\s*\}\}").unwrap();

        re.replace_all(input, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
            self.resolve_expression(expr)
        })
        .to_string()
    }

    /// Resolve a single expression.
    fn resolve_expression(&self, expr: &str) -> String {
        // Handle env.VAR
        if let Some(var_name) = expr.strip_prefix("env.") {
            return self
                .variables
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok())
                .unwrap_or_default();
        }

        // Handle matrix.key
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }

        // Handle needs.job.outputs.key
        if let Some(rest) = expr.strip_prefix("needs.")
            && let Some(outputs_idx) = rest.find(".outputs.")
        {
            let job_name = &rest[..outputs_idx];
            let output_key = &rest[outputs_idx + ".outputs.".len()..];
            let lookup_key = format!("{}.{}", job_name, output_key);
            return self.outputs.get(&lookup_key).cloned().unwrap_or_default();
        }

        // Handle steps.name.outputs.key
        if let Some(rest) = expr.strip_prefix("steps.")
            && let Some(outputs_idx) = rest.find(".outputs.")
        {
            let step_name = &rest[..outputs_idx];
            let output_key = &rest[outputs_idx + ".outputs.".len()..];
            let lookup_key = format!("{}.{}", step_name, output_key);
            return self
                .step_outputs
                .get(&lookup_key)
                .cloned()
                .unwrap_or_default();
        }

        // Direct variable lookup
        self.variables.get(expr).cloned().unwrap_or_default()
    }

    /// Record an upstream job output.
    pub fn set_output(&mut self, job_name: &str, key: &str, value: String) {
        self.outputs.insert(format!("{}.{}", job_name, key), value);
    }

    /// Record a step output within the current job.
    pub fn set_step_output(&mut self, step_name: &str, key: &str, value: String) {
        self.step_outputs
            .insert(format!("{}.{}", step_name, key), value);
    }

    /// Mask secrets in the input string.
    pub fn mask_secrets(&self, input: &str) -> String {
        let mut output = input.to_string();
        for value in self.secrets.values() {
            if !value.is_empty() {
                output = output.replace(value, "***");
            }
        }
        output
    }
}

/// Resolve a concurrency-group key template for a run.
///
/// `${{ workflow }}`, `${{ ref }}`, and `${{ trigger }}` are available in
/// addition to workflow variables.
pub fn resolve_concurrency_key(
    template: &str,
    workflow_name: &str,
    context: &crate::context::RunContext,
    variables: &HashMap<String, String>,
) -> String {
    let mut ctx = InterpolationContext::new();
    ctx.variables = variables.clone();
    ctx.variables
        .insert("workflow".to_string(), workflow_name.to_string());
    ctx.variables.insert(
        "ref".to_string(),
        context.git_ref.clone().unwrap_or_default(),
    );
    ctx.variables.insert(
        "trigger".to_string(),
        serde_json::to_value(context.trigger)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
    );
    ctx.interpolate(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::workflow::TriggerType;

    #[test]
    fn test_needs_output_lookup() {
        let mut ctx = InterpolationContext::new();
        ctx.set_output("collect-integration-tests", "groups", "[]".to_string());
        let out = ctx.interpolate("${{ needs.collect-integration-tests.outputs.groups }}");
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_matrix_lookup() {
        let mut ctx = InterpolationContext::new();
        ctx.matrix.insert("series".to_string(), "22.04".to_string());
        assert_eq!(ctx.interpolate("ubuntu-${{ matrix.series }}"), "ubuntu-22.04");
    }

    #[test]
    fn test_mask_secrets() {
        let mut ctx = InterpolationContext::new();
        ctx.secrets
            .insert("HUB_TOKEN".to_string(), "s3cret".to_string());
        assert_eq!(ctx.mask_secrets("token=s3cret"), "token=***");
    }

    #[test]
    fn test_concurrency_key_template() {
        let context = RunContext::new(TriggerType::PullRequest).with_ref("refs/pull/42");
        let key = resolve_concurrency_key(
            "${{ workflow }}-${{ ref }}",
            "ci",
            &context,
            &HashMap::new(),
        );
        assert_eq!(key, "ci-refs/pull/42");
    }
}
