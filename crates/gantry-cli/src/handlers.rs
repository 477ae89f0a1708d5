//! Command handlers.

use crate::commands::TriggerArg;
use crate::config::CliConfig;
use crate::executor::{self, BoxError, ExecutorConfig};
use console::style;
use gantry_core::context::{RunContext, StabilityFilter};
use gantry_core::groups::GroupCatalog;
use gantry_core::validation::WorkflowValidator;
use gantry_core::workflow::TriggerType;
use gantry_scheduler::collector::GroupCollector;
use gantry_scheduler::dag::DagBuilder;
use gantry_scheduler::matrix::MatrixExpander;
use std::io::Write;
use std::path::Path;

/// Initialize a new workflow.
pub async fn init() -> Result<(), BoxError> {
    let path = Path::new("gantry.yaml");

    if path.exists() {
        println!("{} gantry.yaml already exists", style("!").yellow());
        return Ok(());
    }

    let template = r#"version: "1"
name: ci

triggers:
  - type: pull_request
  - type: schedule
    cron: "0 0 7 * * * *"

jobs:
  - name: lint
    steps:
      - name: lint
        run: tox run -e lint

  - name: unit-test
    steps:
      - name: unit
        run: tox run -e unit

  - name: build
    needs: [lint, unit-test]
    steps:
      - name: build
        run: make build

  - name: collect-integration-tests
    needs: [build]
    steps:
      - name: collect
        run: gantry collect
        outputs: [groups]
    outputs:
      groups: "${{ steps.collect.outputs.groups }}"

  - name: integration-test
    needs: [build, collect-integration-tests]
    fan_out:
      source: collect-integration-tests
    steps:
      - name: run
        run: tox run -e integration -- ${{ matrix.group_path }}
"#;

    std::fs::write(path, template)?;
    println!("{} Created gantry.yaml", style("✓").green());
    Ok(())
}

/// Validate a workflow file.
pub async fn validate(path: &str) -> Result<(), BoxError> {
    let definition = executor::load_workflow(Path::new(path))?;
    let result = WorkflowValidator::new().validate(&definition);

    for warning in &result.warnings {
        println!("{} {}", style("!").yellow(), warning);
    }

    if !result.is_valid {
        for error in &result.errors {
            println!("{} {}: {}", style("✗").red(), error.path, error.message);
        }
        return Err(format!("Workflow \"{}\" is invalid", result.workflow_name).into());
    }

    println!(
        "{} Workflow \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!("  Jobs: {}", definition.jobs.len());
    for job in &definition.jobs {
        println!("    - {} ({} steps)", job.name, job.steps.len());
    }

    Ok(())
}

/// Show the execution plan without running anything.
pub async fn plan(path: &str, trigger: TriggerArg) -> Result<(), BoxError> {
    let definition = executor::load_workflow(Path::new(path))?;
    let dag = DagBuilder::new().build(&definition)?;

    let trigger_type: TriggerType = trigger.into();
    let context = RunContext::new(trigger_type);
    let filter = StabilityFilter::for_context(&context);

    println!(
        "Plan for {} (trigger: {:?})",
        style(&definition.name).bold(),
        trigger_type
    );
    println!(
        "  Stability filter: {}",
        if filter.excludes_unstable() {
            "exclude unstable groups"
        } else {
            "include unstable groups"
        }
    );
    println!();

    let expander = MatrixExpander::new();
    for node in dag.topological_order()? {
        let job = &node.definition;
        let instances = match (&job.fan_out, &job.matrix) {
            (Some(fan_out), Some(matrix)) => format!(
                "dynamic × {} (from {})",
                expander.expand(&job.name, matrix).len(),
                fan_out.source
            ),
            (Some(fan_out), None) => format!("dynamic (from {})", fan_out.source),
            (None, Some(matrix)) => expander.expand(&job.name, matrix).len().to_string(),
            (None, None) => "1".to_string(),
        };

        if job.needs.is_empty() {
            println!("  {} [{} instances]", style(&job.name).bold(), instances);
        } else {
            println!(
                "  {} [{} instances] needs: {}",
                style(&job.name).bold(),
                instances,
                job.needs.join(", ")
            );
        }
    }

    Ok(())
}

/// Collect integration test groups from a catalog.
///
/// Prints the selection and, when `$GANTRY_OUTPUT` is set, appends the
/// encoded descriptor list so a collector step can call this directly.
pub async fn collect(catalog: &str, trigger: TriggerArg) -> Result<(), BoxError> {
    let catalog = GroupCatalog::load(catalog)?;
    let context = RunContext::new(trigger.into());
    let filter = StabilityFilter::for_context(&context);

    let collection = GroupCollector::new(catalog).collect(filter);

    println!(
        "{} Collected {} groups ({} excluded)",
        style("✓").green(),
        collection.groups.len(),
        collection.excluded
    );
    for group in &collection.groups {
        println!("  - {} ({})", group.name, style(&group.path).dim());
    }

    let encoded = collection.encode()?;
    if let Ok(output_file) = std::env::var("GANTRY_OUTPUT") {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_file)?;
        writeln!(file, "groups={}", encoded)?;
    } else {
        println!("\n{}", encoded);
    }

    Ok(())
}

/// Run a workflow locally.
pub async fn run_workflow(
    _config: &CliConfig,
    path: &str,
    trigger: TriggerArg,
    git_ref: Option<String>,
    verbose: bool,
) -> Result<(), BoxError> {
    let workflow_path = executor::find_workflow_file(Some(path))
        .ok_or_else(|| format!("Workflow file not found: {}", path))?;
    let definition = executor::load_workflow(&workflow_path)?;

    let result = WorkflowValidator::new().validate(&definition);
    if !result.is_valid {
        for error in &result.errors {
            println!("{} {}: {}", style("✗").red(), error.path, error.message);
        }
        return Err("Workflow is invalid".into());
    }

    let mut context = RunContext::new(trigger.into());
    if let Some(git_ref) = git_ref {
        context = context.with_ref(git_ref);
    }

    let exec_config = ExecutorConfig {
        verbose,
        ..ExecutorConfig::default()
    };

    let outcome = executor::execute_workflow(&definition, context, &exec_config).await?;
    if !outcome.success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<(), BoxError> {
    println!("Current configuration:");
    println!("  workflow_file: {}", config.workflow_file);
    println!("  catalog_file: {}", config.catalog_file);
    println!("  output_format: {:?}", config.output_format);

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<(), BoxError> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_rejects_workflow_without_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gantry.yaml");
        std::fs::write(&path, "version: \"1\"\nname: ci\njobs: []\n").unwrap();

        assert!(validate(path.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_validate_accepts_minimal_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gantry.yaml");
        std::fs::write(
            &path,
            "version: \"1\"\nname: ci\njobs:\n  - name: lint\n    steps:\n      - name: lint\n        run: tox run -e lint\n",
        )
        .unwrap();

        validate(path.to_str().unwrap()).await.unwrap();
    }
}
