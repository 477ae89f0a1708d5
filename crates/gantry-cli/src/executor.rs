//! Local workflow executor.
//!
//! Drives the coordinator in-process: instances are dequeued, their
//! steps run through a shell, and outcomes are reported back. Supports
//! variable interpolation, step outputs via `$GANTRY_OUTPUT`, secret
//! masking, per-step and per-job timeouts, and local artifacts.

use console::style;
use gantry_core::context::RunContext;
use gantry_core::events::{ArtifactDownloadedPayload, ArtifactPublishedPayload, Event};
use gantry_core::ids::{JobId, RunId};
use gantry_core::interpolation::InterpolationContext;
use gantry_core::ports::{ArtifactStore, EventBus, RunRepository, WorkflowRepository};
use gantry_core::run::{CancelReason, JobExecution, Run, RunStatus};
use gantry_core::workflow::{JobDefinition, StepDefinition, WorkflowDefinition};
use gantry_scheduler::coordinator::{Coordinator, InstanceOutcome};
use gantry_store::{MemArtifactStore, MemEventBus, MemRunRepository, MemWorkflowRepository};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Local executor configuration.
pub struct ExecutorConfig {
    pub workspace: PathBuf,
    pub variables: HashMap<String, String>,
    pub verbose: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            variables: HashMap::new(),
            verbose: false,
        }
    }
}

/// Result of a local workflow run.
pub struct RunOutcome {
    pub run: Run,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.run.status == RunStatus::Success
    }
}

/// Execute a workflow locally and wait for it to finish.
pub async fn execute_workflow(
    definition: &WorkflowDefinition,
    context: RunContext,
    config: &ExecutorConfig,
) -> Result<RunOutcome, BoxError> {
    let workflows: Arc<dyn WorkflowRepository> = Arc::new(MemWorkflowRepository::new());
    let runs: Arc<dyn RunRepository> = Arc::new(MemRunRepository::new());
    let bus: Arc<dyn EventBus> = Arc::new(MemEventBus::new());
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(MemArtifactStore::new());

    let workflow = workflows.create(definition).await?;
    let coordinator = Arc::new(Coordinator::new(workflows, runs, bus.clone()));

    println!(
        "\n{} Running workflow: {}",
        style("▶").cyan().bold(),
        style(&definition.name).bold()
    );
    println!(
        "  {} jobs, timeout: {} min\n",
        definition.jobs.len(),
        definition.timeout_minutes
    );

    let run_id = coordinator
        .start_run(workflow.id, definition, context)
        .await?;

    let deadline = Duration::from_secs(definition.timeout_minutes as u64 * 60);
    let driven = timeout(
        deadline,
        drive(coordinator.clone(), definition, config, artifacts, bus, run_id),
    )
    .await;

    match driven {
        Ok(result) => result?,
        Err(_) => {
            println!(
                "{} Workflow timed out after {} min",
                style("✗").red().bold(),
                definition.timeout_minutes
            );
            coordinator
                .cancel_run(run_id, CancelReason::Timeout, None)
                .await?;
        }
    }

    let run = coordinator
        .run(run_id)
        .await?
        .ok_or("Run disappeared during execution")?;

    print_summary(&run);
    Ok(RunOutcome { run })
}

/// Dispatch loop: pull runnable instances, execute them concurrently,
/// report outcomes until the run settles.
async fn drive(
    coordinator: Arc<Coordinator>,
    definition: &WorkflowDefinition,
    config: &ExecutorConfig,
    artifacts: Arc<dyn ArtifactStore>,
    bus: Arc<dyn EventBus>,
    run_id: RunId,
) -> Result<(), BoxError> {
    let mut join_set = JoinSet::new();

    loop {
        while let Some(queued) = coordinator.next_instance().await? {
            let (job, exec) = coordinator.instance(queued.run_id, queued.job_id).await?;
            let upstream = coordinator.run_outputs(queued.run_id).await?;

            let mut variables = config.variables.clone();
            for (k, v) in &definition.variables {
                variables.insert(k.clone(), v.clone());
            }

            let workspace = config.workspace.clone();
            let verbose = config.verbose;
            let artifacts = artifacts.clone();
            let bus = bus.clone();
            let job_id = queued.job_id;

            join_set.spawn(async move {
                let outcome = execute_instance(
                    &job, &exec, upstream, variables, &workspace, verbose, artifacts, bus, run_id,
                )
                .await;
                (job_id, outcome)
            });
        }

        if join_set.is_empty() {
            break;
        }

        if let Some(joined) = join_set.join_next().await {
            let (job_id, outcome) = joined?;
            coordinator.instance_completed(run_id, job_id, outcome).await?;
        }
    }

    Ok(())
}

/// Execute one job instance: all of its steps, in order.
#[allow(clippy::too_many_arguments)]
async fn execute_instance(
    job: &JobDefinition,
    exec: &JobExecution,
    upstream: HashMap<String, String>,
    mut variables: HashMap<String, String>,
    workspace: &Path,
    verbose: bool,
    artifacts: Arc<dyn ArtifactStore>,
    bus: Arc<dyn EventBus>,
    run_id: RunId,
) -> InstanceOutcome {
    let label = exec.display_name.as_deref().unwrap_or(&job.name);
    println!("{} Job: {}", style("━━▶").cyan(), style(label).bold());

    for (k, v) in &job.variables {
        variables.insert(k.clone(), v.clone());
    }

    let mut ctx = InterpolationContext::new();
    ctx.variables = variables;
    ctx.outputs = upstream;
    for (k, v) in &exec.combination {
        let value = match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ctx.matrix.insert(k.clone(), value);
    }

    if let Err(e) = fetch_artifacts(job, run_id, workspace, artifacts.clone(), &bus).await {
        println!("    {} Artifact download failed: {}", style("✗").red(), e);
        return InstanceOutcome::Failed { exit_code: None };
    }

    let job_deadline = Duration::from_secs(job.timeout_minutes as u64 * 60);
    let steps = run_steps(job, exec.id, &mut ctx, workspace, verbose);

    let outcome = match timeout(job_deadline, steps).await {
        Ok(Ok(exit_code)) => InstanceOutcome::Succeeded {
            exit_code,
            outputs: ctx.step_outputs.clone(),
        },
        Ok(Err(exit_code)) => InstanceOutcome::Failed { exit_code },
        Err(_) => {
            println!(
                "    {} Job timed out after {} min",
                style("✗").red(),
                job.timeout_minutes
            );
            InstanceOutcome::TimedOut
        }
    };

    if let InstanceOutcome::Succeeded { .. } = &outcome
        && let Some(publish) = &job.publish
        && let Err(e) = publish_artifact(publish, &job.name, run_id, workspace, artifacts, &bus).await
    {
        println!("    {} Artifact publish failed: {}", style("✗").red(), e);
        return InstanceOutcome::Failed { exit_code: None };
    }

    outcome
}

/// Run the steps of a job sequentially. Returns the last exit code on
/// success, or the failing exit code on error.
async fn run_steps(
    job: &JobDefinition,
    instance_id: JobId,
    ctx: &mut InterpolationContext,
    workspace: &Path,
    verbose: bool,
) -> Result<i32, Option<i32>> {
    let total = job.steps.len();
    let mut last_exit = 0;

    for (idx, step) in job.steps.iter().enumerate() {
        match execute_step(step, instance_id, ctx, workspace, verbose, idx + 1, total).await {
            Ok(exit_code) => last_exit = exit_code,
            Err(exit_code) => {
                if step.continue_on_error {
                    println!(
                        "      {} continuing past failure of {}",
                        style("!").yellow(),
                        step.name
                    );
                    continue;
                }
                return Err(exit_code);
            }
        }
    }

    Ok(last_exit)
}

/// Execute a single step through the configured shell.
async fn execute_step(
    step: &StepDefinition,
    instance_id: JobId,
    ctx: &mut InterpolationContext,
    workspace: &Path,
    verbose: bool,
    step_num: usize,
    total_steps: usize,
) -> Result<i32, Option<i32>> {
    let Some(ref script) = step.run else {
        println!(
            "    [{}/{}] {} (no action)",
            step_num,
            total_steps,
            style(&step.name).dim()
        );
        return Ok(0);
    };

    println!(
        "    [{}/{}] {}",
        step_num,
        total_steps,
        style(&step.name).bold()
    );

    // Resolve secrets before spawning; a missing required secret fails
    // the step without running anything.
    for secret in &step.secrets {
        match std::env::var(&secret.name) {
            Ok(value) => {
                ctx.secrets.insert(secret.env.clone(), value);
            }
            Err(_) if secret.required => {
                println!(
                    "      {} missing required secret: {}",
                    style("✗").red(),
                    secret.name
                );
                return Err(None);
            }
            Err(_) => {}
        }
    }

    let start = std::time::Instant::now();
    let script = ctx.interpolate(script);

    let output_file = step_output_path(workspace, instance_id, &step.name);

    let mut cmd = Command::new(&step.shell);
    cmd.arg("-c").arg(&script);
    cmd.current_dir(workspace);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.env("GANTRY_OUTPUT", &output_file);

    for (k, v) in &ctx.variables {
        cmd.env(k, v);
    }
    for (k, v) in &step.variables {
        cmd.env(k, ctx.interpolate(v));
    }
    for (k, v) in &ctx.secrets {
        cmd.env(k, v);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            println!("      {} failed to spawn shell: {}", style("✗").red(), e);
            return Err(None);
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let ctx_stdout = ctx.clone();
    let stdout_handle = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if verbose {
                    println!("      {}", style(ctx_stdout.mask_secrets(&line)).dim());
                }
            }
        }
    });

    let ctx_stderr = ctx.clone();
    let stderr_handle = tokio::spawn(async move {
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("      {}", style(ctx_stderr.mask_secrets(&line)).red().dim());
            }
        }
    });

    let step_deadline = Duration::from_secs(step.timeout_minutes.max(1) as u64 * 60);
    let status = match timeout(step_deadline, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            println!("      {} {}", style("✗").red(), e);
            None
        }
        Err(_) => {
            let _ = child.kill().await;
            println!(
                "      {} step timed out after {} min",
                style("✗").red(),
                step.timeout_minutes
            );
            None
        }
    };

    let _ = stdout_handle.await;
    let _ = stderr_handle.await;

    // Parse step outputs from the GANTRY_OUTPUT file.
    if output_file.exists() {
        if let Ok(content) = std::fs::read_to_string(&output_file) {
            parse_outputs(ctx, &step.name, &content);
        }
        let _ = std::fs::remove_file(&output_file);
    }

    let duration = start.elapsed().as_secs_f64();
    match status {
        Some(status) if status.success() => {
            println!("      {} ({:.2}s)", style("✓").green(), duration);
            Ok(status.code().unwrap_or(0))
        }
        Some(status) => {
            let exit_code = status.code();
            println!(
                "      {} exit code {} ({:.2}s)",
                style("✗").red(),
                exit_code.unwrap_or(-1),
                duration
            );
            Err(exit_code)
        }
        None => Err(None),
    }
}

/// Path of the `$GANTRY_OUTPUT` file for one step of one instance.
///
/// Expanded siblings of a fanned-out or matrix job run concurrently in
/// the same workspace, so the path must be unique per execution, not
/// just per step name.
fn step_output_path(workspace: &Path, instance_id: JobId, step_name: &str) -> PathBuf {
    workspace.join(format!(
        ".gantry_output_{}_{}",
        instance_id,
        step_name.replace(' ', "_")
    ))
}

/// Parse `key=value` lines written to the step output file.
fn parse_outputs(ctx: &mut InterpolationContext, step_name: &str, content: &str) {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let value = line[eq_pos + 1..].trim();
            if !key.is_empty() {
                ctx.set_step_output(step_name, key, value.to_string());
            }
        }
    }
}

/// Download declared artifacts into the workspace before steps run.
async fn fetch_artifacts(
    job: &JobDefinition,
    run_id: RunId,
    workspace: &Path,
    artifacts: Arc<dyn ArtifactStore>,
    bus: &Arc<dyn EventBus>,
) -> Result<(), BoxError> {
    for name in &job.download_artifacts {
        let (meta, files) = artifacts.download(run_id, name).await?;
        let dir = workspace.join(".gantry").join("artifacts").join(name);
        tokio::fs::create_dir_all(&dir).await?;
        for (path, data) in files {
            let target = dir.join(&path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, data).await?;
        }
        bus.publish(Event::ArtifactDownloaded(ArtifactDownloadedPayload {
            run_id,
            artifact_id: meta.id,
            name: name.clone(),
            job_name: job.name.clone(),
            downloaded_at: chrono::Utc::now(),
        }))
        .await?;
        println!("    {} Downloaded artifact {}", style("⇣").cyan(), name);
    }
    Ok(())
}

/// Publish the job's declared artifact from workspace paths.
async fn publish_artifact(
    config: &gantry_core::workflow::ArtifactConfig,
    job_name: &str,
    run_id: RunId,
    workspace: &Path,
    artifacts: Arc<dyn ArtifactStore>,
    bus: &Arc<dyn EventBus>,
) -> Result<(), BoxError> {
    let mut files = Vec::new();
    for path in &config.paths {
        let full = workspace.join(path);
        if full.is_file() {
            files.push((path.clone(), tokio::fs::read(&full).await?));
        }
    }

    let meta = artifacts
        .publish(run_id, &config.name, files, config.retention_days)
        .await?;
    bus.publish(Event::ArtifactPublished(ArtifactPublishedPayload {
        run_id,
        artifact_id: meta.id,
        name: meta.name.clone(),
        job_name: job_name.to_string(),
        size_bytes: meta.size_bytes,
        published_at: chrono::Utc::now(),
    }))
    .await?;
    println!(
        "    {} Published artifact {} ({} bytes)",
        style("⇡").cyan(),
        meta.name,
        meta.size_bytes
    );
    Ok(())
}

fn print_summary(run: &Run) {
    let succeeded = run
        .jobs
        .iter()
        .filter(|j| j.status.is_success())
        .count();
    let failed = run
        .jobs
        .iter()
        .filter(|j| j.status == gantry_core::run::JobStatus::Failed)
        .count();
    let skipped = run
        .jobs
        .iter()
        .filter(|j| j.status == gantry_core::run::JobStatus::Skipped)
        .count();

    println!();
    let seconds = run.duration_ms.unwrap_or(0) as f64 / 1000.0;
    match run.status {
        RunStatus::Success => println!(
            "{} Run #{} succeeded in {:.2}s ({} jobs)",
            style("✓").green().bold(),
            run.run_number,
            seconds,
            succeeded
        ),
        RunStatus::Cancelled => println!(
            "{} Run #{} cancelled after {:.2}s",
            style("✗").red().bold(),
            run.run_number,
            seconds
        ),
        _ => println!(
            "{} Run #{} failed after {:.2}s ({} failed, {} skipped)",
            style("✗").red().bold(),
            run.run_number,
            seconds,
            failed,
            skipped
        ),
    }
}

/// Find a workflow file in standard locations.
pub fn find_workflow_file(path: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = path {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
        return None;
    }

    let candidates = [
        "gantry.yaml",
        "gantry.yml",
        ".gantry/workflow.yaml",
        ".gantry/workflow.yml",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Load and parse a workflow file.
pub fn load_workflow(path: &Path) -> Result<WorkflowDefinition, BoxError> {
    let content = std::fs::read_to_string(path)?;
    let definition: WorkflowDefinition = serde_yaml::from_str(&content)?;
    Ok(definition)
}
