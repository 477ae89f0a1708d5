//! Run coordination.
//!
//! The coordinator owns the run lifecycle: it builds the job DAG, gates
//! jobs on their `needs`, expands matrix and fan-out jobs into parallel
//! instances, and enforces concurrency-group supersession. It does not
//! execute steps itself; a driver dequeues runnable instances and
//! reports their outcomes back.

use crate::dag::{DagBuilder, JobDag};
use crate::fanout::FanOutExpander;
use crate::matrix::MatrixExpander;
use crate::queue::{Priority, QueueManager, QueuedInstance};
use crate::triggers::{TriggerEvent, TriggerMatcher};

use gantry_core::context::{RunContext, StabilityFilter};
use gantry_core::events::{
    Event, FanOutEmptyPayload, FanOutExpandedPayload, JobCompletedPayload, JobSkippedPayload,
    JobStartedPayload, RunCancelledPayload, RunCompletedPayload, RunQueuedPayload,
    RunStartedPayload,
};
use gantry_core::ids::{JobId, RunId, WorkflowId};
use gantry_core::interpolation::{resolve_concurrency_key, InterpolationContext};
use gantry_core::ports::{EventBus, RunRepository, WorkflowRepository};
use gantry_core::run::{CancelReason, FailureKind, JobExecution, JobStatus, Run, RunStatus};
use gantry_core::workflow::{JobDefinition, WorkflowDefinition};
use gantry_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of one executed job instance, reported by the driver.
#[derive(Debug, Clone)]
pub enum InstanceOutcome {
    Succeeded {
        exit_code: i32,
        /// Step outputs keyed as `step_name.output_key`.
        outputs: HashMap<String, String>,
    },
    Failed {
        exit_code: Option<i32>,
    },
    /// Wall-clock budget exceeded. Treated identically to failure.
    TimedOut,
}

/// The run coordinator.
pub struct Coordinator {
    workflows: Arc<dyn WorkflowRepository>,
    runs: Arc<dyn RunRepository>,
    event_bus: Arc<dyn EventBus>,
    trigger_matcher: TriggerMatcher,
    dag_builder: DagBuilder,
    matrix_expander: MatrixExpander,
    fanout_expander: FanOutExpander,
    queue: Arc<RwLock<QueueManager>>,
    active_runs: Arc<RwLock<HashMap<RunId, RunState>>>,
}

/// In-flight state of a run.
struct RunState {
    run: Run,
    definition: WorkflowDefinition,
    dag: JobDag,
    filter: StabilityFilter,
    /// Jobs whose instances have been expanded and enqueued.
    scheduled: HashSet<String>,
    /// Aggregate job outcomes by name.
    succeeded: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
    /// Published job outputs keyed as `job_name.output_key`.
    outputs: HashMap<String, String>,
}

impl RunState {
    fn blocked_names(&self) -> Vec<String> {
        self.failed
            .iter()
            .chain(self.skipped.iter())
            .cloned()
            .collect()
    }

    fn is_settled(&self, job_name: &str) -> bool {
        self.succeeded.iter().any(|j| j == job_name)
            || self.failed.iter().any(|j| j == job_name)
            || self.skipped.iter().any(|j| j == job_name)
    }

    fn instances_mut(&mut self, job_name: &str) -> Vec<&mut JobExecution> {
        self.run
            .jobs
            .iter_mut()
            .filter(|j| j.name == job_name)
            .collect()
    }
}

impl Coordinator {
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            workflows,
            runs,
            event_bus,
            trigger_matcher: TriggerMatcher::new(),
            dag_builder: DagBuilder::new(),
            matrix_expander: MatrixExpander::new(),
            fanout_expander: FanOutExpander::new(),
            queue: Arc::new(RwLock::new(QueueManager::new())),
            active_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle a trigger event and start runs for every matching workflow.
    pub async fn handle_trigger(&self, event: TriggerEvent) -> Result<Vec<RunId>> {
        const PAGE_SIZE: u32 = 100;
        let mut triggered = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.workflows.list(PAGE_SIZE, offset).await?;
            let fetched = page.len() as u32;

            for workflow in page {
                if self.trigger_matcher.matches(&workflow.definition, &event) {
                    let run_id = self
                        .start_run(workflow.id, &workflow.definition, event.run_context())
                        .await?;
                    triggered.push(run_id);
                }
            }

            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        Ok(triggered)
    }

    /// Start a new run of a workflow.
    ///
    /// Resolves the concurrency key first: with `cancel_in_progress`,
    /// any in-flight run holding the same key is cancelled before this
    /// one is queued.
    pub async fn start_run(
        &self,
        workflow_id: WorkflowId,
        definition: &WorkflowDefinition,
        context: RunContext,
    ) -> Result<RunId> {
        let dag = self
            .dag_builder
            .build(definition)
            .map_err(|e| Error::InvalidWorkflow(e.to_string()))?;

        let concurrency_key = definition.concurrency.as_ref().map(|c| {
            resolve_concurrency_key(&c.group, &definition.name, &context, &definition.variables)
        });

        let run_id = RunId::new();

        // Supersede in-flight runs holding the same key.
        if let (Some(key), Some(concurrency)) = (&concurrency_key, &definition.concurrency)
            && concurrency.cancel_in_progress
        {
            for old in self.runs.find_in_flight(key).await? {
                info!(run = %old.id, key = %key, "superseding in-flight run");
                match self
                    .cancel_run(old.id, CancelReason::Superseded, Some(run_id))
                    .await
                {
                    // The run may settle between the lookup and the cancel.
                    Ok(()) | Err(Error::RunNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let run_number = self.runs.next_run_number(workflow_id).await?;
        let filter = context.stability_filter();

        // One placeholder per job; expanded jobs are replaced by their
        // instances once they become ready.
        let jobs: Vec<JobExecution> = definition
            .jobs
            .iter()
            .map(|j| {
                let mut exec = JobExecution::new(&j.name, j.needs.clone());
                exec.display_name = j.display_name.clone();
                exec
            })
            .collect();

        let run = Run {
            id: run_id,
            workflow_id,
            workflow_name: definition.name.clone(),
            run_number,
            status: RunStatus::Queued,
            context: context.clone(),
            concurrency_key: concurrency_key.clone(),
            jobs,
            queued_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        };

        self.runs.create(&run).await?;

        {
            let mut active = self.active_runs.write().await;
            active.insert(
                run_id,
                RunState {
                    run,
                    definition: definition.clone(),
                    dag,
                    filter,
                    scheduled: HashSet::new(),
                    succeeded: vec![],
                    failed: vec![],
                    skipped: vec![],
                    outputs: HashMap::new(),
                },
            );
        }

        self.event_bus
            .publish(Event::RunQueued(RunQueuedPayload {
                run_id,
                workflow_id,
                workflow_name: definition.name.clone(),
                run_number,
                trigger: context.trigger,
                git_ref: context.git_ref.clone(),
                git_sha: context.git_sha.clone(),
                concurrency_key,
                queued_at: chrono::Utc::now(),
            }))
            .await?;

        self.promote_ready(run_id).await?;

        Ok(run_id)
    }

    /// Promote jobs out of `Pending`/`Blocked`: skip those gated behind
    /// a failed, skipped, or cancelled dependency; expand and enqueue
    /// those whose dependencies have all succeeded.
    async fn promote_ready(&self, run_id: RunId) -> Result<()> {
        let mut events = Vec::new();

        {
            let mut active = self.active_runs.write().await;
            let Some(state) = active.get_mut(&run_id) else {
                return Ok(());
            };

            // Iterate until a fixpoint so skips propagate transitively.
            loop {
                let mut changed = false;

                let job_names: Vec<String> =
                    state.dag.jobs().iter().map(|n| n.name.clone()).collect();

                for name in job_names {
                    if state.scheduled.contains(&name) || state.is_settled(&name) {
                        continue;
                    }

                    let blocked = state.blocked_names();
                    if let Some(blocker) = state.dag.blocking_dependency(&name, &blocked) {
                        debug!(run = %run_id, job = %name, blocked_by = %blocker, "skipping job");
                        state.skipped.push(name.clone());
                        for exec in state.instances_mut(&name) {
                            exec.status = JobStatus::Skipped;
                            exec.completed_at = Some(chrono::Utc::now());
                        }
                        events.push(Event::JobSkipped(JobSkippedPayload {
                            run_id,
                            job_name: name.clone(),
                            blocked_by: blocker,
                            skipped_at: chrono::Utc::now(),
                        }));
                        changed = true;
                        continue;
                    }

                    if !state.dag.is_ready(&name, &state.succeeded) {
                        for exec in state.instances_mut(&name) {
                            if exec.status == JobStatus::Pending {
                                exec.status = JobStatus::Blocked;
                            }
                        }
                        continue;
                    }

                    let mut queue = self.queue.write().await;
                    match self.expand_and_enqueue(state, &mut queue, run_id, &name, &mut events) {
                        Ok(ExpandResult::Enqueued) => {
                            state.scheduled.insert(name.clone());
                        }
                        Ok(ExpandResult::EmptyFanOut) => {
                            // Degenerate success: zero instances, surfaced
                            // via FanOutEmpty, never a silent pass.
                            state.scheduled.insert(name.clone());
                            state.succeeded.push(name.clone());
                            changed = true;
                        }
                        Err(e) => {
                            warn!(run = %run_id, job = %name, error = %e, "fan-out expansion failed");
                            state.scheduled.insert(name.clone());
                            state.failed.push(name.clone());
                            for exec in state.instances_mut(&name) {
                                exec.status = JobStatus::Failed;
                                exec.failure = Some(FailureKind::Internal);
                                exec.completed_at = Some(chrono::Utc::now());
                            }
                            changed = true;
                        }
                    }
                }

                if !changed {
                    break;
                }
            }

            self.runs.update(&state.run).await?;
        }

        for event in events {
            self.event_bus.publish(event).await?;
        }

        self.check_run_complete(run_id).await
    }

    /// Expand a ready job into its instances and enqueue them.
    fn expand_and_enqueue(
        &self,
        state: &mut RunState,
        queue: &mut QueueManager,
        run_id: RunId,
        job_name: &str,
        events: &mut Vec<Event>,
    ) -> Result<ExpandResult> {
        let definition = state
            .definition
            .job(job_name)
            .ok_or_else(|| Error::JobNotFound(job_name.to_string()))?
            .clone();

        let mut instances: Vec<JobExecution> = Vec::new();

        if let Some(fan_out) = &definition.fan_out {
            let output_key = format!("{}.{}", fan_out.source, fan_out.output);
            let raw = state.outputs.get(&output_key).ok_or_else(|| {
                Error::CollectorOutputMissing {
                    job: fan_out.source.clone(),
                    output: fan_out.output.clone(),
                }
            })?;

            let expansion = self.fanout_expander.expand(&definition, raw, state.filter)?;

            if expansion.is_empty() {
                warn!(
                    run = %run_id,
                    job = %job_name,
                    source = %fan_out.source,
                    "fan-out resolved to zero instances"
                );
                events.push(Event::FanOutEmpty(FanOutEmptyPayload {
                    run_id,
                    job_name: job_name.to_string(),
                    source_job: fan_out.source.clone(),
                    expanded_at: chrono::Utc::now(),
                }));
                // Keep the placeholder as the job's terminal record.
                for exec in state.instances_mut(job_name) {
                    exec.status = JobStatus::Succeeded;
                    exec.completed_at = Some(chrono::Utc::now());
                }
                return Ok(ExpandResult::EmptyFanOut);
            }

            events.push(Event::FanOutExpanded(FanOutExpandedPayload {
                run_id,
                job_name: job_name.to_string(),
                group_count: expansion.group_count as u32,
                matrix_count: expansion.matrix_count as u32,
                instance_count: expansion.instances.len() as u32,
                fail_fast: expansion.fail_fast,
                expanded_at: chrono::Utc::now(),
            }));

            for instance in expansion.instances {
                let mut exec = JobExecution::new(job_name, definition.needs.clone());
                exec.display_name = Some(instance.display_name);
                exec.instance_index = Some(instance.index);
                exec.combination = instance.variables;
                exec.status = JobStatus::Runnable;
                instances.push(exec);
            }
        } else if let Some(matrix) = &definition.matrix {
            let expansion = self.matrix_expander.expand(job_name, matrix);
            for instance in expansion.instances {
                let mut exec = JobExecution::new(job_name, definition.needs.clone());
                exec.display_name = Some(instance.display_name);
                exec.instance_index = Some(instance.index);
                exec.combination = instance.values;
                exec.status = JobStatus::Runnable;
                instances.push(exec);
            }
        } else {
            let mut exec = JobExecution::new(job_name, definition.needs.clone());
            exec.display_name = definition.display_name.clone();
            exec.status = JobStatus::Runnable;
            instances.push(exec);
        }

        // Replace the placeholder with the real instances.
        state.run.jobs.retain(|j| j.name != job_name);
        for exec in &instances {
            queue.enqueue(QueuedInstance {
                run_id,
                job_id: exec.id,
                job_name: job_name.to_string(),
                instance_index: exec.instance_index,
                priority: Priority::Normal,
                queued_at: chrono::Utc::now(),
            });
        }
        state.run.jobs.extend(instances);

        Ok(ExpandResult::Enqueued)
    }

    /// Pop the next runnable instance and mark it running.
    pub async fn next_instance(&self) -> Result<Option<QueuedInstance>> {
        let queued = { self.queue.write().await.dequeue() };
        let Some(queued) = queued else {
            return Ok(None);
        };

        let mut started_event = None;
        let mut run_started_event = None;

        {
            let mut active = self.active_runs.write().await;
            if let Some(state) = active.get_mut(&queued.run_id) {
                if state.run.started_at.is_none() {
                    state.run.started_at = Some(chrono::Utc::now());
                    state.run.status = RunStatus::Running;
                    run_started_event = Some(Event::RunStarted(RunStartedPayload {
                        run_id: state.run.id,
                        workflow_id: state.run.workflow_id,
                        workflow_name: state.run.workflow_name.clone(),
                        run_number: state.run.run_number,
                        started_at: chrono::Utc::now(),
                    }));
                }

                if let Some(exec) = state.run.jobs.iter_mut().find(|j| j.id == queued.job_id) {
                    exec.status = JobStatus::Running;
                    exec.started_at = Some(chrono::Utc::now());
                    started_event = Some(Event::JobStarted(JobStartedPayload {
                        run_id: queued.run_id,
                        job_id: exec.id,
                        job_name: exec.name.clone(),
                        instance_index: exec.instance_index,
                        combination: exec.combination.clone(),
                        started_at: chrono::Utc::now(),
                    }));
                }
                self.runs.update(&state.run).await?;
            }
        }

        if let Some(event) = run_started_event {
            self.event_bus.publish(event).await?;
        }
        if let Some(event) = started_event {
            self.event_bus.publish(event).await?;
        }

        Ok(Some(queued))
    }

    /// Look up the definition and current execution record of an instance.
    pub async fn instance(
        &self,
        run_id: RunId,
        job_id: JobId,
    ) -> Result<(JobDefinition, JobExecution)> {
        let active = self.active_runs.read().await;
        let state = active
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        let exec = state
            .run
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        let definition = state
            .definition
            .job(&exec.name)
            .ok_or_else(|| Error::JobNotFound(exec.name.clone()))?;
        Ok((definition.clone(), exec.clone()))
    }

    /// Published outputs of completed jobs, keyed `job_name.output_key`.
    pub async fn run_outputs(&self, run_id: RunId) -> Result<HashMap<String, String>> {
        let active = self.active_runs.read().await;
        let state = active
            .get(&run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        Ok(state.outputs.clone())
    }

    /// Record the outcome of an executed instance.
    pub async fn instance_completed(
        &self,
        run_id: RunId,
        job_id: JobId,
        outcome: InstanceOutcome,
    ) -> Result<()> {
        let mut events = Vec::new();
        let mut job_settled: Option<String> = None;

        {
            let mut active = self.active_runs.write().await;
            let Some(state) = active.get_mut(&run_id) else {
                // Run was cancelled while the instance executed.
                return Ok(());
            };

            let Some(exec) = state.run.jobs.iter_mut().find(|j| j.id == job_id) else {
                return Err(Error::JobNotFound(job_id.to_string()));
            };

            let now = chrono::Utc::now();
            let job_name = exec.name.clone();
            let step_outputs;

            match outcome {
                InstanceOutcome::Succeeded { exit_code, outputs } => {
                    exec.status = JobStatus::Succeeded;
                    exec.exit_code = Some(exit_code);
                    step_outputs = Some(outputs);
                }
                InstanceOutcome::Failed { exit_code } => {
                    exec.status = JobStatus::Failed;
                    exec.exit_code = exit_code;
                    exec.failure = Some(FailureKind::StepFailed);
                    step_outputs = None;
                }
                InstanceOutcome::TimedOut => {
                    exec.status = JobStatus::Failed;
                    exec.failure = Some(FailureKind::Timeout);
                    step_outputs = None;
                }
            }
            exec.completed_at = Some(now);
            if let Some(started) = exec.started_at {
                exec.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
            }

            events.push(Event::JobCompleted(JobCompletedPayload {
                run_id,
                job_id,
                job_name: job_name.clone(),
                instance_index: exec.instance_index,
                status: exec.status,
                failure: exec.failure,
                exit_code: exec.exit_code,
                duration_ms: exec.duration_ms.unwrap_or(0),
                completed_at: now,
            }));

            let failed = exec.status == JobStatus::Failed;
            let definition = state
                .definition
                .job(&job_name)
                .ok_or_else(|| Error::JobNotFound(job_name.clone()))?
                .clone();

            // Resolve declared job outputs from step outputs on success,
            // recording them on the execution and for downstream jobs.
            if let Some(step_outputs) = step_outputs {
                let mut ctx = InterpolationContext::new();
                ctx.step_outputs = step_outputs;
                let mut resolved = HashMap::new();
                for (key, expr) in &definition.outputs {
                    let value = ctx.interpolate(expr);
                    state
                        .outputs
                        .insert(format!("{}.{}", job_name, key), value.clone());
                    resolved.insert(key.clone(), value);
                }
                if let Some(exec) = state.run.jobs.iter_mut().find(|j| j.id == job_id) {
                    exec.outputs = resolved;
                }
            }

            // Fail-fast: cancel queued sibling instances.
            if failed && definition.is_expanded() && definition.fail_fast() {
                let dropped = self.queue.write().await.drop_job(run_id, &job_name);
                if dropped > 0 {
                    info!(run = %run_id, job = %job_name, dropped, "fail-fast cancelled siblings");
                }
                for sibling in state.instances_mut(&job_name) {
                    if !sibling.status.is_terminal() && sibling.status != JobStatus::Running {
                        sibling.status = JobStatus::Cancelled;
                        sibling.completed_at = Some(now);
                    }
                }
            }

            // Aggregate once every instance of the job is terminal.
            let all_terminal = state
                .run
                .instances_of(&job_name)
                .iter()
                .all(|j| j.status.is_terminal());
            if all_terminal && !state.is_settled(&job_name) {
                let any_failed = state
                    .run
                    .instances_of(&job_name)
                    .iter()
                    .any(|j| !j.status.is_success());
                if !any_failed || definition.continue_on_error {
                    state.succeeded.push(job_name.clone());
                } else {
                    state.failed.push(job_name.clone());
                }
                job_settled = Some(job_name);
            }

            self.runs.update(&state.run).await?;
        }

        for event in events {
            self.event_bus.publish(event).await?;
        }

        if job_settled.is_some() {
            self.promote_ready(run_id).await?;
        }

        Ok(())
    }

    /// Cancel a run: unfinished jobs transition to `Cancelled` at
    /// whatever state they are in.
    pub async fn cancel_run(
        &self,
        run_id: RunId,
        reason: CancelReason,
        superseded_by: Option<RunId>,
    ) -> Result<()> {
        self.queue.write().await.drop_run(run_id);

        let event = {
            let mut active = self.active_runs.write().await;
            let Some(mut state) = active.remove(&run_id) else {
                return Err(Error::RunNotFound(run_id.to_string()));
            };

            let now = chrono::Utc::now();
            for exec in &mut state.run.jobs {
                if !exec.status.is_terminal() {
                    exec.status = JobStatus::Cancelled;
                    exec.completed_at = Some(now);
                }
            }
            state.run.status = RunStatus::Cancelled;
            state.run.completed_at = Some(now);
            if let Some(started) = state.run.started_at {
                state.run.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
            }
            self.runs.update(&state.run).await?;

            Event::RunCancelled(RunCancelledPayload {
                run_id,
                workflow_id: state.run.workflow_id,
                reason,
                superseded_by,
                cancelled_at: now,
            })
        };

        self.event_bus.publish(event).await
    }

    async fn check_run_complete(&self, run_id: RunId) -> Result<()> {
        let event = {
            let mut active = self.active_runs.write().await;
            let Some(state) = active.get_mut(&run_id) else {
                return Ok(());
            };

            let total = state.dag.jobs().len();
            let settled = state.succeeded.len() + state.failed.len() + state.skipped.len();
            if settled < total {
                return Ok(());
            }

            let now = chrono::Utc::now();
            state.run.status = if state.failed.is_empty() {
                RunStatus::Success
            } else {
                RunStatus::Failure
            };
            state.run.completed_at = Some(now);
            if let Some(started) = state.run.started_at {
                state.run.duration_ms = Some((now - started).num_milliseconds().max(0) as u64);
            }
            self.runs.update(&state.run).await?;

            let event = Event::RunCompleted(RunCompletedPayload {
                run_id,
                workflow_id: state.run.workflow_id,
                workflow_name: state.run.workflow_name.clone(),
                run_number: state.run.run_number,
                status: state.run.status,
                jobs_succeeded: state.succeeded.len() as u32,
                jobs_failed: state.failed.len() as u32,
                jobs_skipped: state.skipped.len() as u32,
                duration_ms: state.run.duration_ms.unwrap_or(0),
                completed_at: now,
            });

            info!(
                run = %run_id,
                status = ?state.run.status,
                succeeded = state.succeeded.len(),
                failed = state.failed.len(),
                skipped = state.skipped.len(),
                "run complete"
            );

            active.remove(&run_id);
            event
        };

        self.event_bus.publish(event).await
    }

    /// Snapshot of a run, in-flight or finished.
    pub async fn run(&self, run_id: RunId) -> Result<Option<Run>> {
        {
            let active = self.active_runs.read().await;
            if let Some(state) = active.get(&run_id) {
                return Ok(Some(state.run.clone()));
            }
        }
        self.runs.get(run_id).await
    }

    /// Current queue length.
    pub async fn queue_length(&self) -> usize {
        self.queue.read().await.len()
    }
}

enum ExpandResult {
    Enqueued,
    EmptyFanOut,
}
