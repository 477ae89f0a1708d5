//! Test harness wiring the coordinator to in-memory adapters.

use gantry_core::context::RunContext;
use gantry_core::ids::RunId;
use gantry_core::ports::{EventBus, EventStream, RunRepository, WorkflowRepository};
use gantry_core::run::{JobExecution, Run};
use gantry_core::workflow::{JobDefinition, TriggerType, Workflow, WorkflowDefinition};
use gantry_scheduler::coordinator::{Coordinator, InstanceOutcome};
use gantry_store::{MemEventBus, MemRunRepository, MemWorkflowRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// In-process coordinator harness.
pub struct TestHarness {
    pub coordinator: Arc<Coordinator>,
    pub bus: MemEventBus,
    pub runs: Arc<MemRunRepository>,
    pub workflows: Arc<MemWorkflowRepository>,
}

impl TestHarness {
    pub fn new() -> Self {
        let bus = MemEventBus::new();
        let runs = Arc::new(MemRunRepository::new());
        let workflows = Arc::new(MemWorkflowRepository::new());

        let coordinator = Arc::new(Coordinator::new(
            workflows.clone() as Arc<dyn WorkflowRepository>,
            runs.clone() as Arc<dyn RunRepository>,
            Arc::new(bus.clone()) as Arc<dyn EventBus>,
        ));

        Self {
            coordinator,
            bus,
            runs,
            workflows,
        }
    }

    /// Register the workflow and start a run for the given trigger.
    pub async fn start(&self, definition: &WorkflowDefinition, trigger: TriggerType) -> RunId {
        self.start_with_context(definition, RunContext::new(trigger))
            .await
    }

    pub async fn start_with_context(
        &self,
        definition: &WorkflowDefinition,
        context: RunContext,
    ) -> RunId {
        let workflow = self.register(definition).await;
        self.coordinator
            .start_run(workflow.id, definition, context)
            .await
            .expect("run must start")
    }

    pub async fn register(&self, definition: &WorkflowDefinition) -> Workflow {
        self.workflows
            .create(definition)
            .await
            .expect("workflow must register")
    }

    /// Subscribe to bus events. Call before the action under test.
    pub async fn subscribe(&self, pattern: &str) -> EventStream {
        self.bus.subscribe(pattern).await.expect("subscribe")
    }

    /// Drain the queue, deciding each instance's outcome with the given
    /// closure, until no work remains. Returns the final run state.
    pub async fn drive<F>(&self, run_id: RunId, mut decide: F) -> Run
    where
        F: FnMut(&JobDefinition, &JobExecution) -> InstanceOutcome,
    {
        while let Some(queued) = self
            .coordinator
            .next_instance()
            .await
            .expect("dequeue must not fail")
        {
            let (definition, exec) = self
                .coordinator
                .instance(queued.run_id, queued.job_id)
                .await
                .expect("instance must exist");
            let outcome = decide(&definition, &exec);
            self.coordinator
                .instance_completed(queued.run_id, queued.job_id, outcome)
                .await
                .expect("completion must record");
        }

        self.run(run_id).await
    }

    pub async fn run(&self, run_id: RunId) -> Run {
        self.coordinator
            .run(run_id)
            .await
            .expect("run lookup")
            .expect("run must exist")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome: instance succeeded with no outputs.
pub fn succeed() -> InstanceOutcome {
    InstanceOutcome::Succeeded {
        exit_code: 0,
        outputs: HashMap::new(),
    }
}

/// Outcome: instance succeeded with step outputs, keyed `step.key`.
pub fn succeed_with_outputs(outputs: &[(&str, &str)]) -> InstanceOutcome {
    InstanceOutcome::Succeeded {
        exit_code: 0,
        outputs: outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Outcome: instance failed with an exit code.
pub fn fail(exit_code: i32) -> InstanceOutcome {
    InstanceOutcome::Failed {
        exit_code: Some(exit_code),
    }
}

/// Wait for the next event on a stream, panicking after a timeout.
pub async fn next_event(stream: &mut EventStream) -> gantry_core::events::Event {
    use futures::StreamExt;

    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
        .expect("event stream errored")
}
