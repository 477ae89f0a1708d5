//! In-memory run repository.

use async_trait::async_trait;
use gantry_core::ids::{RunId, WorkflowId};
use gantry_core::ports::RunRepository;
use gantry_core::run::Run;
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemRunRepository {
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
    counters: Arc<RwLock<HashMap<WorkflowId, u32>>>,
}

impl MemRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemRunRepository {
    async fn create(&self, run: &Run) -> Result<RunId> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run.id)
    }

    async fn get(&self, id: RunId) -> Result<Option<Run>> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn get_by_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Run>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<Run> = runs
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        // Newest first
        matching.sort_by(|a, b| b.run_number.cmp(&a.run_number));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn next_run_number(&self, workflow_id: WorkflowId) -> Result<u32> {
        let mut counters = self.counters.write().await;
        let counter = counters.entry(workflow_id).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().await;
        if !runs.contains_key(&run.id) {
            return Err(Error::RunNotFound(run.id.to_string()));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn find_in_flight(&self, concurrency_key: &str) -> Result<Vec<Run>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| {
                r.status.is_in_flight()
                    && r.concurrency_key.as_deref() == Some(concurrency_key)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gantry_core::context::RunContext;
    use gantry_core::run::RunStatus;
    use gantry_core::workflow::TriggerType;

    fn run(workflow_id: WorkflowId, number: u32, key: Option<&str>) -> Run {
        Run {
            id: RunId::new(),
            workflow_id,
            workflow_name: "ci".to_string(),
            run_number: number,
            status: RunStatus::Queued,
            context: RunContext::new(TriggerType::PullRequest),
            concurrency_key: key.map(str::to_string),
            jobs: vec![],
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    #[tokio::test]
    async fn test_run_numbers_are_sequential_per_workflow() {
        let repo = MemRunRepository::new();
        let a = WorkflowId::new();
        let b = WorkflowId::new();

        assert_eq!(repo.next_run_number(a).await.unwrap(), 1);
        assert_eq!(repo.next_run_number(a).await.unwrap(), 2);
        assert_eq!(repo.next_run_number(b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_in_flight_ignores_terminal_runs() {
        let repo = MemRunRepository::new();
        let workflow_id = WorkflowId::new();

        let active = run(workflow_id, 1, Some("ci-main"));
        let mut done = run(workflow_id, 2, Some("ci-main"));
        done.status = RunStatus::Success;
        let other = run(workflow_id, 3, Some("ci-develop"));

        repo.create(&active).await.unwrap();
        repo.create(&done).await.unwrap();
        repo.create(&other).await.unwrap();

        let in_flight = repo.find_in_flight("ci-main").await.unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].id, active.id);
    }

    #[tokio::test]
    async fn test_update_missing_run_is_an_error() {
        let repo = MemRunRepository::new();
        let orphan = run(WorkflowId::new(), 1, None);
        assert!(repo.update(&orphan).await.is_err());
    }
}
