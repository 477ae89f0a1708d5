//! In-memory workflow repository.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::ids::WorkflowId;
use gantry_core::ports::WorkflowRepository;
use gantry_core::workflow::{Workflow, WorkflowDefinition};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemWorkflowRepository {
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl MemWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for MemWorkflowRepository {
    async fn create(&self, definition: &WorkflowDefinition) -> Result<Workflow> {
        let now = Utc::now();
        let workflow = Workflow {
            id: WorkflowId::new(),
            name: definition.name.clone(),
            definition: definition.clone(),
            created_at: now,
            updated_at: now,
        };
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Workflow>> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .find(|w| w.name == name)
            .cloned())
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Workflow>> {
        let workflows = self.workflows.read().await;
        let mut all: Vec<Workflow> = workflows.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update(&self, id: WorkflowId, definition: &WorkflowDefinition) -> Result<Workflow> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&id)
            .ok_or_else(|| Error::WorkflowNotFound(id.to_string()))?;
        workflow.name = definition.name.clone();
        workflow.definition = definition.clone();
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }

    async fn delete(&self, id: WorkflowId) -> Result<()> {
        self.workflows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::WorkflowNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str) -> WorkflowDefinition {
        let yaml = format!(
            r#"
version: "1"
name: {name}
jobs:
  - name: lint
    steps:
      - name: tox
        run: tox run -e lint
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let repo = MemWorkflowRepository::new();
        let created = repo.create(&definition("ci")).await.unwrap();

        assert!(repo.get(created.id).await.unwrap().is_some());
        assert_eq!(
            repo.get_by_name("ci").await.unwrap().unwrap().id,
            created.id
        );
        assert!(repo.get_by_name("nightly").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_an_error() {
        let repo = MemWorkflowRepository::new();
        assert!(repo.delete(WorkflowId::new()).await.is_err());
    }
}
