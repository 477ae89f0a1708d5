//! DAG resolution for workflow jobs.

use gantry_core::workflow::{JobDefinition, WorkflowDefinition};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in job dependencies")]
    CycleDetected,
    #[error("Unknown job dependency: {0}")]
    UnknownDependency(String),
    #[error("Empty workflow")]
    EmptyWorkflow,
}

/// A node in the job DAG.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub name: String,
    pub definition: JobDefinition,
}

/// Directed acyclic graph representing job dependencies.
#[derive(Debug)]
pub struct JobDag {
    graph: DiGraph<DagNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl JobDag {
    /// Get the root jobs (jobs with no dependencies).
    pub fn roots(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Get jobs that can run after a given job completes.
    pub fn successors(&self, job_name: &str) -> Vec<&DagNode> {
        self.name_to_index
            .get(job_name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Outgoing)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get jobs that must complete before a given job can run.
    pub fn predecessors(&self, job_name: &str) -> Vec<&DagNode> {
        self.name_to_index
            .get(job_name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get topologically sorted jobs.
    pub fn topological_order(&self) -> Result<Vec<&DagNode>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|_| DagError::CycleDetected)
    }

    /// Get all jobs.
    pub fn jobs(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Check if a job is ready to run given succeeded jobs.
    pub fn is_ready(&self, job_name: &str, succeeded: &[String]) -> bool {
        self.predecessors(job_name)
            .iter()
            .all(|pred| succeeded.contains(&pred.name))
    }

    /// Find the dependency that forces a job to be skipped, if any:
    /// the first predecessor that failed, was skipped, or was cancelled.
    pub fn blocking_dependency(&self, job_name: &str, blocked: &[String]) -> Option<String> {
        self.predecessors(job_name)
            .iter()
            .find(|pred| blocked.contains(&pred.name))
            .map(|pred| pred.name.clone())
    }
}

/// Builder for constructing job DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a DAG from a workflow definition.
    pub fn build(&self, workflow: &WorkflowDefinition) -> Result<JobDag, DagError> {
        if workflow.jobs.is_empty() {
            return Err(DagError::EmptyWorkflow);
        }

        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        // Add all jobs as nodes
        for job in &workflow.jobs {
            let node = DagNode {
                name: job.name.clone(),
                definition: job.clone(),
            };
            let idx = graph.add_node(node);
            name_to_index.insert(job.name.clone(), idx);
        }

        // Add edges for dependencies
        for job in &workflow.jobs {
            let job_idx = name_to_index[&job.name];
            for dep in &job.needs {
                let dep_idx = name_to_index
                    .get(dep)
                    .ok_or_else(|| DagError::UnknownDependency(dep.clone()))?;
                graph.add_edge(*dep_idx, job_idx, ());
            }
        }

        let dag = JobDag {
            graph,
            name_to_index,
        };

        // Verify no cycles
        dag.topological_order()?;

        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
