//! Queue management for runnable job instances.

use chrono::{DateTime, Utc};
use gantry_core::ids::{JobId, RunId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Priority for queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

/// A runnable job instance waiting for a worker.
#[derive(Debug, Clone)]
pub struct QueuedInstance {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub instance_index: Option<usize>,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
}

impl PartialEq for QueuedInstance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedInstance {}

impl PartialOrd for QueuedInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier queued time. The job id
        // breaks ties so equality agrees with the ordering.
        (self.priority as u8)
            .cmp(&(other.priority as u8))
            .then_with(|| other.queued_at.cmp(&self.queued_at))
            .then_with(|| self.job_id.as_uuid().cmp(other.job_id.as_uuid()))
    }
}

/// FIFO-within-priority queue of runnable instances.
#[derive(Debug, Default)]
pub struct QueueManager {
    queue: BinaryHeap<QueuedInstance>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
        }
    }

    /// Add an instance to the queue.
    pub fn enqueue(&mut self, instance: QueuedInstance) {
        self.queue.push(instance);
    }

    /// Get the next instance to execute.
    pub fn dequeue(&mut self) -> Option<QueuedInstance> {
        self.queue.pop()
    }

    /// Drop all queued instances belonging to a run (on cancellation).
    pub fn drop_run(&mut self, run_id: RunId) -> usize {
        let before = self.queue.len();
        let remaining: Vec<QueuedInstance> = self
            .queue
            .drain()
            .filter(|i| i.run_id != run_id)
            .collect();
        self.queue = remaining.into_iter().collect();
        before - self.queue.len()
    }

    /// Drop queued siblings of a job (fail-fast cancellation).
    pub fn drop_job(&mut self, run_id: RunId, job_name: &str) -> usize {
        let before = self.queue.len();
        let remaining: Vec<QueuedInstance> = self
            .queue
            .drain()
            .filter(|i| !(i.run_id == run_id && i.job_name == job_name))
            .collect();
        self.queue = remaining.into_iter().collect();
        before - self.queue.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
