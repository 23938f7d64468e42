//! Bounded retention of task snapshots and batch jobs.
//!
//! Workers publish a snapshot on every transition; queries read from here.
//! When a capacity is exceeded the oldest evictable entry goes:
//! - a task is evictable once terminal and not referenced by a retained batch;
//! - a batch is evictable once its derived status is terminal.
//!
//! Live tasks are never evicted, so the store may temporarily exceed its
//! task capacity under a large backlog.

use std::collections::{HashMap, VecDeque};

use crate::core::{derive_status, BatchJob, BatchSnapshot, JobId, Task, TaskId};
use crate::lw_trace;

#[derive(Debug)]
pub struct TaskStore {
    tasks: HashMap<TaskId, Task>,
    task_order: VecDeque<TaskId>,
    batches: HashMap<JobId, BatchJob>,
    batch_order: VecDeque<JobId>,
    task_capacity: usize,
    batch_capacity: usize,
}

impl TaskStore {
    pub fn new(task_capacity: usize, batch_capacity: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            task_order: VecDeque::new(),
            batches: HashMap::new(),
            batch_order: VecDeque::new(),
            task_capacity: task_capacity.max(1),
            batch_capacity: batch_capacity.max(1),
        }
    }

    /// Insert or replace the snapshot for `task.id`.
    pub fn publish(&mut self, task: &Task) {
        if self.tasks.insert(task.id, task.clone()).is_none() {
            self.task_order.push_back(task.id);
        }
        self.evict_tasks();
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Retained tasks, oldest first.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn insert_batch(&mut self, job: BatchJob) {
        if !self.batches.contains_key(&job.id) {
            self.batch_order.push_back(job.id);
        }
        self.batches.insert(job.id, job);
        self.evict_batches();
    }

    pub fn batch(&self, id: JobId) -> Option<&BatchJob> {
        self.batches.get(&id)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Current view of a batch with status and progress derived from its tasks.
    pub fn batch_snapshot(&self, id: JobId) -> Option<BatchSnapshot> {
        let job = self.batches.get(&id)?;
        let tasks = job
            .tasks
            .iter()
            .filter_map(|tid| self.tasks.get(tid).cloned())
            .collect();
        Some(BatchSnapshot::new(job, tasks))
    }

    fn is_pinned(&self, task: &Task) -> bool {
        task.batch.is_some_and(|b| self.batches.contains_key(&b))
    }

    fn batch_is_terminal(&self, job: &BatchJob) -> bool {
        derive_status(
            job.tasks
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .map(|t| t.status),
        )
        .is_terminal()
    }

    fn evict_tasks(&mut self) {
        while self.tasks.len() > self.task_capacity {
            let victim = self.task_order.iter().position(|id| {
                self.tasks
                    .get(id)
                    .is_some_and(|t| t.is_finished() && !self.is_pinned(t))
            });
            let Some(pos) = victim else {
                break;
            };
            if let Some(id) = self.task_order.remove(pos) {
                lw_trace!("store: evicting task {}", id.short());
                self.tasks.remove(&id);
            }
        }
    }

    fn evict_batches(&mut self) {
        while self.batches.len() > self.batch_capacity {
            let victim = self.batch_order.iter().position(|id| {
                self.batches
                    .get(id)
                    .is_some_and(|job| self.batch_is_terminal(job))
            });
            let Some(pos) = victim else {
                break;
            };
            if let Some(id) = self.batch_order.remove(pos) {
                lw_trace!("store: evicting batch {}", id.short());
                self.batches.remove(&id);
            }
        }
        self.evict_tasks();
    }
}
