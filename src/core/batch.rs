//! Batch jobs: named groupings of tasks submitted together.
//!
//! A batch never stores its own status. Status and progress are derived
//! from the member tasks every time a snapshot is taken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{Params, Priority, Task, TaskId, TaskKind, TaskStatus};

/// Unique identifier for a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new unique job identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One entry of a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Kind tag, e.g. `generate-artifact`.
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Handler input.
    #[serde(default, alias = "spec")]
    pub params: Params,
    /// Optional per-task retry ceiling.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<TaskKind>, params: Params) -> Self {
        Self {
            kind: kind.into(),
            params,
            max_retries: None,
        }
    }
}

/// A batch file: a name plus the task specs to submit together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    pub name: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub tasks: Vec<TaskSpec>,
}

/// A named grouping of tasks, in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    pub name: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<TaskId>,
}

impl BatchJob {
    pub fn new(name: &str, priority: Priority, tasks: Vec<TaskId>) -> Self {
        Self {
            id: JobId::new(),
            name: name.to_string(),
            priority,
            created_at: Utc::now(),
            tasks,
        }
    }
}

/// Derive a batch status from the statuses of its tasks.
///
/// Completed iff every task is Completed; otherwise Failed as soon as one
/// task is terminally Failed; otherwise InProgress once any task has been
/// picked up; Pending only when nothing has started.
pub fn derive_status<I>(statuses: I) -> TaskStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut total = 0usize;
    let mut completed = 0usize;
    let mut failed = false;
    let mut started = false;

    for status in statuses {
        total += 1;
        match status {
            TaskStatus::Completed => {
                completed += 1;
                started = true;
            }
            TaskStatus::Failed => failed = true,
            TaskStatus::InProgress | TaskStatus::Retrying => started = true,
            TaskStatus::Pending => {}
        }
    }

    if total > 0 && completed == total {
        TaskStatus::Completed
    } else if failed {
        TaskStatus::Failed
    } else if started {
        TaskStatus::InProgress
    } else {
        TaskStatus::Pending
    }
}

/// Read-only view of a batch with its derived status and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub id: JobId,
    pub name: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    /// Completed tasks / total tasks.
    pub progress: f64,
    pub tasks: Vec<Task>,
}

impl BatchSnapshot {
    /// Build a snapshot from the batch and the current state of its tasks.
    pub fn new(job: &BatchJob, tasks: Vec<Task>) -> Self {
        let status = derive_status(tasks.iter().map(|t| t.status));
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let progress = if tasks.is_empty() {
            0.0
        } else {
            completed as f64 / tasks.len() as f64
        };

        Self {
            id: job.id,
            name: job.name.clone(),
            priority: job.priority,
            created_at: job.created_at,
            status,
            progress,
            tasks,
        }
    }
}
