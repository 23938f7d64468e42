//! Task data model for the dispatch lanes.
//!
//! Tasks are the atomic units of work pulled by workers. Each task tracks
//! its kind, priority, input parameters, status, timing, retry budget and
//! result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::batch::JobId;

/// Free-form input bag handed to a task's handler.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Retry ceiling applied when a task is created without an explicit one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Dispatch priority. Lanes are drained strictly from `Critical` down to `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All priorities in dispatch order (highest first).
    pub const DISPATCH_ORDER: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// Position of this priority's lane in dispatch order.
    pub fn lane_index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(crate::Error::Validation(format!(
                "unknown priority '{}' (expected critical, high, medium or low)",
                other
            ))),
        }
    }
}

/// The operation a task asks a handler to perform.
///
/// The well-known kinds cover the generation, validation and optimization
/// jobs the scheduler was built for; `Custom` keeps the registry open to
/// any other handler a caller wants to plug in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    GenerateArtifact,
    GenerateScript,
    ValidateTarget,
    OptimizeResource,
    Custom(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            TaskKind::GenerateArtifact => "generate-artifact",
            TaskKind::GenerateScript => "generate-script",
            TaskKind::ValidateTarget => "validate-target",
            TaskKind::OptimizeResource => "optimize-resource",
            TaskKind::Custom(name) => name,
        }
    }

    /// Parse a kind tag. Unknown tags become `Custom`; parsing never fails.
    pub fn parse(tag: &str) -> Self {
        match tag.trim() {
            "generate-artifact" => TaskKind::GenerateArtifact,
            "generate-script" => TaskKind::GenerateScript,
            "validate-target" => TaskKind::ValidateTarget,
            "optimize-resource" => TaskKind::OptimizeResource,
            other => TaskKind::Custom(other.to_string()),
        }
    }
}

impl From<&str> for TaskKind {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(TaskKind::parse(&tag))
    }
}

/// Task status in its lifecycle.
///
/// `Completed` and `Failed` are terminal: once reached they never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task submitted and waiting in its lane.
    Pending,
    /// Task is being executed by a worker.
    InProgress,
    /// Task completed successfully.
    Completed,
    /// Task failed and will not be attempted again.
    Failed,
    /// Task failed, was repaired, and is waiting in its lane for another attempt.
    Retrying,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Retrying => write!(f, "retrying"),
        }
    }
}

/// Why a task ended up terminally `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// No handler is registered for the task's kind.
    UnsupportedOperation,
    /// The failure text matched no diagnostic rule.
    Unclassified,
    /// The failure was diagnosed but its rule is not auto-repairable.
    NotRepairable,
    /// The repair strategy ran and reported failure (or was not registered).
    RepairFailed,
    /// The retry ceiling was already reached when the task failed again.
    RetryBudgetExhausted,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::UnsupportedOperation => "unsupported-operation",
            FailureClass::Unclassified => "unclassified",
            FailureClass::NotRepairable => "not-repairable",
            FailureClass::RepairFailed => "repair-failed",
            FailureClass::RetryBudgetExhausted => "retry-budget-exhausted",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Operation the task's handler performs.
    pub kind: TaskKind,
    /// Lane the task is dispatched from.
    pub priority: Priority,
    /// Input handed to the handler.
    pub params: Params,
    /// Current execution status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the most recent attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Text of the most recent failure.
    pub error: Option<String>,
    /// Classification of a terminal failure.
    pub failure: Option<FailureClass>,
    /// Number of retries consumed so far.
    pub retry_count: u32,
    /// Maximum number of retries this task may consume.
    pub max_retries: u32,
    /// Output handle reported by a successful handler.
    pub output: Option<String>,
    /// Annotation attached by the submission gate. Never interpreted here.
    pub risk: Option<serde_json::Value>,
    /// Batch job this task belongs to, if any.
    pub batch: Option<JobId>,
}

impl Task {
    /// Create a new task.
    ///
    /// The task is created `Pending` with a generated ID, no timestamps
    /// besides creation, a zero retry counter and the default ceiling.
    pub fn new(kind: impl Into<TaskKind>, priority: Priority, params: Params) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            priority,
            params,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            failure: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            output: None,
            risk: None,
            batch: None,
        }
    }

    /// Override the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Start an attempt.
    ///
    /// Transitions status to InProgress and records the start time.
    pub fn start(&mut self) {
        if self.is_finished() {
            return;
        }
        self.status = TaskStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task as successfully completed.
    pub fn complete(&mut self, output: Option<String>) {
        if self.is_finished() {
            return;
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output = output;
    }

    /// Mark the task as terminally failed.
    pub fn fail(&mut self, error: &str, class: FailureClass) {
        if self.is_finished() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_string());
        self.failure = Some(class);
        self.completed_at = Some(Utc::now());
    }

    /// Record a failed attempt that will be retried after repair.
    pub fn mark_retrying(&mut self, error: &str) {
        if self.is_finished() {
            return;
        }
        self.status = TaskStatus::Retrying;
        self.error = Some(error.to_string());
    }

    /// Whether another retry fits within the ceiling.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Check if the task is in a terminal state (Completed or Failed).
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time between the start of the final attempt and completion.
    pub fn latency(&self) -> Option<std::time::Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }
}
