//! Scheduler facade.
//!
//! The `Scheduler` is the public submission, query and control surface. It
//! owns the lanes, the task store, the batch registry, the metrics and the
//! event channel, and starts or stops the worker pool that drains them.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use lanework::core::{Params, Priority, TaskStatus};
//! use lanework::orchestration::{HandlerOutcome, Scheduler};
//!
//! let scheduler = Scheduler::builder()
//!     .workers(2)
//!     .handler("validate-target", |_: &Params| HandlerOutcome::success(None))
//!     .build()?;
//! scheduler.start()?;
//!
//! let id = scheduler.submit("validate-target".into(), Priority::High, Params::new())?;
//! assert!(scheduler.wait_for(&[id], Duration::from_secs(5)));
//! assert_eq!(scheduler.get_task(id).unwrap().status, TaskStatus::Completed);
//!
//! scheduler.stop()?;
//! # Ok::<(), lanework::Error>(())
//! ```

use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::gate::{OpenGate, SubmissionGate};
use super::handler::{CommandHandler, HandlerRegistry, TaskHandler};
use super::lanes::PriorityLanes;
use super::metrics::{Metrics, MetricsSnapshot};
use super::pool::{Shared, WorkerPool};
use super::store::TaskStore;
use crate::config::Config;
use crate::core::{
    BatchJob, BatchSnapshot, FailureClass, JobId, Params, Priority, Task, TaskId, TaskKind,
    TaskSpec, TaskStatus,
};
use crate::repair::{DiagnosticTable, RepairExecutor, RepairRecord, RepairStrategy};
use crate::{lw_info, lw_debug, lw_warn, Error, Result};

/// Task lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    TaskSubmitted {
        task_id: TaskId,
        priority: Priority,
    },
    TaskStarted {
        task_id: TaskId,
        worker: usize,
        /// 1 for the first attempt.
        attempt: u32,
    },
    TaskCompleted {
        task_id: TaskId,
        output: Option<String>,
    },
    /// A failed attempt was repaired and the task went back into its lane.
    TaskRetrying {
        task_id: TaskId,
        retry_count: u32,
        strategy: String,
    },
    TaskFailed {
        task_id: TaskId,
        class: FailureClass,
        error: String,
    },
    BatchSubmitted {
        job_id: JobId,
        tasks: Vec<TaskId>,
    },
}

impl SchedulerEvent {
    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            SchedulerEvent::TaskSubmitted { task_id, .. }
            | SchedulerEvent::TaskStarted { task_id, .. }
            | SchedulerEvent::TaskCompleted { task_id, .. }
            | SchedulerEvent::TaskRetrying { task_id, .. }
            | SchedulerEvent::TaskFailed { task_id, .. } => Some(*task_id),
            SchedulerEvent::BatchSubmitted { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerEvent::TaskCompleted { .. } | SchedulerEvent::TaskFailed { .. }
        )
    }
}

/// Fan-out of scheduler events to any number of subscribers.
///
/// Subscribers whose receiver has been dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SchedulerEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: SchedulerEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<SchedulerEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Priority-lane scheduler with a self-repairing retry loop.
pub struct Scheduler {
    shared: Arc<Shared>,
    gate: Arc<dyn SubmissionGate>,
    pool: Mutex<Option<WorkerPool>>,
    workers: usize,
    default_max_retries: u32,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Build a scheduler from `config`, with its command handlers registered.
    pub fn from_config(config: &Config) -> Result<Self> {
        SchedulerBuilder::from_config(config).build()
    }

    // Submission

    /// Submit one task with the default retry ceiling.
    pub fn submit(&self, kind: TaskKind, priority: Priority, params: Params) -> Result<TaskId> {
        let task = Task::new(kind, priority, params).with_max_retries(self.default_max_retries);
        self.submit_task(task)
    }

    /// Submit a pre-built task, e.g. one with a custom retry ceiling.
    pub fn submit_task(&self, task: Task) -> Result<TaskId> {
        validate_new(&task)?;
        let task = self.review(task)?;
        let id = task.id;
        self.enqueue(task);
        Ok(id)
    }

    /// Submit a batch of tasks sharing one priority.
    ///
    /// Every task is reviewed by the gate before anything is enqueued; a single
    /// rejection rejects the whole batch.
    pub fn submit_batch(&self, name: &str, priority: Priority, specs: Vec<TaskSpec>) -> Result<JobId> {
        if specs.is_empty() {
            return Err(Error::Validation(format!("batch '{}' has no tasks", name)));
        }

        let mut tasks = Vec::with_capacity(specs.len());
        for spec in specs {
            let max_retries = spec.max_retries.unwrap_or(self.default_max_retries);
            let task = Task::new(spec.kind, priority, spec.params).with_max_retries(max_retries);
            tasks.push(self.review(task)?);
        }

        let job = BatchJob::new(name, priority, tasks.iter().map(|t| t.id).collect());
        let job_id = job.id;
        let task_ids = job.tasks.clone();
        self.shared.store().insert_batch(job);

        lw_info!(
            "batch '{}' ({}) submitted with {} tasks at {} priority",
            name,
            job_id.short(),
            tasks.len(),
            priority
        );
        self.shared.events.emit(SchedulerEvent::BatchSubmitted {
            job_id,
            tasks: task_ids,
        });

        for mut task in tasks {
            task.batch = Some(job_id);
            self.enqueue(task);
        }
        Ok(job_id)
    }

    fn review(&self, mut task: Task) -> Result<Task> {
        let verdict = self.gate.review(&task.kind, &task.params).map_err(|reason| {
            lw_warn!("submission of {} rejected: {}", task.kind, reason);
            Error::Rejected(reason)
        })?;
        if let Some(params) = verdict.params {
            task.params = params;
        }
        task.risk = verdict.risk;
        Ok(task)
    }

    fn enqueue(&self, task: Task) {
        self.shared.publish(&task);
        lw_debug!(
            "task {} submitted ({}, {} priority, max_retries={})",
            task.id.short(),
            task.kind,
            task.priority,
            task.max_retries
        );
        self.shared.events.emit(SchedulerEvent::TaskSubmitted {
            task_id: task.id,
            priority: task.priority,
        });
        self.shared.lanes.enqueue(task);
    }

    // Queries

    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.shared.store().get(id).cloned()
    }

    /// Like `get_task`, but a missing task is an error.
    pub fn task(&self, id: TaskId) -> Result<Task> {
        self.get_task(id).ok_or(Error::TaskNotFound(id))
    }

    pub fn get_batch(&self, id: JobId) -> Option<BatchSnapshot> {
        self.shared.store().batch_snapshot(id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// The metrics aggregator itself, for the health monitor.
    pub fn metrics_source(&self) -> Arc<Metrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Retained repair records, oldest first.
    pub fn repair_history(&self) -> Vec<RepairRecord> {
        self.shared.repair.history()
    }

    pub fn repair_history_for(&self, id: TaskId) -> Vec<RepairRecord> {
        self.shared.repair.records_for(id)
    }

    pub fn subscribe(&self) -> Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Number of tasks waiting in the lanes.
    pub fn queued(&self) -> usize {
        self.shared.lanes.len()
    }

    pub fn handler_kinds(&self) -> Vec<TaskKind> {
        self.shared.handlers.kinds()
    }

    /// Block until every task in `ids` is terminal or `timeout` elapses.
    ///
    /// Returns whether all tasks finished. Tasks no longer retained by the
    /// store count as finished, since only terminal tasks are evicted.
    pub fn wait_for(&self, ids: &[TaskId], timeout: Duration) -> bool {
        let events = self.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            if self.all_finished(ids) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            // Any event (or a timeout) triggers a re-check.
            if events.recv_timeout(remaining).is_err() && Instant::now() >= deadline {
                return self.all_finished(ids);
            }
        }
    }

    /// Wait for a batch to settle and return its final snapshot.
    pub fn wait_for_batch(&self, id: JobId, timeout: Duration) -> Result<BatchSnapshot> {
        let snapshot = self.get_batch(id).ok_or(Error::BatchNotFound(id))?;
        let ids: Vec<_> = snapshot.tasks.iter().map(|t| t.id).collect();
        if !self.wait_for(&ids, timeout) {
            return Err(Error::Timeout(timeout));
        }
        self.get_batch(id).ok_or(Error::BatchNotFound(id))
    }

    fn all_finished(&self, ids: &[TaskId]) -> bool {
        let store = self.shared.store();
        ids.iter()
            .all(|id| store.get(*id).map_or(true, |t| t.status.is_terminal()))
    }

    // Control

    /// Start the worker pool.
    pub fn start(&self) -> Result<()> {
        let mut pool = self.lock_pool();
        if let Some(running) = pool.as_ref() {
            return Err(Error::AlreadyRunning {
                workers: running.size(),
            });
        }
        *pool = Some(WorkerPool::spawn(Arc::clone(&self.shared), self.workers)?);
        Ok(())
    }

    /// Stop the worker pool and wait for every worker to exit.
    ///
    /// In-flight tasks finish; queued tasks stay queued and are picked up
    /// again by the next `start`. Calling `stop` on a stopped scheduler is
    /// a no-op.
    pub fn stop(&self) -> Result<()> {
        let Some(mut pool) = self.lock_pool().take() else {
            return Ok(());
        };
        let result = pool.shutdown(&self.shared.lanes);

        let queued = self.shared.lanes.len();
        if queued > 0 {
            lw_warn!("scheduler stopped with {} tasks still queued", queued);
        } else {
            lw_info!("scheduler stopped");
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.lock_pool().is_some()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn lock_pool(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            lw_warn!("error stopping scheduler on drop: {}", e);
        }
    }
}

fn validate_new(task: &Task) -> Result<()> {
    if task.status != TaskStatus::Pending {
        return Err(Error::Validation(format!(
            "task {} must be pending to be submitted (is {})",
            task.id.short(),
            task.status
        )));
    }
    if task.retry_count > task.max_retries {
        return Err(Error::Validation(format!(
            "task {} has retry_count {} above max_retries {}",
            task.id.short(),
            task.retry_count,
            task.max_retries
        )));
    }
    Ok(())
}

/// Construction-time configuration for a `Scheduler`.
pub struct SchedulerBuilder {
    config: Config,
    handlers: HandlerRegistry,
    gate: Arc<dyn SubmissionGate>,
    diagnostics: DiagnosticTable,
    strategies: Vec<(String, Arc<dyn RepairStrategy>)>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            handlers: HandlerRegistry::new(),
            gate: Arc::new(OpenGate),
            diagnostics: DiagnosticTable::default(),
            strategies: Vec::new(),
        }
    }

    /// Start from `config`, registering a `CommandHandler` for each
    /// configured `[handlers.<kind>]` entry.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new();
        builder.config = config.clone();
        for (kind, spec) in &config.handlers {
            let handler = CommandHandler::from_spec(spec);
            if !handler.is_available() {
                lw_warn!(
                    "handler program '{}' for kind '{}' not found on PATH",
                    spec.program,
                    kind
                );
            }
            builder.handlers.register(kind.as_str(), handler);
        }
        builder
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    pub fn history_capacity(mut self, tasks: usize, batches: usize) -> Self {
        self.config.history_capacity = tasks;
        self.config.batch_capacity = batches;
        self
    }

    pub fn handler(mut self, kind: impl Into<TaskKind>, handler: impl TaskHandler + 'static) -> Self {
        self.handlers.register(kind, handler);
        self
    }

    /// Replace the whole registry.
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn gate(mut self, gate: impl SubmissionGate + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn diagnostics(mut self, table: DiagnosticTable) -> Self {
        self.diagnostics = table;
        self
    }

    /// Register (or override) a repair strategy by name.
    pub fn repair_strategy(mut self, name: &str, strategy: impl RepairStrategy + 'static) -> Self {
        self.strategies.push((name.to_string(), Arc::new(strategy)));
        self
    }

    pub fn build(self) -> Result<Scheduler> {
        let config = self.config;
        config.validate()?;

        let mut repair = RepairExecutor::with_builtins(&config.repair, config.repair_log_capacity);
        for (name, strategy) in self.strategies {
            repair.register(&name, strategy);
        }

        let shared = Shared {
            lanes: PriorityLanes::new(config.poll_interval()),
            handlers: self.handlers,
            diagnostics: self.diagnostics,
            repair,
            metrics: Arc::new(Metrics::new(config.health)),
            store: Mutex::new(TaskStore::new(
                config.history_capacity,
                config.batch_capacity,
            )),
            events: EventBus::default(),
        };

        lw_debug!(
            "scheduler built: workers={}, max_retries={}, handlers={:?}",
            config.workers,
            config.max_retries,
            shared.handlers.kinds()
        );

        Ok(Scheduler {
            shared: Arc::new(shared),
            gate: self.gate,
            pool: Mutex::new(None),
            workers: config.workers,
            default_max_retries: config.max_retries,
        })
    }
}
