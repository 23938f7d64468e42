//! Worker pool.
//!
//! A fixed number of OS threads pull tasks from the priority lanes and run
//! them through the handler registered for their kind. Failures go through
//! the retry policy: the retry ceiling is checked first, then the failure
//! is diagnosed and, when repairable, repaired and re-enqueued at the tail
//! of its lane.
//!
//! Locks are never held while a handler or a repair strategy runs. A
//! dequeued task is owned by exactly one worker until it is re-enqueued or
//! reaches a terminal status.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;

use super::handler::{HandlerOutcome, HandlerRegistry};
use super::lanes::PriorityLanes;
use super::metrics::Metrics;
use super::scheduler::{EventBus, SchedulerEvent};
use super::store::TaskStore;
use crate::core::{FailureClass, Task};
use crate::repair::{DiagnosticTable, FailureContext, RepairExecutor};
use crate::{lw_info, lw_debug, lw_error, lw_warn, Error, Result};

/// State shared between the scheduler facade and its workers.
pub(crate) struct Shared {
    pub(crate) lanes: PriorityLanes,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) diagnostics: DiagnosticTable,
    pub(crate) repair: RepairExecutor,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) store: Mutex<TaskStore>,
    pub(crate) events: EventBus,
}

impl Shared {
    pub(crate) fn store(&self) -> MutexGuard<'_, TaskStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, task: &Task) {
        self.store().publish(task);
    }
}

/// Handle to a running set of worker threads.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` workers over `shared`.
    pub(crate) fn spawn(shared: Arc<Shared>, size: usize) -> Result<Self> {
        let cancel = CancellationToken::new();
        let mut pool = Self {
            workers: Vec::with_capacity(size),
            cancel: cancel.clone(),
        };

        for index in 0..size {
            let shared_clone = Arc::clone(&shared);
            let cancel_clone = cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("lanework-worker-{}", index))
                .spawn(move || worker_loop(index, shared_clone, cancel_clone));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    lw_error!("failed to spawn worker {}: {}", index, e);
                    // Already-spawned workers are joined before reporting.
                    let _ = pool.shutdown(&shared.lanes);
                    return Err(Error::Io(e));
                }
            }
        }

        lw_info!("worker pool started with {} workers", size);
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Cancel the workers, wake any that are waiting, and join them all.
    ///
    /// In-flight tasks finish first. Queued tasks stay queued.
    pub(crate) fn shutdown(&mut self, lanes: &PriorityLanes) -> Result<()> {
        self.cancel.cancel();
        lanes.close();

        let mut result = Ok(());
        for (index, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                lw_error!("worker {} panicked", index);
                result = Err(Error::WorkerPanicked { index });
            }
        }
        result
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>, cancel: CancellationToken) {
    lw_debug!("worker {} started", index);
    while let Some(task) = shared.lanes.dequeue(&cancel) {
        process(index, &shared, task);
    }
    lw_debug!("worker {} exiting", index);
}

/// Run one attempt of `task` and settle its outcome.
fn process(worker: usize, shared: &Shared, mut task: Task) {
    task.start();
    shared.publish(&task);
    shared.events.emit(SchedulerEvent::TaskStarted {
        task_id: task.id,
        worker,
        attempt: task.retry_count + 1,
    });
    lw_debug!(
        "worker {} started task {} ({}, attempt {})",
        worker,
        task.id.short(),
        task.kind,
        task.retry_count + 1
    );

    let Some(handler) = shared.handlers.get(&task.kind) else {
        let error = format!(
            "{}: no handler registered for kind '{}'",
            FailureClass::UnsupportedOperation,
            task.kind
        );
        fail(shared, task, &error, FailureClass::UnsupportedOperation);
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.execute(&task.params)))
        .unwrap_or_else(|payload| {
            HandlerOutcome::failure(format!("handler panicked: {}", panic_message(&*payload)))
        });

    if outcome.success {
        complete(shared, task, outcome.output);
    } else {
        retry_or_fail(shared, task, outcome);
    }
}

fn complete(shared: &Shared, mut task: Task, output: Option<String>) {
    task.complete(output);
    shared.metrics.record_completed(task.latency().unwrap_or_default());
    shared.publish(&task);
    lw_debug!("task {} completed", task.id.short());
    shared.events.emit(SchedulerEvent::TaskCompleted {
        task_id: task.id,
        output: task.output.clone(),
    });
}

fn fail(shared: &Shared, mut task: Task, error: &str, class: FailureClass) {
    task.fail(error, class);
    shared.metrics.record_failed();
    shared.publish(&task);
    lw_warn!(
        "task {} failed ({}) after {} retries: {}",
        task.id.short(),
        class,
        task.retry_count,
        error
    );
    shared.events.emit(SchedulerEvent::TaskFailed {
        task_id: task.id,
        class,
        error: error.to_string(),
    });
}

/// Retry policy for a failed attempt.
fn retry_or_fail(shared: &Shared, mut task: Task, outcome: HandlerOutcome) {
    let error = outcome.error_text();

    if !task.has_retry_budget() {
        fail(shared, task, &error, FailureClass::RetryBudgetExhausted);
        return;
    }
    task.retry_count += 1;

    let context = FailureContext::new(&task, &error, outcome.detail);
    let Some(mut diagnosis) = shared.diagnostics.diagnose(&error, context) else {
        fail(shared, task, &error, FailureClass::Unclassified);
        return;
    };
    lw_debug!(
        "task {} diagnosed as {} ({:?}), strategy {}",
        task.id.short(),
        diagnosis.kind,
        diagnosis.severity,
        diagnosis.strategy
    );
    if !diagnosis.auto_repairable {
        fail(shared, task, &error, FailureClass::NotRepairable);
        return;
    }

    if !shared.repair.attempt_repair(&mut diagnosis) {
        fail(shared, task, &error, FailureClass::RepairFailed);
        return;
    }

    task.params = diagnosis.context.params;
    task.mark_retrying(&error);
    shared.publish(&task);
    shared.events.emit(SchedulerEvent::TaskRetrying {
        task_id: task.id,
        retry_count: task.retry_count,
        strategy: diagnosis.strategy,
    });
    shared.lanes.enqueue(task);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
