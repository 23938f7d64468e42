//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building schedulers with fast polling
//! - Scripted handlers (flaky, sleeping, recording)
//! - Collecting scheduler events

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;

use lanework::core::Params;
use lanework::orchestration::{HandlerOutcome, SchedulerBuilder};
use lanework::{Scheduler, SchedulerEvent};

/// Upper bound for any wait in the suite.
pub const WAIT: Duration = Duration::from_secs(10);

/// A builder with a short poll interval so idle workers react quickly.
pub fn builder(workers: usize) -> SchedulerBuilder {
    Scheduler::builder()
        .workers(workers)
        .poll_interval(Duration::from_millis(5))
}

/// Params with a single string entry.
pub fn params(key: &str, value: impl Into<serde_json::Value>) -> Params {
    let mut params = Params::new();
    params.insert(key.to_string(), value.into());
    params
}

/// Handler that fails with `error` for the first `failures` calls, then succeeds.
pub struct FlakyHandler {
    error: String,
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl FlakyHandler {
    pub fn new(error: &str, failures: usize) -> Self {
        Self {
            error: error.to_string(),
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, readable after the handler is moved into a scheduler.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl lanework::orchestration::TaskHandler for FlakyHandler {
    fn execute(&self, _params: &Params) -> HandlerOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            HandlerOutcome::failure(self.error.clone())
        } else {
            HandlerOutcome::success(Some(format!("attempt-{}", call + 1)))
        }
    }
}

/// Handler that sleeps, then records the `label` param in execution order.
pub struct RecordingHandler {
    delay: Duration,
    order: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            order: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn order(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.order)
    }
}

impl lanework::orchestration::TaskHandler for RecordingHandler {
    fn execute(&self, params: &Params) -> HandlerOutcome {
        let label = params
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        self.order.lock().unwrap().push(label);
        std::thread::sleep(self.delay);
        HandlerOutcome::success(None)
    }
}

/// Handler whose outcome is chosen by the `ok` param; failures use the
/// `error` param (default `xyzzy-unknown-error`).
pub fn outcome_from_params(params: &Params) -> HandlerOutcome {
    let ok = params.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
    if ok {
        HandlerOutcome::success(None)
    } else {
        let error = params
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("xyzzy-unknown-error");
        HandlerOutcome::failure(error)
    }
}

/// Drain every event currently buffered for `task`.
pub fn events_for(rx: &Receiver<SchedulerEvent>, task: lanework::core::TaskId) -> Vec<SchedulerEvent> {
    rx.try_iter()
        .filter(|e| e.task_id() == Some(task))
        .collect()
}
