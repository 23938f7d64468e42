//! Priority dispatch lanes.
//!
//! Four FIFO lanes, one per priority, behind a single mutex. Dequeue scans
//! Critical → High → Medium → Low and pops the front of the first
//! non-empty lane, so a lower lane is served only while every higher lane
//! is empty. Sustained Critical load starves Low; that is accepted.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{Priority, Task};
use crate::lw_trace;

const LANE_COUNT: usize = Priority::DISPATCH_ORDER.len();

type Lanes = [VecDeque<Task>; LANE_COUNT];

pub struct PriorityLanes {
    lanes: Mutex<Lanes>,
    available: Condvar,
    poll_interval: Duration,
}

impl PriorityLanes {
    /// `poll_interval` bounds each idle wait inside `dequeue`.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            lanes: Mutex::new(Default::default()),
            available: Condvar::new(),
            poll_interval,
        }
    }

    /// Append `task` to the tail of its priority's lane and wake one waiter.
    pub fn enqueue(&self, task: Task) {
        let index = task.priority.lane_index();
        lw_trace!("enqueue task {} into {} lane", task.id.short(), task.priority);
        self.lock()[index].push_back(task);
        self.available.notify_one();
    }

    /// Pop the next task without waiting.
    pub fn try_dequeue(&self) -> Option<Task> {
        pop_highest(&mut self.lock())
    }

    /// Pop the next task, blocking while all lanes are empty.
    ///
    /// Returns `None` once `cancel` fires. Cancellation is checked before
    /// every pop, so a cancelled pool never picks up new work.
    pub fn dequeue(&self, cancel: &CancellationToken) -> Option<Task> {
        let mut lanes = self.lock();
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(task) = pop_highest(&mut lanes) {
                return Some(task);
            }
            lanes = self
                .available
                .wait_timeout(lanes, self.poll_interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wake every waiting dequeuer so it re-checks its cancellation token.
    pub fn close(&self) {
        // Taking the lock orders this notify after any in-progress check.
        drop(self.lock());
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().iter().map(VecDeque::len).sum()
    }

    pub fn lane_len(&self, priority: Priority) -> usize {
        self.lock()[priority.lane_index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().iter().all(VecDeque::is_empty)
    }

    /// Remove and return every queued task in dispatch order.
    pub fn drain(&self) -> Vec<Task> {
        let mut lanes = self.lock();
        lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn pop_highest(lanes: &mut Lanes) -> Option<Task> {
    lanes.iter_mut().find_map(VecDeque::pop_front)
}
