//! Orchestration layer for lanework.
//!
//! This module provides the dispatch machinery: the priority lanes, the
//! worker pool and its retry loop, the handler registry and submission
//! gate, task retention, metrics, and the health monitor. `Scheduler`
//! ties them together.

mod gate;
mod handler;
mod lanes;
mod metrics;
mod monitor;
mod pool;
mod scheduler;
mod store;

pub use gate::{GateVerdict, OpenGate, SubmissionGate};
pub use handler::{CommandHandler, CommandSpec, HandlerOutcome, HandlerRegistry, TaskHandler};
pub use lanes::PriorityLanes;
pub use metrics::{Health, HealthThresholds, Metrics, MetricsSnapshot};
pub use monitor::{HealthMonitor, HealthReport, MonitorHandle};
pub use pool::WorkerPool;
pub use scheduler::{EventBus, Scheduler, SchedulerBuilder, SchedulerEvent};
pub use store::TaskStore;
