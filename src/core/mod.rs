//! Core domain models for lanework.
//!
//! This module contains the fundamental data structures shared by the
//! dispatch lanes, the worker pool and the repair loop: tasks and the
//! batch jobs that group them.

pub mod batch;
pub mod task;

pub use batch::{derive_status, BatchFile, BatchJob, BatchSnapshot, JobId, TaskSpec};
pub use task::{
    FailureClass, Params, Priority, Task, TaskId, TaskKind, TaskStatus, DEFAULT_MAX_RETRIES,
};
