pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod repair;

pub use error::{Error, Result};
pub use orchestration::{Scheduler, SchedulerBuilder, SchedulerEvent};
