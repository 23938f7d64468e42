use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Task not found: {0}")]
    TaskNotFound(crate::core::TaskId),

    #[error("Batch job not found: {0}")]
    BatchNotFound(crate::core::JobId),

    #[error("Worker pool is already running ({workers} workers)")]
    AlreadyRunning { workers: usize },

    #[error("Worker {index} panicked")]
    WorkerPanicked { index: usize },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
