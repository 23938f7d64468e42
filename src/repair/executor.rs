//! Repair executor and its audit trail.
//!
//! The executor owns the strategy registry and the bounded repair log.
//! Every strategy invocation appends exactly one `RepairRecord`, whether
//! the strategy succeeded, failed, errored or was never registered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use super::diagnosis::{ErrorDiagnosis, ErrorKind, FailureContext};
use super::strategies::{
    CleanupDiskSpace, CreateMissingFile, FixPermissions, InstallDependencies, OptimizeMemoryUsage,
    RepairStrategy, RetryWithBackoff,
};
use crate::config::{RepairConfig, DEFAULT_REPAIR_LOG_CAPACITY};
use crate::core::TaskId;
use crate::{lw_info, lw_debug, lw_warn};

/// One immutable entry of the repair audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    pub kind: ErrorKind,
    pub strategy: String,
    pub success: bool,
    /// Failure context as the strategy left it.
    pub context: FailureContext,
}

/// Append-only log that keeps the most recent `capacity` records.
#[derive(Debug)]
struct RepairLog {
    records: VecDeque<RepairRecord>,
    capacity: usize,
}

impl RepairLog {
    fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, record: RepairRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

/// Runs named repair strategies against diagnosed failures.
pub struct RepairExecutor {
    strategies: HashMap<String, Arc<dyn RepairStrategy>>,
    log: Mutex<RepairLog>,
}

impl Default for RepairExecutor {
    fn default() -> Self {
        Self::with_builtins(&RepairConfig::default(), DEFAULT_REPAIR_LOG_CAPACITY)
    }
}

impl RepairExecutor {
    /// An executor with no strategies registered.
    pub fn empty(log_capacity: usize) -> Self {
        Self {
            strategies: HashMap::new(),
            log: Mutex::new(RepairLog::new(log_capacity)),
        }
    }

    /// An executor with every built-in strategy registered.
    pub fn with_builtins(config: &RepairConfig, log_capacity: usize) -> Self {
        let mut executor = Self::empty(log_capacity);
        executor.register("create_missing_file", Arc::new(CreateMissingFile));
        executor.register("fix_permissions", Arc::new(FixPermissions));
        executor.register(
            "install_dependencies",
            Arc::new(InstallDependencies::new(config.dependency_installer.clone())),
        );
        executor.register(
            "cleanup_disk_space",
            Arc::new(CleanupDiskSpace::new(config.scratch_paths())),
        );
        executor.register("optimize_memory_usage", Arc::new(OptimizeMemoryUsage));
        executor.register(
            "retry_with_backoff",
            Arc::new(RetryWithBackoff::new(
                config.backoff_base(),
                config.backoff_max(),
            )),
        );
        executor
    }

    /// Register (or replace) the strategy for `name`.
    pub fn register(&mut self, name: &str, strategy: Arc<dyn RepairStrategy>) {
        self.strategies.insert(name.to_string(), strategy);
    }

    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Attempt the repair named by `diagnosis`.
    ///
    /// Returns `false` without touching the log when the diagnosis is not
    /// auto-repairable. Otherwise the strategy runs (no lock held) and one
    /// record is appended. The strategy may adjust `diagnosis.context`.
    pub fn attempt_repair(&self, diagnosis: &mut ErrorDiagnosis) -> bool {
        if !diagnosis.auto_repairable {
            lw_debug!(
                "repair skipped for task {}: {} is not auto-repairable",
                diagnosis.context.task_id.short(),
                diagnosis.kind
            );
            return false;
        }

        let success = match self.strategies.get(&diagnosis.strategy) {
            None => {
                lw_warn!("no repair strategy registered as '{}'", diagnosis.strategy);
                false
            }
            Some(strategy) => match strategy.repair(&mut diagnosis.context) {
                Ok(success) => success,
                Err(e) => {
                    lw_warn!("repair strategy '{}' errored: {}", diagnosis.strategy, e);
                    false
                }
            },
        };

        lw_info!(
            "repair {} for task {}: kind={} success={}",
            diagnosis.strategy,
            diagnosis.context.task_id.short(),
            diagnosis.kind,
            success
        );

        self.lock_log().push(RepairRecord {
            timestamp: Utc::now(),
            task_id: diagnosis.context.task_id,
            kind: diagnosis.kind,
            strategy: diagnosis.strategy.clone(),
            success,
            context: diagnosis.context.clone(),
        });

        success
    }

    /// All retained records, oldest first.
    pub fn history(&self) -> Vec<RepairRecord> {
        self.lock_log().records.iter().cloned().collect()
    }

    /// Retained records for one task, oldest first.
    pub fn records_for(&self, task_id: TaskId) -> Vec<RepairRecord> {
        self.lock_log()
            .records
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, RepairLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
