//! Failure diagnosis.
//!
//! Maps the raw error text reported by a failed task to an error kind and
//! the name of the repair strategy that addresses it. Rules are plain data
//! (`DEFAULT_RULES`) so the table can be inspected and tested on its own.
//!
//! ## Matching
//!
//! Rules are checked in order and, within a rule, patterns in order. A
//! pattern matches when it occurs anywhere in the error text, ignoring
//! case. The first match wins; text that matches nothing has no diagnosis.
//!
//! ```
//! use lanework::repair::{DiagnosticTable, ErrorKind};
//!
//! let table = DiagnosticTable::default();
//! let rule = table.classify("open: Permission denied (os error 13)").unwrap();
//! assert_eq!(rule.kind, ErrorKind::PermissionDenied);
//! assert_eq!(rule.strategy, "fix_permissions");
//! assert!(table.classify("xyzzy-unknown-error").is_none());
//! ```

use serde::{Deserialize, Serialize};

use crate::core::{Params, Task, TaskId, TaskKind};

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MissingResource,
    PermissionDenied,
    MissingDependency,
    ResourceExhausted,
    MemoryPressure,
    TransientNetwork,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingResource => "missing-resource",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::MissingDependency => "missing-dependency",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::MemoryPressure => "memory-pressure",
            ErrorKind::TransientNetwork => "transient-network",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One row of the diagnostic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticRule {
    pub kind: ErrorKind,
    pub patterns: &'static [&'static str],
    pub severity: Severity,
    pub auto_repairable: bool,
    pub strategy: &'static str,
}

impl DiagnosticRule {
    /// Whether any of this rule's patterns occurs in `lowered` (already lowercase).
    fn matches(&self, lowered: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| lowered.contains(&p.to_lowercase()))
    }
}

pub const DEFAULT_RULES: &[DiagnosticRule] = &[
    DiagnosticRule {
        kind: ErrorKind::MissingResource,
        patterns: &["FileNotFoundError", "No such file or directory"],
        severity: Severity::Medium,
        auto_repairable: true,
        strategy: "create_missing_file",
    },
    DiagnosticRule {
        kind: ErrorKind::PermissionDenied,
        patterns: &["PermissionError", "Permission denied"],
        severity: Severity::High,
        auto_repairable: true,
        strategy: "fix_permissions",
    },
    DiagnosticRule {
        kind: ErrorKind::MissingDependency,
        patterns: &["ModuleNotFoundError", "ImportError"],
        severity: Severity::High,
        auto_repairable: true,
        strategy: "install_dependencies",
    },
    DiagnosticRule {
        kind: ErrorKind::ResourceExhausted,
        patterns: &["No space left on device", "Disk full"],
        severity: Severity::Critical,
        auto_repairable: true,
        strategy: "cleanup_disk_space",
    },
    DiagnosticRule {
        kind: ErrorKind::MemoryPressure,
        patterns: &["MemoryError", "Out of memory"],
        severity: Severity::Critical,
        auto_repairable: true,
        strategy: "optimize_memory_usage",
    },
    DiagnosticRule {
        kind: ErrorKind::TransientNetwork,
        patterns: &["TimeoutError", "Connection timeout"],
        severity: Severity::Medium,
        auto_repairable: true,
        strategy: "retry_with_backoff",
    },
];

/// Everything a repair strategy may look at (and adjust) for one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub task_id: TaskId,
    pub task_kind: TaskKind,
    pub retry_count: u32,
    pub max_retries: u32,
    /// The failure text being diagnosed.
    pub error: String,
    /// Copy of the task's params. Strategies may adjust it; the owning
    /// worker adopts the adjusted params when the repair succeeds.
    pub params: Params,
    /// Ad hoc key/value detail attached by the failing handler.
    pub detail: Params,
}

impl FailureContext {
    pub fn new(task: &Task, error: &str, detail: Params) -> Self {
        Self {
            task_id: task.id,
            task_kind: task.kind.clone(),
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            error: error.to_string(),
            params: task.params.clone(),
            detail,
        }
    }

    /// Look up a string value, preferring handler detail over task params.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.detail
            .get(key)
            .or_else(|| self.params.get(key))
            .and_then(|v| v.as_str())
    }

    /// Look up a boolean value, preferring handler detail over task params.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.detail
            .get(key)
            .or_else(|| self.params.get(key))
            .and_then(|v| v.as_bool())
    }
}

/// The result of classifying one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDiagnosis {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub auto_repairable: bool,
    pub strategy: String,
    pub context: FailureContext,
}

/// Ordered set of diagnostic rules.
#[derive(Debug, Clone)]
pub struct DiagnosticTable {
    rules: Vec<DiagnosticRule>,
}

impl Default for DiagnosticTable {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.to_vec())
    }
}

impl DiagnosticTable {
    pub fn new(rules: Vec<DiagnosticRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[DiagnosticRule] {
        &self.rules
    }

    /// Find the first rule matching `error_text`.
    pub fn classify(&self, error_text: &str) -> Option<&DiagnosticRule> {
        let lowered = error_text.to_lowercase();
        self.rules.iter().find(|rule| rule.matches(&lowered))
    }

    /// Classify `error_text` and bundle the result with its failure context.
    ///
    /// Returns `None` when no rule matches; callers treat that as terminal.
    pub fn diagnose(&self, error_text: &str, context: FailureContext) -> Option<ErrorDiagnosis> {
        let rule = self.classify(error_text)?;
        Some(ErrorDiagnosis {
            kind: rule.kind,
            severity: rule.severity,
            auto_repairable: rule.auto_repairable,
            strategy: rule.strategy.to_string(),
            context,
        })
    }
}
