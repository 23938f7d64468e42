//! Failure diagnosis and self-repair.
//!
//! A failed attempt is classified by the `DiagnosticTable`; when the
//! diagnosis is auto-repairable the `RepairExecutor` runs the named
//! strategy and records the outcome.

pub mod diagnosis;
pub mod executor;
pub mod strategies;

pub use diagnosis::{
    DiagnosticRule, DiagnosticTable, ErrorDiagnosis, ErrorKind, FailureContext, Severity,
    DEFAULT_RULES,
};
pub use executor::{RepairExecutor, RepairRecord};
pub use strategies::{
    CleanupDiskSpace, CreateMissingFile, FixPermissions, InstallDependencies, OptimizeMemoryUsage,
    RepairStrategy, RetryWithBackoff,
};
