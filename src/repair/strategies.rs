//! Built-in repair strategies.
//!
//! Each strategy is idempotent and touches a single class of resource.
//! A strategy returns `Ok(true)` when the precondition for a retry is now
//! satisfied, `Ok(false)` when it could not establish it, and `Err` for
//! unexpected I/O failures (treated as `false` by the executor).

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::diagnosis::FailureContext;
use crate::{lw_debug, Result};

/// A named remediation routine applied before a retry.
pub trait RepairStrategy: Send + Sync {
    fn repair(&self, context: &mut FailureContext) -> Result<bool>;
}

impl<F> RepairStrategy for F
where
    F: Fn(&mut FailureContext) -> Result<bool> + Send + Sync,
{
    fn repair(&self, context: &mut FailureContext) -> Result<bool> {
        self(context)
    }
}

/// Creates a missing file or directory named by `missing_path`.
///
/// `is_directory` selects directory creation; `default_content` seeds a
/// new file. Existing paths are left untouched.
pub struct CreateMissingFile;

impl RepairStrategy for CreateMissingFile {
    fn repair(&self, context: &mut FailureContext) -> Result<bool> {
        let Some(path) = context.get_str("missing_path").map(PathBuf::from) else {
            return Ok(false);
        };

        if context.get_bool("is_directory").unwrap_or(false) {
            fs::create_dir_all(&path)?;
            return Ok(true);
        }

        if path.exists() {
            return Ok(path.is_file());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = context.get_str("default_content").unwrap_or("").to_string();
        fs::write(&path, content)?;
        lw_debug!("create_missing_file: created {}", path.display());
        Ok(true)
    }
}

/// Makes the file named by `file_path` readable, writable and executable
/// by its owner.
pub struct FixPermissions;

impl RepairStrategy for FixPermissions {
    fn repair(&self, context: &mut FailureContext) -> Result<bool> {
        let Some(path) = context.get_str("file_path").map(PathBuf::from) else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        #[cfg(not(unix))]
        {
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_readonly(false);
            fs::set_permissions(&path, perms)?;
        }

        lw_debug!("fix_permissions: updated {}", path.display());
        Ok(true)
    }
}

/// Installs the module named by `missing_module` with an external installer.
pub struct InstallDependencies {
    command: Vec<String>,
}

impl InstallDependencies {
    /// `command` is the installer invocation; the module name is appended.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl RepairStrategy for InstallDependencies {
    fn repair(&self, context: &mut FailureContext) -> Result<bool> {
        let Some(module) = context.get_str("missing_module") else {
            return Ok(false);
        };
        let Some((program, args)) = self.command.split_first() else {
            return Ok(false);
        };

        lw_debug!("install_dependencies: {} {:?} {}", program, args, module);
        let status = Command::new(program)
            .args(args)
            .arg(module)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        Ok(status.success())
    }
}

/// Reclaims disk space by deleting regular files directly inside the
/// configured scratch directories.
pub struct CleanupDiskSpace {
    scratch_dirs: Vec<PathBuf>,
}

impl CleanupDiskSpace {
    pub fn new(scratch_dirs: Vec<PathBuf>) -> Self {
        Self { scratch_dirs }
    }
}

impl RepairStrategy for CleanupDiskSpace {
    fn repair(&self, _context: &mut FailureContext) -> Result<bool> {
        let mut removed = 0usize;
        for dir in &self.scratch_dirs {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                // Files that vanish or resist deletion are skipped.
                if path.is_file() && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        lw_debug!("cleanup_disk_space: removed {} files", removed);
        Ok(true)
    }
}

/// Relieves memory pressure by halving the task's `batch_size` param.
pub struct OptimizeMemoryUsage;

impl RepairStrategy for OptimizeMemoryUsage {
    fn repair(&self, context: &mut FailureContext) -> Result<bool> {
        if let Some(size) = context.params.get("batch_size").and_then(|v| v.as_u64()) {
            let reduced = (size / 2).max(1);
            context
                .params
                .insert("batch_size".to_string(), serde_json::json!(reduced));
            lw_debug!("optimize_memory_usage: batch_size {} -> {}", size, reduced);
        }
        Ok(true)
    }
}

/// Waits `base * 2^(n-1)` (capped at `max`) before the n-th retry.
pub struct RetryWithBackoff {
    base: Duration,
    max: Duration,
}

impl RetryWithBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before a retry, given the already incremented retry count.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        self.delay_for(retry_count.saturating_sub(1))
    }
}

impl RepairStrategy for RetryWithBackoff {
    fn repair(&self, context: &mut FailureContext) -> Result<bool> {
        if context.retry_count > context.max_retries {
            return Ok(false);
        }
        let delay = self.retry_delay(context.retry_count);
        lw_debug!(
            "retry_with_backoff: task {} sleeping {:?}",
            context.task_id.short(),
            delay
        );
        std::thread::sleep(delay);
        Ok(true)
    }
}
