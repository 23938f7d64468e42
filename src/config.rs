use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::DEFAULT_MAX_RETRIES;
use crate::orchestration::{CommandSpec, HealthThresholds};
use crate::{lw_debug, Error, Result};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
pub const DEFAULT_BATCH_CAPACITY: usize = 100;
pub const DEFAULT_REPAIR_LOG_CAPACITY: usize = 500;
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;

/// Scheduler configuration, read from `~/.lanework/lanework.toml`.
///
/// Every field has a default, so a partial file (or no file at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker threads.
    pub workers: usize,
    /// Retry ceiling for tasks submitted without an explicit one.
    pub max_retries: u32,
    /// Upper bound on a single idle wait inside the lanes.
    pub poll_interval_ms: u64,
    /// Task snapshots retained for status queries.
    pub history_capacity: usize,
    /// Batch jobs retained for status queries.
    pub batch_capacity: usize,
    /// Repair records retained in the audit trail.
    pub repair_log_capacity: usize,
    /// Period of the background health monitor.
    pub monitor_interval_secs: u64,
    pub health: HealthThresholds,
    pub repair: RepairConfig,
    /// External command handlers, keyed by task kind tag.
    pub handlers: BTreeMap<String, CommandSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            repair_log_capacity: DEFAULT_REPAIR_LOG_CAPACITY,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
            health: HealthThresholds::default(),
            repair: RepairConfig::default(),
            handlers: BTreeMap::new(),
        }
    }
}

/// Settings for the built-in repair strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// First backoff delay for transient network failures.
    pub backoff_base_ms: u64,
    /// Cap on a single backoff delay.
    pub backoff_max_ms: u64,
    /// Directories whose loose files may be deleted to reclaim disk space.
    pub scratch_dirs: Vec<String>,
    /// Command used to install a missing dependency; the module name is appended.
    pub dependency_installer: Vec<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            scratch_dirs: Vec::new(),
            dependency_installer: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
            ],
        }
    }
}

impl RepairConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn scratch_paths(&self) -> Vec<PathBuf> {
        self.scratch_dirs.iter().map(|d| expand_tilde(d)).collect()
    }
}

impl Config {
    pub fn lanework_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".lanework"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::lanework_dir()?.join("lanework.toml"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        lw_debug!("Config::load path={}", path.display());
        if !path.exists() {
            lw_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        lw_debug!(
            "Config loaded: workers={}, max_retries={}, handlers={:?}",
            config.workers,
            config.max_retries,
            config.handlers.keys().collect::<Vec<_>>()
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        lw_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let dir = Self::lanework_dir()?;
        if !dir.exists() {
            lw_debug!("Creating lanework directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Validation("workers must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Validation(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.monitor_interval_secs == 0 {
            return Err(Error::Validation(
                "monitor_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.history_capacity == 0 || self.batch_capacity == 0 {
            return Err(Error::Validation(
                "history_capacity and batch_capacity must be greater than 0".to_string(),
            ));
        }
        self.health.validate()?;
        for (kind, spec) in &self.handlers {
            if spec.program.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "handler '{}' has an empty program",
                    kind
                )));
            }
            if spec.timeout_secs == Some(0) {
                return Err(Error::Validation(format!(
                    "handler '{}' timeout_secs must be greater than 0",
                    kind
                )));
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
