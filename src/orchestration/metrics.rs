//! Running outcome counters and health classification.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{Error, Result};

/// Health classification derived from the error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Warning => write!(f, "warning"),
            Health::Critical => write!(f, "critical"),
        }
    }
}

/// Error-rate boundaries between health classes.
///
/// A rate below `warning` is healthy, below `critical` is a warning, and
/// anything at or above `critical` is critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            warning: 0.05,
            critical: 0.15,
        }
    }
}

impl HealthThresholds {
    pub fn classify(&self, error_rate: f64) -> Health {
        if error_rate < self.warning {
            Health::Healthy
        } else if error_rate < self.critical {
            Health::Warning
        } else {
            Health::Critical
        }
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.warning) || !in_range(self.critical) || self.warning > self.critical {
            return Err(Error::Validation(format!(
                "health thresholds must satisfy 0 <= warning ({}) <= critical ({}) <= 1",
                self.warning, self.critical
            )));
        }
        Ok(())
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub failed: u64,
    /// Mean latency of completed tasks.
    pub avg_latency: Duration,
    pub error_rate: f64,
    pub health: Health,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    mean_latency_secs: f64,
}

impl Counters {
    fn error_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }
}

/// Terminal-outcome aggregator shared by all workers.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
    thresholds: HealthThresholds,
}

impl Metrics {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            thresholds,
        }
    }

    /// Record a completed task and fold its latency into the running mean.
    pub fn record_completed(&self, latency: Duration) {
        let mut c = self.lock();
        c.completed += 1;
        let n = c.completed as f64;
        c.mean_latency_secs += (latency.as_secs_f64() - c.mean_latency_secs) / n;
    }

    pub fn record_failed(&self) {
        self.lock().failed += 1;
    }

    pub fn error_rate(&self) -> f64 {
        self.lock().error_rate()
    }

    pub fn assess_health(&self) -> Health {
        self.thresholds.classify(self.error_rate())
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.lock();
        let error_rate = c.error_rate();
        MetricsSnapshot {
            completed: c.completed,
            failed: c.failed,
            avg_latency: Duration::from_secs_f64(c.mean_latency_secs.max(0.0)),
            error_rate,
            health: self.thresholds.classify(error_rate),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
