//! Periodic health reporter.
//!
//! Runs as a tokio task: every interval it snapshots the metrics, logs the
//! result and forwards a `HealthReport` to whoever holds the receiver. The
//! task stops when its `MonitorHandle` is shut down or the receiver is
//! dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::metrics::{Health, Metrics, MetricsSnapshot};
use crate::config::DEFAULT_MONITOR_INTERVAL_SECS;
use crate::{lw_info, lw_debug, lw_warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
}

/// Handle to a running monitor, used for shutdown.
pub struct MonitorHandle {
    cancel: CancellationToken,
}

impl MonitorHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct HealthMonitor {
    metrics: Arc<Metrics>,
    report_tx: mpsc::UnboundedSender<HealthReport>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(metrics: Arc<Metrics>, report_tx: mpsc::UnboundedSender<HealthReport>) -> Self {
        Self {
            metrics,
            report_tx,
            interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
        }
    }

    /// Set the report period. Zero is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Take one report and log it.
    pub fn report(&self) -> HealthReport {
        let snapshot = self.metrics.snapshot();
        let line = format!(
            "health {}: completed={} failed={} error_rate={:.3} avg_latency={:?}",
            snapshot.health,
            snapshot.completed,
            snapshot.failed,
            snapshot.error_rate,
            snapshot.avg_latency
        );
        if snapshot.health == Health::Healthy {
            lw_info!("{}", line);
        } else {
            lw_warn!("{}", line);
        }
        HealthReport {
            timestamp: Utc::now(),
            metrics: snapshot,
        }
    }

    /// Spawn the monitor on the current tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn spawn(self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        lw_debug!("HealthMonitor::spawn interval={:?}", self.interval);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // The first tick fires immediately; reports start one period in.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        lw_debug!("HealthMonitor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if self.report_tx.send(self.report()).is_err() {
                            lw_debug!("HealthMonitor: report channel closed");
                            break;
                        }
                    }
                }
            }
        });

        MonitorHandle { cancel }
    }
}
