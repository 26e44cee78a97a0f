//! Scheduler (C6): four independent periodic loops layered on top of a
//! [`WorkerPool`] — job pickup (the pool's own loop), stale-lease sweep,
//! cron-driven retention cleanup, and a queue metrics roll-up.
//!
//! Small supervisor that owns the pool plus three more `tokio::spawn`'d
//! housekeeping loops.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cron::Schedule;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::storage::{JobQueueStore, QueueMetrics};
use super::worker::WorkerPool;
use crate::config::SchedulerConfig;
use crate::errors::Result;

/// Stale-lease sweep cadence — fixed, not one of the configurable
/// `scheduler.*` keys.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Metrics roll-up cadence — likewise fixed.
const METRICS_ROLLUP_INTERVAL: Duration = Duration::from_secs(300);

/// Owns the worker pool and the three housekeeping loops; dropping the
/// handle does not stop the loops — call [`SchedulerHandle::shutdown`].
pub struct SchedulerHandle {
    pool: WorkerPool,
    shutdown_tx: broadcast::Sender<()>,
    loops: Vec<JoinHandle<()>>,
    metrics: Arc<RwLock<QueueMetrics>>,
}

impl SchedulerHandle {
    /// Latest cached snapshot from the metrics roll-up loop.
    pub async fn metrics(&self) -> QueueMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.pool.shutdown(timeout).await.map_err(|e| {
            crate::errors::RuntimeError::Config(format!("worker pool shutdown failed: {e}"))
        })?;
        for h in self.loops {
            h.abort();
        }
        Ok(())
    }
}

/// Builds and spawns the scheduler's loops. Not itself long-lived: consumed
/// by [`Scheduler::spawn`].
pub struct Scheduler {
    store: Arc<dyn JobQueueStore>,
    config: SchedulerConfig,
    retry_delay: Duration,
}

impl Scheduler {
    /// `retry_delay` comes from [`crate::config::QueueConfig`] — the
    /// scheduler doesn't own queue retry policy, only lease/cleanup timing.
    pub fn new(store: Arc<dyn JobQueueStore>, config: SchedulerConfig, retry_delay: Duration) -> Self {
        Self { store, config, retry_delay }
    }

    /// Starts the pickup loop (via `pool.start()`) plus the three
    /// housekeeping loops, returning a handle that owns all of them.
    pub async fn spawn(self, pool: WorkerPool) -> Result<SchedulerHandle> {
        pool.start().await.map_err(|e| {
            crate::errors::RuntimeError::Config(format!("worker pool failed to start: {e}"))
        })?;

        let (shutdown_tx, _) = broadcast::channel(4);
        let metrics = Arc::new(RwLock::new(QueueMetrics::default()));

        let mut loops = Vec::with_capacity(3);

        loops.push(tokio::spawn(stale_sweep_loop(
            self.store.clone(),
            STALE_SWEEP_INTERVAL,
            self.config.stale_threshold,
            self.retry_delay,
            shutdown_tx.subscribe(),
        )));

        loops.push(tokio::spawn(cleanup_loop(
            self.store.clone(),
            self.config.cleanup_cron.clone(),
            self.config.retention_days,
            shutdown_tx.subscribe(),
        )));

        loops.push(tokio::spawn(metrics_rollup_loop(
            self.store.clone(),
            METRICS_ROLLUP_INTERVAL,
            metrics.clone(),
            shutdown_tx.subscribe(),
        )));

        Ok(SchedulerHandle {
            pool,
            shutdown_tx,
            loops,
            metrics,
        })
    }
}

async fn stale_sweep_loop(
    store: Arc<dyn JobQueueStore>,
    interval: Duration,
    stale_threshold: Duration,
    retry_delay: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("stale sweep loop started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {
                match store.sweep_stale(stale_threshold, retry_delay).await {
                    Ok(n) if n > 0 => info!(recovered = n, "swept stale jobs back to pending"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "stale sweep failed"),
                }
            }
        }
    }
    debug!("stale sweep loop stopped");
}

async fn cleanup_loop(
    store: Arc<dyn JobQueueStore>,
    cron_expr: String,
    retention_days: u32,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let schedule = match Schedule::from_str(&cron_expr) {
        Ok(s) => s,
        Err(e) => {
            error!(cron = %cron_expr, error = %e, "invalid cleanup cron expression, cleanup loop disabled");
            return;
        }
    };

    debug!(cron = %cron_expr, "cleanup loop started");
    let retention = Duration::from_secs(u64::from(retention_days) * 24 * 3600);

    loop {
        // Spec says "02:00 local" — schedule against the local timezone,
        // not UTC, so the cron expression fires at the operator's wall clock.
        let next = match schedule.upcoming(chrono::Local).next() {
            Some(t) => t,
            None => {
                warn!("cron schedule produced no further occurrences");
                return;
            }
        };
        let now = chrono::Local::now();
        let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                match store.cleanup(retention).await {
                    Ok(n) => info!(deleted = n, "retention cleanup ran"),
                    Err(e) => error!(error = %e, "retention cleanup failed"),
                }
            }
        }
    }
    debug!("cleanup loop stopped");
}

async fn metrics_rollup_loop(
    store: Arc<dyn JobQueueStore>,
    interval: Duration,
    metrics: Arc<RwLock<QueueMetrics>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!("metrics roll-up loop started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(interval) => {
                match store.metrics().await {
                    Ok(m) => {
                        *metrics.write().await = m;
                    }
                    Err(e) => error!(error = %e, "metrics roll-up failed"),
                }
            }
        }
    }
    debug!("metrics roll-up loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_expression_parses() {
        // default cleanup cron: daily at 03:00
        let expr = "0 0 3 * * *";
        assert!(Schedule::from_str(expr).is_ok());
    }

    #[test]
    fn invalid_cron_expression_rejected() {
        assert!(Schedule::from_str("not a cron expr").is_err());
    }
}
