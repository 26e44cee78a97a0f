//! Storage abstraction over the queue, dead-letter, and metrics tables.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Job, JobId};
use crate::config::RuntimeConfig;
use crate::errors::Result;
use crate::model::JobStatus;

/// Which backend a [`JobQueueStore`] is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Postgres,
}

/// Filter for listing queue rows.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub correlation_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A row in `job_dead_letter_queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub original_job_id: JobId,
    pub job_type: String,
    pub failed_at: DateTime<Utc>,
    pub failure_reason: String,
    pub job_data: serde_json::Value,
    pub retry_attempts: u32,
    pub resolved: bool,
}

/// Queue metrics snapshot, refreshed by the scheduler's metrics roll-up
/// loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub avg_processing_ms: Option<f64>,
    pub active_workers: i64,
}

/// Core queue persistence interface. Implementations must be thread-safe.
#[async_trait]
pub trait JobQueueStore: Send + Sync + 'static {
    fn backend_name(&self) -> &'static str;

    async fn setup(&self) -> Result<()>;

    /// Inserts a new pending row and returns its id in one round-trip.
    async fn enqueue(&self, job: Job) -> Result<JobId>;

    /// Atomically claims up to `limit` rows for `worker_id`.
    async fn claim_batch(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Refreshes the lease timestamp; no effect if status ≠ PROCESSING.
    async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<()>;

    async fn complete(&self, job_id: JobId) -> Result<()>;

    /// Dispatches on `job.can_retry()` after incrementing `retry_count`:
    /// retryable failures re-enter PENDING at a delayed `scheduled_for`;
    /// terminal failures move to FAILED and append a dead-letter row.
    async fn fail(&self, job_id: JobId, error: &str, retry_delay: std::time::Duration) -> Result<()>;

    /// Best-effort cooperative cancellation from PENDING or PROCESSING.
    async fn cancel(&self, job_id: JobId) -> Result<()>;

    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>>;

    async fn list_dead_letters(&self, filter: JobFilter) -> Result<Vec<DeadLetterEntry>>;

    /// Recovers jobs whose lease died: PROCESSING with a stale heartbeat.
    async fn sweep_stale(&self, stale_threshold: std::time::Duration, retry_delay: std::time::Duration) -> Result<usize>;

    /// Deletes terminal rows past the retention window.
    async fn cleanup(&self, retention: std::time::Duration) -> Result<usize>;

    async fn metrics(&self) -> Result<QueueMetrics>;
}

/// Factory that picks a backend from the configured database URL.
pub async fn create_storage(cfg: &RuntimeConfig) -> Result<Arc<dyn JobQueueStore>> {
    if cfg.database_url.starts_with("postgres") {
        let store = super::postgres::PostgresJobStorage::new(&cfg.database_url).await?;
        store.setup().await?;
        Ok(Arc::new(store))
    } else {
        let store = super::sqlite::SqliteJobStorage::new(&cfg.database_url).await?;
        store.setup().await?;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_filter_builder() {
        let f = JobFilter::new().with_status(JobStatus::Pending).with_limit(10);
        assert_eq!(f.status, Some(JobStatus::Pending));
        assert_eq!(f.limit, Some(10));
    }
}
