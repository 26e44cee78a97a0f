//! SQLite-backed [`JobQueueStore`], for local development and tests.
//!
//! No row-level locking in SQLite, so the claim uses a single connection
//! and a `WHERE id IN (SELECT ... LIMIT N)` subselect plus an immediate
//! `UPDATE` inside one transaction to stay atomic under concurrent callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::storage::{DeadLetterEntry, JobFilter, JobQueueStore, QueueMetrics};
use super::types::{Job, JobId};
use crate::errors::{Result, RuntimeError};
use crate::model::{JobStatus, JobType};

pub struct SqliteJobStorage {
    pool: SqlitePool,
}

impl SqliteJobStorage {
    pub async fn new(connection: &str) -> Result<Self> {
        let url = if connection == ":memory:" || connection.is_empty() {
            "sqlite::memory:".to_string()
        } else if connection.starts_with("sqlite:") {
            connection.to_string()
        } else {
            format!("sqlite:{connection}?mode=rwc")
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "PENDING",
        JobStatus::Processing => "PROCESSING",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Failed => "FAILED",
        JobStatus::Cancelled => "CANCELLED",
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "PROCESSING" => JobStatus::Processing,
        "COMPLETED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        "CANCELLED" => JobStatus::Cancelled,
        _ => JobStatus::Pending,
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let job_type_json: String = row.try_get("job_type")?;
    let job_type: JobType =
        serde_json::from_str(&job_type_json).map_err(|e| RuntimeError::StorageConflict(e.to_string()))?;
    let metadata_json: String = row.try_get("metadata")?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null);
    let status: String = row.try_get("status")?;

    Ok(Job {
        id: row.try_get::<String, _>("id")?.parse().map_err(|_| {
            RuntimeError::StorageConflict("invalid uuid in id column".into())
        })?,
        job_type,
        correlation_id: row.try_get("correlation_id")?,
        status: parse_status(&status),
        priority: row.try_get("priority")?,
        metadata,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        error_message: row.try_get("error_message")?,
        error_stack_trace: row.try_get("error_stack_trace")?,
        created_at: parse_dt(row.try_get("created_at")?)?,
        scheduled_for: parse_dt(row.try_get("scheduled_for")?)?,
        started_at: row.try_get::<Option<String>, _>("started_at")?.map(parse_dt).transpose()?,
        completed_at: row.try_get::<Option<String>, _>("completed_at")?.map(parse_dt).transpose()?,
        updated_at: parse_dt(row.try_get("updated_at")?)?,
        assigned_to: row.try_get("assigned_to")?,
        heartbeat_at: row.try_get::<Option<String>, _>("heartbeat_at")?.map(parse_dt).transpose()?,
        version: row.try_get("version")?,
    })
}

fn parse_dt(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RuntimeError::StorageConflict(format!("invalid timestamp {s}: {e}")))
}

#[async_trait]
impl JobQueueStore for SqliteJobStorage {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn setup(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_queue (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                correlation_id TEXT,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                error_message TEXT,
                error_stack_trace TEXT,
                created_at TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL,
                assigned_to TEXT,
                heartbeat_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_job_queue_status ON job_queue(status, priority DESC, created_at ASC);
            CREATE INDEX IF NOT EXISTS idx_job_queue_heartbeat ON job_queue(heartbeat_at);

            CREATE TABLE IF NOT EXISTS job_dead_letter_queue (
                id TEXT PRIMARY KEY,
                original_job_id TEXT NOT NULL,
                job_type TEXT NOT NULL,
                failed_at TEXT NOT NULL,
                failure_reason TEXT NOT NULL,
                job_data TEXT NOT NULL,
                retry_attempts INTEGER NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn enqueue(&self, job: Job) -> Result<JobId> {
        let job_type_json = serde_json::to_string(&job.job_type)?;
        let metadata_json = serde_json::to_string(&job.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO job_queue
                (id, job_type, correlation_id, status, priority, metadata, retry_count,
                 max_retries, created_at, scheduled_for, updated_at, version)
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job_type_json)
        .bind(&job.correlation_id)
        .bind(status_str(job.status))
        .bind(job.priority)
        .bind(metadata_json)
        .bind(job.retry_count as i64)
        .bind(job.max_retries as i64)
        .bind(job.created_at.to_rfc3339())
        .bind(job.scheduled_for.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(job.id)
    }

    async fn claim_batch(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>> {
        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'PROCESSING', assigned_to = ?, started_at = ?, updated_at = ?,
                heartbeat_at = ?, version = version + 1
            WHERE id IN (
                SELECT id FROM job_queue
                WHERE status = 'PENDING' AND scheduled_for <= ?
                ORDER BY priority DESC, created_at ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM job_queue WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE job_queue SET heartbeat_at = ?, updated_at = ? \
             WHERE id = ? AND assigned_to = ? AND status = 'PROCESSING'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.to_string())
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn complete(&self, job_id: JobId) -> Result<()> {
        let res = sqlx::query(
            "UPDATE job_queue SET status = 'COMPLETED', completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        if res.rows_affected() == 0 {
            return Err(RuntimeError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn fail(&self, job_id: JobId, error: &str, retry_delay: std::time::Duration) -> Result<()> {
        let job = self
            .get(job_id)
            .await?
            .ok_or(RuntimeError::JobNotFound(job_id))?;
        let new_retry_count = job.retry_count + 1;
        let now = Utc::now();

        if new_retry_count < job.max_retries {
            let next_attempt = now + chrono::Duration::from_std(retry_delay).unwrap_or_default();
            sqlx::query(
                "UPDATE job_queue SET status='PENDING', assigned_to=NULL, retry_count=?, \
                 scheduled_for=?, error_message=?, updated_at=? WHERE id=?",
            )
            .bind(new_retry_count as i64)
            .bind(next_attempt.to_rfc3339())
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        } else {
            sqlx::query(
                "UPDATE job_queue SET status='FAILED', assigned_to=NULL, retry_count=?, \
                 completed_at=?, error_message=?, updated_at=? WHERE id=?",
            )
            .bind(new_retry_count as i64)
            .bind(now.to_rfc3339())
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

            let job_type_json = serde_json::to_string(&job.job_type)?;
            sqlx::query(
                "INSERT INTO job_dead_letter_queue \
                 (id, original_job_id, job_type, failed_at, failure_reason, job_data, retry_attempts, resolved) \
                 VALUES (?,?,?,?,?,?,?,0)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(job_id.to_string())
            .bind(job.job_type.label())
            .bind(now.to_rfc3339())
            .bind(error)
            .bind(job_type_json)
            .bind(new_retry_count as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<()> {
        let res = sqlx::query(
            "UPDATE job_queue SET status='CANCELLED', updated_at=? \
             WHERE id=? AND status IN ('PENDING','PROCESSING')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        if res.rows_affected() == 0 {
            return Err(RuntimeError::StorageConflict(
                "job is not cancellable from its current state".into(),
            ));
        }
        Ok(())
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<Job>> {
        let mut sql = "SELECT * FROM job_queue WHERE 1=1".to_string();
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.correlation_id.is_some() {
            sql.push_str(" AND correlation_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        if let Some(s) = filter.status {
            query = query.bind(status_str(s));
        }
        if let Some(c) = &filter.correlation_id {
            query = query.bind(c);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_dead_letters(&self, filter: JobFilter) -> Result<Vec<DeadLetterEntry>> {
        let limit = filter.limit.unwrap_or(100);
        let rows = sqlx::query("SELECT * FROM job_dead_letter_queue ORDER BY failed_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(DeadLetterEntry {
                    id: row.try_get::<String, _>("id")?.parse().unwrap_or_default(),
                    original_job_id: row
                        .try_get::<String, _>("original_job_id")?
                        .parse()
                        .unwrap_or_default(),
                    job_type: row.try_get("job_type")?,
                    failed_at: parse_dt(row.try_get("failed_at")?)?,
                    failure_reason: row.try_get("failure_reason")?,
                    job_data: serde_json::from_str(&row.try_get::<String, _>("job_data")?)
                        .unwrap_or(serde_json::Value::Null),
                    retry_attempts: row.try_get::<i64, _>("retry_attempts")? as u32,
                    resolved: row.try_get::<i64, _>("resolved")? != 0,
                })
            })
            .collect()
    }

    async fn sweep_stale(&self, stale_threshold: std::time::Duration, retry_delay: std::time::Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_threshold).unwrap_or_default();
        let rows = sqlx::query(
            "SELECT id FROM job_queue WHERE status='PROCESSING' AND heartbeat_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        let mut count = 0;
        for row in rows {
            let id: String = row.try_get("id").map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
            let job_id: JobId = id.parse().unwrap_or_default();
            self.fail(job_id, "stale lease: worker heartbeat timed out", retry_delay).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn cleanup(&self, retention: std::time::Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let res = sqlx::query(
            "DELETE FROM job_queue WHERE status IN ('COMPLETED','FAILED','CANCELLED') AND updated_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(res.rows_affected() as usize)
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let mut metrics = QueueMetrics::default();
        let rows = sqlx::query("SELECT status, COUNT(*) as c FROM job_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        for row in rows {
            let status: String = row.try_get("status").unwrap_or_default();
            let count: i64 = row.try_get("c").unwrap_or(0);
            match status.as_str() {
                "PENDING" => metrics.pending = count,
                "PROCESSING" => metrics.processing = count,
                "COMPLETED" => metrics.completed = count,
                "FAILED" => metrics.failed = count,
                "CANCELLED" => metrics.cancelled = count,
                _ => {}
            }
        }
        let active: Option<i64> = sqlx::query(
            "SELECT COUNT(DISTINCT assigned_to) as c FROM job_queue WHERE status='PROCESSING'",
        )
        .fetch_one(&self.pool)
        .await
        .ok()
        .and_then(|r| r.try_get("c").ok());
        metrics.active_workers = active.unwrap_or(0);
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteJobStorage {
        let s = SqliteJobStorage::new(":memory:").await.unwrap();
        s.setup().await.unwrap();
        s
    }

    #[tokio::test]
    async fn enqueue_and_get_roundtrip() {
        let s = store().await;
        let job = Job::new(JobType::Cleanup, 0, 3);
        let id = s.enqueue(job.clone()).await.unwrap();
        let fetched = s.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.job_type, job.job_type);
    }

    #[tokio::test]
    async fn claim_batch_marks_processing_and_sets_assignee() {
        let s = store().await;
        s.enqueue(Job::new(JobType::Cleanup, 0, 3)).await.unwrap();
        s.enqueue(Job::new(JobType::Cleanup, 0, 3)).await.unwrap();

        let claimed = s.claim_batch("worker-1", 10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        for job in &claimed {
            assert_eq!(job.status, JobStatus::Processing);
            assert_eq!(job.assigned_to.as_deref(), Some("worker-1"));
        }
    }

    #[tokio::test]
    async fn claim_batch_never_double_assigns() {
        let s = store().await;
        for _ in 0..3 {
            s.enqueue(Job::new(JobType::Cleanup, 0, 3)).await.unwrap();
        }
        let first = s.claim_batch("w1", 2).await.unwrap();
        let second = s.claim_batch("w2", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn priority_ordering_is_respected() {
        let s = store().await;
        s.enqueue(Job::new(JobType::Cleanup, 0, 3)).await.unwrap();
        let high = Job::new(JobType::Cleanup, 10, 3);
        let high_id = high.id;
        s.enqueue(high).await.unwrap();

        let claimed = s.claim_batch("w1", 1).await.unwrap();
        assert_eq!(claimed[0].id, high_id);
    }

    #[tokio::test]
    async fn complete_marks_terminal() {
        let s = store().await;
        let job = Job::new(JobType::Cleanup, 0, 3);
        let id = s.enqueue(job).await.unwrap();
        s.claim_batch("w1", 10).await.unwrap();
        s.complete(id).await.unwrap();
        let fetched = s.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn fail_retries_then_dead_letters() {
        let s = store().await;
        let job = Job::new(JobType::Cleanup, 0, 2);
        let id = job.id;
        s.enqueue(job).await.unwrap();

        s.claim_batch("w1", 10).await.unwrap();
        s.fail(id, "boom", std::time::Duration::from_secs(0)).await.unwrap();
        let after_first = s.get(id).await.unwrap().unwrap();
        assert_eq!(after_first.status, JobStatus::Pending);
        assert_eq!(after_first.retry_count, 1);

        s.claim_batch("w1", 10).await.unwrap();
        s.fail(id, "boom again", std::time::Duration::from_secs(0)).await.unwrap();
        let after_second = s.get(id).await.unwrap().unwrap();
        assert_eq!(after_second.status, JobStatus::Failed);
        assert_eq!(after_second.retry_count, 2);

        let dead = s.list_dead_letters(JobFilter::new()).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].original_job_id, id);
    }

    #[tokio::test]
    async fn heartbeat_noop_if_not_processing() {
        let s = store().await;
        let job = Job::new(JobType::Cleanup, 0, 3);
        let id = job.id;
        s.enqueue(job).await.unwrap();
        s.heartbeat(id, "w1").await.unwrap();
        let fetched = s.get(id).await.unwrap().unwrap();
        assert!(fetched.heartbeat_at.is_none());
    }

    #[tokio::test]
    async fn cancel_from_pending_succeeds() {
        let s = store().await;
        let job = Job::new(JobType::Cleanup, 0, 3);
        let id = job.id;
        s.enqueue(job).await.unwrap();
        s.cancel(id).await.unwrap();
        let fetched = s.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn sweep_stale_recovers_dead_lease() {
        let s = store().await;
        let job = Job::new(JobType::Cleanup, 0, 3);
        let id = job.id;
        s.enqueue(job).await.unwrap();
        s.claim_batch("w1", 10).await.unwrap();

        // Force the heartbeat far into the past.
        sqlx::query("UPDATE job_queue SET heartbeat_at = ? WHERE id = ?")
            .bind((Utc::now() - chrono::Duration::hours(1)).to_rfc3339())
            .bind(id.to_string())
            .execute(&s.pool)
            .await
            .unwrap();

        let recovered = s
            .sweep_stale(std::time::Duration::from_secs(600), std::time::Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(recovered, 1);
        let fetched = s.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn metrics_counts_by_status() {
        let s = store().await;
        s.enqueue(Job::new(JobType::Cleanup, 0, 3)).await.unwrap();
        s.enqueue(Job::new(JobType::Cleanup, 0, 3)).await.unwrap();
        let m = s.metrics().await.unwrap();
        assert_eq!(m.pending, 2);
    }
}
