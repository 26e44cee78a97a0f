//! Postgres-backed [`JobQueueStore`] — the production backend. The claim
//! query uses `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent workers
//! never observe the same pending row.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use super::storage::{DeadLetterEntry, JobFilter, JobQueueStore, QueueMetrics};
use super::types::{Job, JobId};
use crate::errors::{Result, RuntimeError};
use crate::model::{JobStatus, JobType};

pub struct PostgresJobStorage {
    pool: PgPool,
}

impl PostgresJobStorage {
    pub async fn new(connection: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection)
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

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
    let job_type_value: serde_json::Value = row.try_get("job_type")?;
    let job_type: JobType =
        serde_json::from_value(job_type_value).map_err(|e| RuntimeError::StorageConflict(e.to_string()))?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let status: String = row.try_get("status")?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type,
        correlation_id: row.try_get("correlation_id")?,
        status: parse_status(&status),
        priority: row.try_get("priority")?,
        metadata,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        max_retries: row.try_get::<i32, _>("max_retries")? as u32,
        error_message: row.try_get("error_message")?,
        error_stack_trace: row.try_get("error_stack_trace")?,
        created_at: row.try_get("created_at")?,
        scheduled_for: row.try_get("scheduled_for")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
        assigned_to: row.try_get("assigned_to")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl JobQueueStore for PostgresJobStorage {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn setup(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_queue (
                id UUID PRIMARY KEY,
                job_type JSONB NOT NULL,
                correlation_id TEXT,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                metadata JSONB NOT NULL DEFAULT '{}',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                error_message TEXT,
                error_stack_trace TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                scheduled_for TIMESTAMPTZ NOT NULL DEFAULT now(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                assigned_to TEXT,
                heartbeat_at TIMESTAMPTZ,
                version BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_job_queue_pending \
             ON job_queue (priority DESC, created_at ASC) WHERE status = 'PENDING'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_job_queue_heartbeat \
             ON job_queue (heartbeat_at) WHERE status = 'PROCESSING'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_dead_letter_queue (
                id UUID PRIMARY KEY,
                original_job_id UUID NOT NULL,
                job_type TEXT NOT NULL,
                failed_at TIMESTAMPTZ NOT NULL,
                failure_reason TEXT NOT NULL,
                job_data JSONB NOT NULL,
                retry_attempts INTEGER NOT NULL,
                resolved BOOLEAN NOT NULL DEFAULT false
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }

    async fn enqueue(&self, job: Job) -> Result<JobId> {
        let job_type_value = serde_json::to_value(&job.job_type)?;
        sqlx::query(
            r#"
            INSERT INTO job_queue
                (id, job_type, correlation_id, status, priority, metadata, retry_count,
                 max_retries, created_at, scheduled_for, updated_at, version)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(job.id)
        .bind(job_type_value)
        .bind(&job.correlation_id)
        .bind(status_str(job.status))
        .bind(job.priority)
        .bind(&job.metadata)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.created_at)
        .bind(job.scheduled_for)
        .bind(job.updated_at)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(job.id)
    }

    async fn claim_batch(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            WITH claimed AS (
                SELECT id FROM job_queue
                WHERE status = 'PENDING' AND scheduled_for <= $1
                ORDER BY priority DESC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE job_queue
            SET status = 'PROCESSING', assigned_to = $3, started_at = $1, updated_at = $1,
                heartbeat_at = $1, version = version + 1
            WHERE id IN (SELECT id FROM claimed)
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM job_queue WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE job_queue SET heartbeat_at = $1, updated_at = $1 \
             WHERE id = $2 AND assigned_to = $3 AND status = 'PROCESSING'",
        )
        .bind(Utc::now())
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn complete(&self, job_id: JobId) -> Result<()> {
        let res = sqlx::query(
            "UPDATE job_queue SET status = 'COMPLETED', completed_at = $1, updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(job_id)
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
                "UPDATE job_queue SET status='PENDING', assigned_to=NULL, retry_count=$1, \
                 scheduled_for=$2, error_message=$3, updated_at=$4 WHERE id=$5",
            )
            .bind(new_retry_count as i32)
            .bind(next_attempt)
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        } else {
            sqlx::query(
                "UPDATE job_queue SET status='FAILED', assigned_to=NULL, retry_count=$1, \
                 completed_at=$2, error_message=$3, updated_at=$4 WHERE id=$5",
            )
            .bind(new_retry_count as i32)
            .bind(now)
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

            let job_type_value = serde_json::to_value(&job.job_type)?;
            sqlx::query(
                "INSERT INTO job_dead_letter_queue \
                 (id, original_job_id, job_type, failed_at, failure_reason, job_data, retry_attempts, resolved) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,false)",
            )
            .bind(uuid::Uuid::new_v4())
            .bind(job_id)
            .bind(job.job_type.label())
            .bind(now)
            .bind(error)
            .bind(job_type_value)
            .bind(new_retry_count as i32)
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn cancel(&self, job_id: JobId) -> Result<()> {
        let res = sqlx::query(
            "UPDATE job_queue SET status='CANCELLED', updated_at=$1 \
             WHERE id=$2 AND status IN ('PENDING','PROCESSING')",
        )
        .bind(Utc::now())
        .bind(job_id)
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
        let mut idx = 1;
        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${idx}"));
            idx += 1;
        }
        if filter.correlation_id.is_some() {
            sql.push_str(&format!(" AND correlation_id = ${idx}"));
            idx += 1;
        }
        sql.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let _ = idx;

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
        let rows = sqlx::query("SELECT * FROM job_dead_letter_queue ORDER BY failed_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(DeadLetterEntry {
                    id: row.try_get("id")?,
                    original_job_id: row.try_get("original_job_id")?,
                    job_type: row.try_get("job_type")?,
                    failed_at: row.try_get("failed_at")?,
                    failure_reason: row.try_get("failure_reason")?,
                    job_data: row.try_get("job_data")?,
                    retry_attempts: row.try_get::<i32, _>("retry_attempts")? as u32,
                    resolved: row.try_get("resolved")?,
                })
            })
            .collect()
    }

    async fn sweep_stale(&self, stale_threshold: std::time::Duration, retry_delay: std::time::Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_threshold).unwrap_or_default();
        let rows = sqlx::query("SELECT id FROM job_queue WHERE status='PROCESSING' AND heartbeat_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        let mut count = 0;
        for row in rows {
            let job_id: JobId = row.try_get("id").map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
            self.fail(job_id, "stale lease: worker heartbeat timed out", retry_delay).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn cleanup(&self, retention: std::time::Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
        let res = sqlx::query(
            "DELETE FROM job_queue WHERE status IN ('COMPLETED','FAILED','CANCELLED') AND updated_at < $1",
        )
        .bind(cutoff)
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

