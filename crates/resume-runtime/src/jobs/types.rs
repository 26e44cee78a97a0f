//! Queue row type: the `job_queue` entity, its four job types, and its
//! `retryCount`/`version`/`heartbeatAt` lease-tracking fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{JobStatus, JobType};

pub type JobId = Uuid;

/// `job_queue` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub correlation_id: Option<String>,
    pub status: JobStatus,
    pub priority: i32,
    pub metadata: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub assigned_to: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Job {
    /// New pending job: `version=0`, `retryCount=0`.
    pub fn new(job_type: JobType, priority: i32, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            correlation_id: None,
            status: JobStatus::Pending,
            priority,
            metadata: serde_json::Value::Null,
            retry_count: 0,
            max_retries,
            error_message: None,
            error_stack_trace: None,
            created_at: now,
            scheduled_for: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            assigned_to: None,
            heartbeat_at: None,
            version: 0,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn scheduled_at(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = when;
        self
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries && self.status == JobStatus::Failed
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Cancelled)
            || (self.status == JobStatus::Failed && self.retry_count >= self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_pending_with_version_zero() {
        let job = Job::new(JobType::Cleanup, 0, 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.version, 0);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn terminal_requires_retries_exhausted() {
        let mut job = Job::new(JobType::Cleanup, 0, 3);
        job.status = JobStatus::Failed;
        job.retry_count = 2;
        assert!(!job.is_terminal());
        job.retry_count = 3;
        assert!(job.is_terminal());
    }
}
