//! Process Tracker (C11): the single user-visible status aggregate over
//! one upload batch.
//!
//! Thin wrapper over [`PersistenceGateway`]'s tracker rows: one row,
//! advanced incrementally as each file's job progresses, polled by a
//! caller to learn when the whole batch is done.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{Result, RuntimeError};
use crate::model::{ProcessTracker, ProcessTrackerStatus};
use crate::persistence::{PersistenceGateway, TrackerUpdate};

/// Creates and reads [`ProcessTracker`] rows. Advancing an in-flight
/// tracker's counters is done directly against [`PersistenceGateway`] by
/// [`crate::pipeline::ResumeJobProcessor`] and the scheduler, since both
/// already hold a tracker id and a persistence handle; `TrackerStore` is
/// the entry/read side the ingest API actually calls.
pub struct TrackerStore {
    persistence: Arc<dyn PersistenceGateway>,
}

impl TrackerStore {
    pub fn new(persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self { persistence }
    }

    /// `UPLOAD(files[])`'s tracker-creation half: one row per batch,
    /// `status=INITIATED`, counters at zero. `job_id` is attached later
    /// (once known) via [`TrackerStore::attach_job`] when the queue path is
    /// taken — on the legacy in-process path it stays `None` for the
    /// tracker's lifetime.
    pub async fn create(
        &self,
        total_files: i32,
        uploaded_filename: Option<String>,
        correlation_id: Option<String>,
    ) -> Result<ProcessTracker> {
        let now = Utc::now();
        let tracker = ProcessTracker {
            id: Uuid::new_v4(),
            status: ProcessTrackerStatus::Initiated,
            total_files,
            processed_files: 0,
            failed_files: 0,
            message: None,
            uploaded_filename,
            correlation_id,
            job_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let id = self.persistence.create_tracker(tracker.clone()).await?;
        Ok(ProcessTracker { id, ..tracker })
    }

    /// `GET_TRACKER(trackerId) → ProcessTracker`.
    pub async fn get(&self, id: Uuid) -> Result<ProcessTracker> {
        self.persistence
            .get_tracker(id)
            .await?
            .ok_or(RuntimeError::JobNotFound(id))
    }

    /// Links a tracker to the queue row created for it (queue path only).
    pub async fn attach_job(&self, tracker_id: Uuid, job_id: Uuid) -> Result<()> {
        let patch = TrackerUpdate {
            job_id: Some(job_id),
            ..Default::default()
        };
        self.persistence.update_tracker(tracker_id, patch).await
    }

    /// Marks the whole batch `FAILED` outright — used when ingest can't
    /// even enqueue a single job (e.g. `queue.maxPending` backpressure), so
    /// the tracker doesn't dangle at `INITIATED` forever.
    pub async fn fail_immediately(&self, tracker_id: Uuid, message: impl Into<String>) -> Result<()> {
        let patch = TrackerUpdate {
            status: Some(ProcessTrackerStatus::Failed),
            message: Some(message.into()),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        self.persistence.update_tracker(tracker_id, patch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::create_persistence;
    use std::time::Duration;

    async fn test_gateway() -> Arc<dyn crate::persistence::PersistenceGateway> {
        let cfg = crate::config::RuntimeConfig {
            database_url: "sqlite::memory:".into(),
            llm: crate::config::LlmConfig {
                base_url: "http://localhost".into(),
                chat_model: "m".into(),
                embedding_model: "e".into(),
                max_tokens: 4000,
                temperature: 0.7,
                chat_timeout: Duration::from_secs(1),
                embed_timeout: Duration::from_secs(1),
                api_key: None,
            },
            ..Default::default()
        };
        create_persistence(&cfg).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = TrackerStore::new(test_gateway().await);
        let created = store
            .create(3, Some("batch.zip".into()), Some("corr-1".into()))
            .await
            .unwrap();
        assert_eq!(created.status, ProcessTrackerStatus::Initiated);
        assert_eq!(created.total_files, 3);

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.processed_files, 0);
        assert!(!fetched.is_terminal());
    }

    #[tokio::test]
    async fn get_missing_tracker_is_job_not_found() {
        let store = TrackerStore::new(test_gateway().await);
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn attach_job_then_fail_immediately() {
        let store = TrackerStore::new(test_gateway().await);
        let created = store.create(1, None, None).await.unwrap();
        let job_id = Uuid::new_v4();
        store.attach_job(created.id, job_id).await.unwrap();
        store.fail_immediately(created.id, "queue saturated").await.unwrap();

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.status, ProcessTrackerStatus::Failed);
        assert_eq!(fetched.job_id, Some(job_id));
        assert_eq!(fetched.message.as_deref(), Some("queue saturated"));
    }

    /// Guards against the read-modify-write race this counter used to have:
    /// every one of N concurrent files in a batch increments
    /// `processed_files` through `increment_tracker_progress`, and none of
    /// the increments should be lost to another concurrent caller's write.
    #[tokio::test]
    async fn concurrent_progress_increments_are_not_lost() {
        let persistence = test_gateway().await;
        let store = TrackerStore::new(persistence.clone());
        let created = store.create(20, None, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let persistence = persistence.clone();
            let id = created.id;
            handles.push(tokio::spawn(async move {
                persistence.increment_tracker_progress(id, true).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.processed_files, 20);
        assert!(fetched.is_terminal());
    }
}
