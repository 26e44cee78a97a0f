//! Feature-flag Router (C12): `scheduler.enabled` gates an upload between
//! durable queue rows and a detached in-process task with no durability.
//! One config flag, one function deciding between two implementations per
//! upload, kept deliberately minimal until the legacy path is retired.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{RuntimeConfig, UploadConfig};
use crate::errors::{Result, RuntimeError};
use crate::jobs::{Job, JobQueueStore};
use crate::model::{JobType, ProcessTracker};
use crate::pipeline::{ResumeJobProcessor, TRACKER_ID_METADATA_KEY};
use crate::tracker::TrackerStore;

/// One file of a multipart `UPLOAD(files[])` request, pre-transport-decoding.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Default priority for a freshly-enqueued `RESUME_PROCESSING` job. Uploads
/// don't carry an explicit priority, so every job starts level; an operator
/// wanting priority ingestion enqueues directly against [`JobQueueStore`].
const DEFAULT_UPLOAD_PRIORITY: i32 = 0;

/// Routes an `UPLOAD` request to either the durable queue path or the
/// legacy in-process path, per the single `scheduler.enabled` flag
/// (evaluated fresh on every call).
pub struct UploadRouter {
    queue: Arc<dyn JobQueueStore>,
    tracker: Arc<TrackerStore>,
    processor: Arc<ResumeJobProcessor>,
    upload_cfg: UploadConfig,
    scheduler_enabled: bool,
    max_pending: u64,
    max_retries: u32,
}

impl UploadRouter {
    pub fn new(
        queue: Arc<dyn JobQueueStore>,
        tracker: Arc<TrackerStore>,
        processor: Arc<ResumeJobProcessor>,
        cfg: &RuntimeConfig,
    ) -> Self {
        Self {
            queue,
            tracker,
            processor,
            upload_cfg: cfg.upload.clone(),
            scheduler_enabled: cfg.scheduler.enabled,
            max_pending: cfg.scheduler.max_pending,
            max_retries: cfg.queue.max_retries,
        }
    }

    /// `UPLOAD(files[]) → {trackerId}`. Files failing the quick
    /// validation gate (empty, oversized, disallowed extension) are
    /// dropped before the tracker is sized, so `totalFiles` only ever
    /// counts files actually handed to a processor.
    pub async fn upload(
        &self,
        files: Vec<UploadFile>,
        correlation_id: Option<String>,
    ) -> Result<Uuid> {
        if files.is_empty() {
            return Err(RuntimeError::ParseError("upload contained no files".into()));
        }

        let mut accepted = Vec::with_capacity(files.len());
        for file in files {
            match self.validate(&file) {
                Ok(()) => accepted.push(file),
                Err(e) => warn!(filename = %file.filename, error = %e, "rejecting file at ingest"),
            }
        }

        if accepted.is_empty() {
            return Err(RuntimeError::UnsupportedExtension(
                "no uploaded file passed ingest validation".into(),
            ));
        }

        let first_filename = accepted[0].filename.clone();
        let tracker = self
            .tracker
            .create(accepted.len() as i32, Some(first_filename), correlation_id.clone())
            .await?;

        if self.scheduler_enabled {
            self.route_to_queue(&tracker, accepted, correlation_id).await?;
        } else {
            self.route_inline(&tracker, accepted);
        }

        Ok(tracker.id)
    }

    fn validate(&self, file: &UploadFile) -> Result<()> {
        if file.bytes.is_empty() {
            return Err(RuntimeError::ParseError(format!("{} is empty", file.filename)));
        }
        if file.bytes.len() as u64 > self.upload_cfg.max_file_size {
            return Err(RuntimeError::FileTooLarge(
                file.bytes.len() as u64,
                self.upload_cfg.max_file_size,
            ));
        }
        let lower = file.filename.to_lowercase();
        let allowed = self
            .upload_cfg
            .allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()));
        if !allowed {
            return Err(RuntimeError::UnsupportedExtension(file.filename.clone()));
        }
        Ok(())
    }

    /// Queue path: one `RESUME_PROCESSING` job per accepted file, tracker
    /// linked via the first job's id as a weak reference — the tracker
    /// survives the queue row regardless of which job it points at.
    /// Backpressure: once `scheduler.maxPending` is reached the whole
    /// batch is rejected with a retryable error rather than partially
    /// enqueued.
    async fn route_to_queue(
        &self,
        tracker: &ProcessTracker,
        files: Vec<UploadFile>,
        correlation_id: Option<String>,
    ) -> Result<()> {
        let metrics = self.queue.metrics().await?;
        if metrics.pending as u64 >= self.max_pending {
            self.tracker
                .fail_immediately(tracker.id, "queue at capacity, retry later")
                .await
                .ok();
            return Err(RuntimeError::StorageUnavailable(format!(
                "queue has {} pending jobs, at or above maxPending {}",
                metrics.pending, self.max_pending
            )));
        }

        let mut first_job_id = None;
        for file in files {
            let metadata = serde_json::json!({ TRACKER_ID_METADATA_KEY: tracker.id });
            let mut job = Job::new(
                JobType::ResumeProcessing {
                    file_data: file.bytes,
                    filename: file.filename,
                },
                DEFAULT_UPLOAD_PRIORITY,
                self.max_retries,
            )
            .with_metadata(metadata);
            if let Some(cid) = &correlation_id {
                job = job.with_correlation_id(cid.clone());
            }

            let job_id = self.queue.enqueue(job).await?;
            first_job_id.get_or_insert(job_id);
        }

        if let Some(job_id) = first_job_id {
            self.tracker.attach_job(tracker.id, job_id).await.ok();
        }
        info!(tracker_id = %tracker.id, "enqueued upload batch to durable job queue");
        Ok(())
    }

    /// Legacy path: runs the same [`ResumeJobProcessor`]
    /// pipeline per file as a detached task, without a queue row or
    /// heartbeat lease. Changing `scheduler.enabled` mid-flight leaves
    /// these tasks to finish naturally — they hold no reference back to
    /// the router.
    fn route_inline(&self, tracker: &ProcessTracker, files: Vec<UploadFile>) {
        info!(tracker_id = %tracker.id, files = files.len(), "routing upload batch to legacy in-process path");
        for file in files {
            let processor = self.processor.clone();
            let tracker_id = tracker.id;
            tokio::spawn(async move {
                if let Err(e) = processor.process(&file.bytes, &file.filename, Some(tracker_id), None).await {
                    warn!(tracker_id = %tracker_id, filename = %file.filename, error = %e, "legacy inline processing failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::jobs::create_storage;
    use crate::llm::LlmGateway;
    use crate::persistence::create_persistence;
    use std::time::Duration;

    fn base_cfg(scheduler_enabled: bool) -> RuntimeConfig {
        RuntimeConfig {
            database_url: "sqlite::memory:".into(),
            llm: LlmConfig {
                base_url: "http://localhost:1".into(),
                chat_model: "m".into(),
                embedding_model: "e".into(),
                max_tokens: 4000,
                temperature: 0.7,
                chat_timeout: Duration::from_secs(1),
                embed_timeout: Duration::from_secs(1),
                api_key: None,
            },
            scheduler: crate::config::SchedulerConfig {
                enabled: scheduler_enabled,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn router_for(cfg: &RuntimeConfig) -> UploadRouter {
        let persistence = create_persistence(cfg).await.unwrap();
        let queue = create_storage(cfg).await.unwrap();
        let tracker = Arc::new(TrackerStore::new(persistence.clone()));
        let llm = Arc::new(LlmGateway::new(cfg.llm.clone()).unwrap());
        let processor = Arc::new(ResumeJobProcessor::new(persistence, llm, cfg.clone()));
        UploadRouter::new(queue, tracker, processor, cfg)
    }

    #[tokio::test]
    async fn rejects_empty_upload() {
        let cfg = base_cfg(true);
        let router = router_for(&cfg).await;
        let err = router.upload(vec![], None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ParseError(_)));
    }

    #[tokio::test]
    async fn rejects_disallowed_extension_but_keeps_valid_files() {
        let cfg = base_cfg(true);
        let router = router_for(&cfg).await;
        let files = vec![
            UploadFile { filename: "resume.exe".into(), bytes: vec![1, 2, 3] },
            UploadFile { filename: "resume.pdf".into(), bytes: vec![1, 2, 3] },
        ];
        let tracker_id = router.upload(files, None).await.unwrap();
        let tracker = router.tracker.get(tracker_id).await.unwrap();
        assert_eq!(tracker.total_files, 1);
    }

    #[tokio::test]
    async fn rejects_oversized_file() {
        let cfg = base_cfg(true);
        let router = router_for(&cfg).await;
        let file = UploadFile { filename: "huge.pdf".into(), bytes: vec![0u8; (cfg.upload.max_file_size + 1) as usize] };
        assert!(router.validate(&file).is_err());
    }

    #[tokio::test]
    async fn scheduler_enabled_creates_queue_rows() {
        let cfg = base_cfg(true);
        let router = router_for(&cfg).await;
        let files = vec![UploadFile { filename: "resume.pdf".into(), bytes: vec![1, 2, 3] }];
        let tracker_id = router.upload(files, Some("corr-1".into())).await.unwrap();

        let metrics = router.queue.metrics().await.unwrap();
        assert_eq!(metrics.pending, 1);

        let tracker = router.tracker.get(tracker_id).await.unwrap();
        assert!(tracker.job_id.is_some());
    }

    #[tokio::test]
    async fn scheduler_disabled_does_not_touch_queue() {
        let cfg = base_cfg(false);
        let router = router_for(&cfg).await;
        let files = vec![UploadFile { filename: "resume.pdf".into(), bytes: vec![1, 2, 3] }];
        let tracker_id = router.upload(files, None).await.unwrap();

        // Legacy path is fire-and-forget; give the spawned task a moment,
        // then confirm nothing landed in the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let metrics = router.queue.metrics().await.unwrap();
        assert_eq!(metrics.pending, 0);
        assert!(router.tracker.get(tracker_id).await.is_ok());
    }
}
