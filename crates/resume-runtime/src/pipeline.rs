//! Resume Job Processor (C7): the per-file pipeline that a
//! `RESUME_PROCESSING` job runs — parse, extract, persist, chunk/embed,
//! tracker update — heartbeating between steps so the scheduler's
//! stale-sweep doesn't reclaim a still-running job.

use std::sync::Arc;

use chrono::Utc;
use strsim::jaro_winkler;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::embeddings::chunk_and_embed;
use crate::errors::{Result, RuntimeError};
use crate::jobs::{Job, JobHandler, JobId, WorkerContext};
use crate::llm::LlmGateway;
use crate::model::{Candidate, JobType, ProcessTrackerStatus};
use crate::parser;
use crate::persistence::{PersistenceGateway, TrackerUpdate};

/// `job_queue.metadata` key under which the router stashes the owning
/// tracker's id for a `RESUME_PROCESSING` job.
pub const TRACKER_ID_METADATA_KEY: &str = "trackerId";

/// Minimum Jaro-Winkler similarity between an existing candidate's name and
/// an incoming one to treat them as "the same person" on email collision.
/// Below this, persisting the candidate is a terminal `Logical` conflict
/// rather than a silent overwrite.
const NAME_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Runs the C3→C2→C1→C4 pipeline for one resume file.
pub struct ResumeJobProcessor {
    persistence: Arc<dyn PersistenceGateway>,
    llm: Arc<LlmGateway>,
    cfg: RuntimeConfig,
}

impl ResumeJobProcessor {
    pub fn new(persistence: Arc<dyn PersistenceGateway>, llm: Arc<LlmGateway>, cfg: RuntimeConfig) -> Self {
        Self { persistence, llm, cfg }
    }

    /// Parse, extract, persist, chunk/embed. `tracker_id`, if set, is
    /// advanced at each numbered step; `ctx`/`job_id`, if set, receive a
    /// heartbeat between steps so the scheduler's stale sweep doesn't
    /// reclaim a still-running job.
    pub async fn process(
        &self,
        file_data: &[u8],
        filename: &str,
        tracker_id: Option<Uuid>,
        heartbeat: Option<(&WorkerContext, JobId)>,
    ) -> Result<Uuid> {
        let result = self.process_inner(file_data, filename, tracker_id, heartbeat).await;

        if let Some(tid) = tracker_id {
            match &result {
                Ok(_) => self.bump_tracker(tid, true).await,
                Err(e) => {
                    warn!(tracker_id = %tid, filename, error = %e, "resume processing failed");
                    self.bump_tracker(tid, false).await;
                }
            }
        }

        result
    }

    async fn process_inner(
        &self,
        file_data: &[u8],
        filename: &str,
        tracker_id: Option<Uuid>,
        heartbeat: Option<(&WorkerContext, JobId)>,
    ) -> Result<Uuid> {
        // Step 1: tracker already loaded by caller via `tracker_id`; nothing
        // to fetch here beyond the id itself.

        // Step 2: parse.
        let entries = parser::parse(file_data, filename, self.cfg.upload.max_file_size)?;
        let text = entries
            .into_iter()
            .map(|e| e.text)
            .collect::<Vec<_>>()
            .join("\n\n");
        self.beat(heartbeat).await;

        // Step 3: LLM extraction.
        let extract = self.llm.analyze_resume(&text).await?;
        if let Some(tid) = tracker_id {
            self.set_tracker_status(tid, ProcessTrackerStatus::ResumeAnalyzed).await;
        }
        self.beat(heartbeat).await;

        // Step 4: persist candidate (upsert on email, else on name+filename).
        let candidate_id = self.upsert_candidate(&extract, &text, filename).await?;
        self.beat(heartbeat).await;

        // Step 5: chunk + embed, orphan cleanup first.
        self.persistence.delete_embeddings_for_candidate(candidate_id).await?;
        let cfg = self.cfg.embeddings.clone();
        let llm = self.llm.clone();
        let persistence = self.persistence.clone();
        let embeddings = chunk_and_embed(candidate_id, &text, &llm, &cfg, |done, total| {
            info!(candidate_id = %candidate_id, done, total, "embedding batch complete");
        })
        .await?;
        if !embeddings.is_empty() {
            persistence.insert_embeddings(&embeddings).await?;
        }
        if let Some(tid) = tracker_id {
            self.set_tracker_status(tid, ProcessTrackerStatus::EmbedGenerated).await;
        }
        self.beat(heartbeat).await;

        // Step 6: terminal tracker transition is handled by `process()`'s
        // caller via `bump_tracker`.
        Ok(candidate_id)
    }

    async fn beat(&self, heartbeat: Option<(&WorkerContext, JobId)>) {
        if let Some((ctx, job_id)) = heartbeat {
            ctx.heartbeat(job_id).await;
        }
    }

    async fn set_tracker_status(&self, tracker_id: Uuid, status: ProcessTrackerStatus) {
        let patch = TrackerUpdate {
            status: Some(status),
            ..Default::default()
        };
        if let Err(e) = self.persistence.update_tracker(tracker_id, patch).await {
            warn!(tracker_id = %tracker_id, error = %e, "failed to advance tracker status");
        }
    }

    /// Bumps `processed_files`/`failed_files` atomically in SQL (never a
    /// read-modify-write) so that concurrent files from the same upload
    /// batch — the normal case with `batchSize`/`threadPoolSize` > 1 — never
    /// lose an increment to each other, and derives the terminal transition
    /// from the post-increment row that call returned.
    async fn bump_tracker(&self, tracker_id: Uuid, success: bool) {
        let tracker = match self.persistence.increment_tracker_progress(tracker_id, success).await {
            Ok(t) => t,
            Err(e) => {
                warn!(tracker_id = %tracker_id, error = %e, "failed to bump tracker counters");
                return;
            }
        };

        if !tracker.is_terminal() {
            return;
        }

        let status = if tracker.failed_files > 0 && tracker.processed_files == 0 {
            ProcessTrackerStatus::Failed
        } else {
            ProcessTrackerStatus::Completed
        };
        let patch = TrackerUpdate {
            status: Some(status),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(e) = self.persistence.update_tracker(tracker_id, patch).await {
            warn!(tracker_id = %tracker_id, error = %e, "failed to advance tracker to terminal status");
        }
    }

    async fn upsert_candidate(
        &self,
        extract: &crate::llm::CandidateExtract,
        text: &str,
        filename: &str,
    ) -> Result<Uuid> {
        let normalized_email = extract.email.as_ref().map(|e| e.trim().to_lowercase());

        let existing = if let Some(email) = &normalized_email {
            self.persistence.find_candidate_by_email(email).await?
        } else if let Some(name) = &extract.name {
            self.persistence.find_candidate_by_name_and_filename(name, filename).await?
        } else {
            None
        };

        let now = Utc::now();
        match existing {
            Some(mut current) => {
                if let (Some(existing_name), Some(new_name)) = (&current.name, &extract.name) {
                    let similarity = jaro_winkler(&existing_name.to_lowercase(), &new_name.to_lowercase());
                    if similarity < NAME_SIMILARITY_THRESHOLD {
                        return Err(RuntimeError::CandidateConflict);
                    }
                }

                current.name = extract.name.clone().or(current.name);
                current.email = normalized_email.or(current.email);
                current.mobile = extract.mobile.clone().or(current.mobile);
                current.resume_filename = Some(filename.to_string());
                current.resume_content = Some(text.to_string());
                current.resume_file = Some(text.as_bytes().to_vec());
                current.experience_summary = extract.experience_summary.clone().or(current.experience_summary);
                current.skills = extract.skills.clone().map(String::from).or(current.skills);
                current.domain_knowledge = extract.domain_knowledge.clone().map(String::from).or(current.domain_knowledge);
                current.academic_background =
                    extract.academic_background.clone().map(String::from).or(current.academic_background);
                current.years_of_experience = extract.years_of_experience.or(current.years_of_experience);

                let saved = self.persistence.update_candidate(current).await?;
                Ok(saved.id)
            }
            None => {
                let candidate = Candidate {
                    id: Uuid::new_v4(),
                    name: extract.name.clone(),
                    email: normalized_email,
                    mobile: extract.mobile.clone(),
                    resume_filename: Some(filename.to_string()),
                    resume_content: Some(text.to_string()),
                    resume_file: Some(text.as_bytes().to_vec()),
                    experience_summary: extract.experience_summary.clone(),
                    skills: extract.skills.clone().map(String::from),
                    domain_knowledge: extract.domain_knowledge.clone().map(String::from),
                    academic_background: extract.academic_background.clone().map(String::from),
                    years_of_experience: extract.years_of_experience,
                    created_at: now,
                };
                let saved = self.persistence.insert_candidate(candidate).await?;
                Ok(saved.id)
            }
        }
    }
}

/// Bridges [`ResumeJobProcessor`] into the scheduler's [`JobHandler`]
/// dispatch, so a worker can hand a claimed job to the right processor by
/// job type. The tracker id travels as `job.metadata.trackerId` since
/// [`Job`] has no dedicated field for it — set by
/// [`crate::router::UploadRouter`] at enqueue time.
pub struct ResumeJobHandler {
    processor: Arc<ResumeJobProcessor>,
}

impl ResumeJobHandler {
    pub fn new(processor: Arc<ResumeJobProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait::async_trait]
impl JobHandler for ResumeJobHandler {
    async fn handle(&self, job: &Job, ctx: &WorkerContext) -> Result<serde_json::Value> {
        let (file_data, filename) = match &job.job_type {
            JobType::ResumeProcessing { file_data, filename } => (file_data, filename),
            other => {
                return Err(RuntimeError::Config(format!(
                    "ResumeJobHandler cannot handle job type {other:?}"
                )))
            }
        };

        let tracker_id = job
            .metadata
            .get(TRACKER_ID_METADATA_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let candidate_id = self
            .processor
            .process(file_data, filename, tracker_id, Some((ctx, job.id)))
            .await?;
        Ok(serde_json::json!({ "candidateId": candidate_id }))
    }

    fn can_handle(&self, job_type: &JobType) -> bool {
        matches!(job_type, JobType::ResumeProcessing { .. })
    }

    fn name(&self) -> &str {
        "resume-processing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_similarity_gate() {
        assert!(jaro_winkler("jane doe", "jane doe") >= NAME_SIMILARITY_THRESHOLD);
        assert!(jaro_winkler("jane doe", "bob smith") < NAME_SIMILARITY_THRESHOLD);
    }
}
