//! Agentic Matching Engine (C9): the six-step per-candidate match as one
//! `match_one` call, plus a serial/bounded-parallel batch runner.
//!
//! Context ranking weight-then-recency-ranks a small set of external
//! profiles by `(source, job type)`.

mod ranking;

pub use ranking::{rank_profiles, source_weight};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::AuditStore;
use crate::config::EnrichmentConfig;
use crate::enrichment::EnrichmentStore;
use crate::errors::Result;
use crate::llm::LlmGateway;
use crate::model::{
    Candidate, CandidateMatch, ExternalProfileSource, ExternalProfileStatus, JobRequirement,
    MatchAudit, MatchAuditStatus,
};
use crate::persistence::PersistenceGateway;

/// Runs the six-step per-candidate match plus the batch ("match all")
/// orchestration.
pub struct MatchEngine {
    persistence: Arc<dyn PersistenceGateway>,
    enrichment: Arc<EnrichmentStore>,
    llm: Arc<LlmGateway>,
    audit: Arc<AuditStore>,
    cfg: EnrichmentConfig,
}

impl MatchEngine {
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        enrichment: Arc<EnrichmentStore>,
        llm: Arc<LlmGateway>,
        audit: Arc<AuditStore>,
        cfg: EnrichmentConfig,
    ) -> Self {
        Self { persistence, enrichment, llm, audit, cfg }
    }

    /// Six-step match for one candidate against one job.
    pub async fn match_one(&self, candidate: &Candidate, job: &JobRequirement) -> Result<CandidateMatch> {
        // Step 1: staleness refresh for existing SUCCESS profiles.
        let mut profiles = self.enrichment.profiles(candidate.id).await.unwrap_or_default();
        for p in profiles.clone() {
            if p.status == ExternalProfileStatus::Success && self.enrichment.needs_refresh(Some(&p)) {
                match self.enrichment.refresh(candidate, p.source, Some(p.clone())).await {
                    Ok(refreshed) => replace_profile(&mut profiles, refreshed),
                    Err(e) => warn!(candidate_id = %candidate.id, source = ?p.source, error = %e, "step 1 refresh failed, skipping"),
                }
            }
        }

        // Step 2: baseline INTERNET_SEARCH guarantee.
        let internet = profiles
            .iter()
            .find(|p| p.source == ExternalProfileSource::InternetSearch)
            .cloned();
        if self.enrichment.needs_refresh(internet.as_ref()) {
            match self
                .enrichment
                .refresh(candidate, ExternalProfileSource::InternetSearch, internet)
                .await
            {
                Ok(refreshed) => replace_profile(&mut profiles, refreshed),
                Err(e) => warn!(candidate_id = %candidate.id, error = %e, "step 2 baseline internet search failed, skipping"),
            }
        }

        // Step 3: opt-in LLM source selection.
        if self.cfg.source_selection_enabled {
            let candidate_summary = candidate_summary(candidate);
            let job_summary = job_summary(job);
            let selection = self.llm.select_enrichment_sources(&candidate_summary, &job_summary).await;
            for source in selection.sources {
                let existing = profiles.iter().find(|p| p.source == source).cloned();
                if self.enrichment.needs_refresh(existing.as_ref()) {
                    match self.enrichment.refresh(candidate, source, existing).await {
                        Ok(refreshed) => replace_profile(&mut profiles, refreshed),
                        Err(e) => warn!(candidate_id = %candidate.id, source = ?source, error = %e, "step 3 selected-source refresh failed, skipping"),
                    }
                }
            }
        }

        // Step 4: context build.
        let mut context = rank_profiles(job, &profiles);

        // Step 5: first-pass match (mandatory).
        let candidate_summary = candidate_summary(candidate);
        let job_summary = job_summary(job);
        let first = self
            .llm
            .match_candidate(&candidate_summary, &job_summary, context.as_deref())
            .await?;

        let mut final_scores = first.clone();

        // Step 6: opt-in multi-pass for borderline scores with no context.
        if self.cfg.multi_pass_enabled
            && context.is_none()
            && first.match_score >= self.cfg.multi_pass_borderline_min
            && first.match_score <= self.cfg.multi_pass_borderline_max
        {
            let refreshed_profiles = self.enrichment.profiles(candidate.id).await.unwrap_or_default();
            context = rank_profiles(job, &refreshed_profiles);
            if context.is_some() {
                match self
                    .llm
                    .match_candidate(&candidate_summary, &job_summary, context.as_deref())
                    .await
                {
                    Ok(second) => {
                        info!(
                            candidate_id = %candidate.id,
                            job_id = %job.id,
                            delta = second.match_score - first.match_score,
                            "multi-pass re-match changed score"
                        );
                        final_scores = second;
                    }
                    Err(e) => warn!(candidate_id = %candidate.id, error = %e, "step 6 multi-pass re-match failed, keeping first pass"),
                }
            }
        }

        let is_shortlisted = CandidateMatch::shortlisted_for(final_scores.match_score);
        let existing = self.persistence.get_match(candidate.id, job.id).await?;
        let m = CandidateMatch {
            id: existing.map(|e| e.id).unwrap_or_else(Uuid::new_v4),
            candidate_id: candidate.id,
            job_requirement_id: job.id,
            match_score: final_scores.match_score,
            skills_score: final_scores.skills_score,
            experience_score: final_scores.experience_score,
            education_score: final_scores.education_score,
            domain_score: final_scores.domain_score,
            match_explanation: final_scores.match_explanation,
            is_shortlisted,
            is_selected: false,
            recruiter_notes: None,
            created_at: Utc::now(),
        };

        self.persistence.upsert_match(m).await
    }

    /// "Match all": serial (or bounded-parallel, caller's
    /// choice of `concurrency`) batch over `candidates`, with a fire-and-
    /// forget [`MatchAudit`] row.
    pub async fn match_all(
        &self,
        candidates: &[Candidate],
        job: &JobRequirement,
        initiated_by: Option<String>,
        concurrency: usize,
    ) -> Result<Vec<CandidateMatch>> {
        let started = Instant::now();
        let audit_id = Uuid::new_v4();
        let audit = MatchAudit {
            id: audit_id,
            job_requirement_id: job.id,
            job_title: job.title.clone(),
            status: MatchAuditStatus::Running,
            total_candidates: candidates.len() as i32,
            successful_matches: 0,
            shortlisted_count: 0,
            average_match_score: None,
            highest_match_score: None,
            estimated_tokens_used: 0,
            duration_ms: None,
            initiated_by,
            initiated_at: Utc::now(),
            completed_at: None,
            match_summaries: None,
            error_message: None,
        };
        self.audit.record_start(audit);

        let results = if concurrency <= 1 {
            let mut out = Vec::with_capacity(candidates.len());
            for c in candidates {
                out.push(self.match_one(c, job).await);
            }
            out
        } else {
            let mut out = Vec::with_capacity(candidates.len());
            for chunk in candidates.chunks(concurrency) {
                let futures = chunk.iter().map(|c| self.match_one(c, job));
                out.extend(futures::future::join_all(futures).await);
            }
            out
        };

        let successes: Vec<&CandidateMatch> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let shortlisted = successes.iter().filter(|m| m.is_shortlisted).count() as i32;
        let avg = if successes.is_empty() {
            None
        } else {
            Some(successes.iter().map(|m| m.match_score).sum::<f64>() / successes.len() as f64)
        };
        let highest = successes.iter().map(|m| m.match_score).fold(None, |acc: Option<f64>, x| {
            Some(acc.map_or(x, |a| a.max(x)))
        });
        let summaries = serde_json::json!(successes
            .iter()
            .map(|m| serde_json::json!({"candidateId": m.candidate_id, "matchScore": m.match_score}))
            .collect::<Vec<_>>());

        self.audit.record_completion(
            audit_id,
            successes.len() as i32,
            shortlisted,
            avg,
            highest,
            started.elapsed().as_millis() as i64,
            summaries,
        );

        Ok(results.into_iter().filter_map(|r| r.ok()).collect())
    }
}

fn replace_profile(profiles: &mut Vec<crate::model::CandidateExternalProfile>, updated: crate::model::CandidateExternalProfile) {
    if let Some(slot) = profiles.iter_mut().find(|p| p.source == updated.source) {
        *slot = updated;
    } else {
        profiles.push(updated);
    }
}

fn candidate_summary(c: &Candidate) -> String {
    format!(
        "Name: {}\nExperience: {}\nSkills: {}\nDomain knowledge: {}\nEducation: {}\nYears of experience: {}",
        c.name.as_deref().unwrap_or("unknown"),
        c.experience_summary.as_deref().unwrap_or(""),
        c.skills.as_deref().unwrap_or(""),
        c.domain_knowledge.as_deref().unwrap_or(""),
        c.academic_background.as_deref().unwrap_or(""),
        c.years_of_experience.map(|y| y.to_string()).unwrap_or_default(),
    )
}

fn job_summary(j: &JobRequirement) -> String {
    format!(
        "Title: {}\nDescription: {}\nRequired skills: {}\nExperience range: {:?}-{:?}\nEducation: {}\nDomain: {}",
        j.title,
        j.description.as_deref().unwrap_or(""),
        j.required_skills.as_deref().unwrap_or(""),
        j.min_experience,
        j.max_experience,
        j.required_education.as_deref().unwrap_or(""),
        j.domain.as_deref().unwrap_or(""),
    )
}
