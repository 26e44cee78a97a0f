//! Entity types backing every persisted table.
//!
//! Array-or-string fields (`skills`, `domain_knowledge`,
//! `academic_background`) are stored as comma-joined strings; the coercion
//! from an LLM's array response happens at the [`crate::llm`] boundary, not
//! here (see [`crate::llm::parsing::StringOrArray`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `candidates` row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub resume_filename: Option<String>,
    pub resume_content: Option<String>,
    #[serde(skip)]
    pub resume_file: Option<Vec<u8>>,
    pub experience_summary: Option<String>,
    pub skills: Option<String>,
    pub domain_knowledge: Option<String>,
    pub academic_background: Option<String>,
    pub years_of_experience: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// `resume_embeddings` row. `embedding` is serialized to the backend's
/// native vector literal at the gateway boundary (see [`crate::persistence`]);
/// here it is a plain `Vec<f32>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeEmbedding {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub chunk_index: i32,
}

/// `job_requirements` row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRequirement {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub required_skills: Option<String>,
    pub min_experience: Option<i32>,
    pub max_experience: Option<i32>,
    pub required_education: Option<String>,
    pub domain: Option<String>,
    pub location: Option<String>,
    pub is_active: bool,
}

impl JobRequirement {
    /// `min ≤ max` when both are set.
    pub fn experience_range_valid(&self) -> bool {
        match (self.min_experience, self.max_experience) {
            (Some(min), Some(max)) => min <= max,
            _ => true,
        }
    }

    /// Developer-leaning job, by a keyword test over title and skills.
    pub fn is_developer_leaning(&self) -> bool {
        const KEYWORDS: &[&str] = &["developer", "engineer", "software", "programmer", "sde"];
        let haystack = format!(
            "{} {}",
            self.title.to_lowercase(),
            self.required_skills.clone().unwrap_or_default().to_lowercase()
        );
        KEYWORDS.iter().any(|k| haystack.contains(k))
    }

    /// Social/marketing-leaning job, by a keyword test over title and domain.
    pub fn is_social_leaning(&self) -> bool {
        const KEYWORDS: &[&str] = &["marketing", "social media", "community", "brand", "pr"];
        let haystack = format!(
            "{} {}",
            self.title.to_lowercase(),
            self.domain.clone().unwrap_or_default().to_lowercase()
        );
        KEYWORDS.iter().any(|k| haystack.contains(k))
    }
}

/// `candidate_matches` row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CandidateMatch {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_requirement_id: Uuid,
    pub match_score: f64,
    pub skills_score: f64,
    pub experience_score: f64,
    pub education_score: f64,
    pub domain_score: f64,
    pub match_explanation: Option<String>,
    pub is_shortlisted: bool,
    pub is_selected: bool,
    pub recruiter_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CandidateMatch {
    /// Auto-shortlist threshold.
    pub const SHORTLIST_THRESHOLD: f64 = 70.0;

    pub fn shortlisted_for(score: f64) -> bool {
        score >= Self::SHORTLIST_THRESHOLD
    }
}

/// `candidate_external_profiles.source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExternalProfileSource {
    Github,
    Linkedin,
    Twitter,
    InternetSearch,
}

impl std::fmt::Display for ExternalProfileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExternalProfileSource::Github => "GITHUB",
            ExternalProfileSource::Linkedin => "LINKEDIN",
            ExternalProfileSource::Twitter => "TWITTER",
            ExternalProfileSource::InternetSearch => "INTERNET_SEARCH",
        };
        write!(f, "{s}")
    }
}

/// `candidate_external_profiles.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExternalProfileStatus {
    Pending,
    Success,
    Failed,
    NotFound,
}

/// `candidate_external_profiles` row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CandidateExternalProfile {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub source: ExternalProfileSource,
    pub profile_url: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub enriched_summary: Option<String>,
    pub status: ExternalProfileStatus,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub followers_count: Option<i32>,
    pub public_repos: Option<i32>,
    pub location: Option<String>,
}

impl CandidateExternalProfile {
    /// Stale if `now - last_fetched_at > ttl`.
    pub fn is_stale(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.last_fetched_at {
            Some(t) => now - t > ttl,
            None => true,
        }
    }
}

/// `job_queue.job_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    ResumeProcessing { file_data: Vec<u8>, filename: String },
    BatchEmbedding { candidate_id: Uuid },
    DataMigration { description: String },
    Cleanup,
}

impl JobType {
    pub fn label(&self) -> &'static str {
        match self {
            JobType::ResumeProcessing { .. } => "RESUME_PROCESSING",
            JobType::BatchEmbedding { .. } => "BATCH_EMBEDDING",
            JobType::DataMigration { .. } => "DATA_MIGRATION",
            JobType::Cleanup => "CLEANUP",
        }
    }
}

/// `job_queue.status`. There is no standalone `Dead` state: a
/// terminally-failed job is `Failed` plus a row in `job_dead_letter_queue`
/// (see [`crate::jobs::types::Job::is_terminal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// `process_tracker.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessTrackerStatus {
    Initiated,
    EmbedGenerated,
    VectorDbUpdated,
    ResumeAnalyzed,
    Completed,
    Failed,
}

/// `process_tracker` row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessTracker {
    pub id: Uuid,
    pub status: ProcessTrackerStatus,
    pub total_files: i32,
    pub processed_files: i32,
    pub failed_files: i32,
    pub message: Option<String>,
    pub uploaded_filename: Option<String>,
    pub correlation_id: Option<String>,
    pub job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessTracker {
    /// `processed_files + failed_files ≤ total_files`.
    pub fn is_valid(&self) -> bool {
        self.processed_files + self.failed_files <= self.total_files
    }

    pub fn is_terminal(&self) -> bool {
        self.processed_files + self.failed_files >= self.total_files
    }
}

/// `match_audits.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchAuditStatus {
    Running,
    Completed,
    Failed,
}

/// `match_audits` row, append-only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchAudit {
    pub id: Uuid,
    pub job_requirement_id: Uuid,
    pub job_title: String,
    pub status: MatchAuditStatus,
    pub total_candidates: i32,
    pub successful_matches: i32,
    pub shortlisted_count: i32,
    pub average_match_score: Option<f64>,
    pub highest_match_score: Option<f64>,
    pub estimated_tokens_used: i64,
    pub duration_ms: Option<i64>,
    pub initiated_by: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub match_summaries: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// A pre-authenticated principal, attached per-request by the (out of
/// scope) auth decorator and threaded into C7/C9/C10 for audit fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub subject: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortlist_threshold() {
        assert!(CandidateMatch::shortlisted_for(70.0));
        assert!(CandidateMatch::shortlisted_for(99.9));
        assert!(!CandidateMatch::shortlisted_for(69.999));
    }

    #[test]
    fn tracker_invariant() {
        let now = Utc::now();
        let t = ProcessTracker {
            id: Uuid::new_v4(),
            status: ProcessTrackerStatus::Initiated,
            total_files: 3,
            processed_files: 2,
            failed_files: 1,
            message: None,
            uploaded_filename: None,
            correlation_id: None,
            job_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        assert!(t.is_valid());
        assert!(t.is_terminal());
    }

    #[test]
    fn job_requirement_keyword_detection() {
        let jr = JobRequirement {
            id: Uuid::new_v4(),
            title: "Senior Software Engineer".into(),
            description: None,
            required_skills: Some("rust, distributed systems".into()),
            min_experience: Some(3),
            max_experience: Some(8),
            required_education: None,
            domain: None,
            location: None,
            is_active: true,
        };
        assert!(jr.is_developer_leaning());
        assert!(!jr.is_social_leaning());
        assert!(jr.experience_range_valid());
    }
}
