//! Persistence Gateway (C1).
//!
//! Typed access to every table, isolating SQL and the vector column type
//! behind a single [`PersistenceGateway`] trait: one object-safe
//! `async_trait`, one struct per backend.
//!
//! The embedding column is written via a parameterized insert with an
//! explicit cast from a serialized float vector to the backend's vector
//! type, rather than relying on an ORM's automatic binding.

mod postgres;
mod sqlite;

pub use postgres::PgGateway;
pub use sqlite::SqliteGateway;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::errors::Result;
use crate::model::{
    Candidate, CandidateExternalProfile, CandidateMatch, JobRequirement, MatchAudit,
    MatchAuditStatus, ProcessTracker, ProcessTrackerStatus, ResumeEmbedding,
};

/// Partial update for an in-flight [`MatchAudit`] row (append-only table;
/// only the fields below are ever patched after the initial `RUNNING` insert).
#[derive(Debug, Clone, Default)]
pub struct MatchAuditUpdate {
    pub status: Option<MatchAuditStatus>,
    pub successful_matches: Option<i32>,
    pub shortlisted_count: Option<i32>,
    pub average_match_score: Option<f64>,
    pub highest_match_score: Option<f64>,
    pub estimated_tokens_used: Option<i64>,
    pub duration_ms: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub match_summaries: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Partial update for a [`ProcessTracker`] row, applied by C7/C6 as a
/// batch's files complete.
#[derive(Debug, Clone, Default)]
pub struct TrackerUpdate {
    pub status: Option<ProcessTrackerStatus>,
    pub processed_files: Option<i32>,
    pub failed_files: Option<i32>,
    pub message: Option<String>,
    pub job_id: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A stored chunk plus its cosine distance to a query vector, returned by
/// [`PersistenceGateway::similarity_search`].
#[derive(Debug, Clone)]
pub struct ScoredEmbedding {
    pub embedding: ResumeEmbedding,
    pub score: f32,
}

/// Core persistence interface (C1). Implementations must be thread-safe;
/// multi-row mutations within one call run in a single transaction.
#[async_trait]
pub trait PersistenceGateway: Send + Sync + 'static {
    fn backend_name(&self) -> &'static str;

    async fn setup(&self) -> Result<()>;

    // -- Candidates --------------------------------------------------
    async fn find_candidate_by_email(&self, email: &str) -> Result<Option<Candidate>>;
    async fn find_candidate_by_name_and_filename(
        &self,
        name: &str,
        filename: &str,
    ) -> Result<Option<Candidate>>;
    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>>;
    async fn list_candidates(&self) -> Result<Vec<Candidate>>;
    async fn insert_candidate(&self, candidate: Candidate) -> Result<Candidate>;
    async fn update_candidate(&self, candidate: Candidate) -> Result<Candidate>;
    /// Single-transaction cascade to embeddings, external profiles, and
    /// matches.
    async fn delete_candidate_cascade(&self, id: Uuid) -> Result<()>;

    // -- Embeddings ---------------------------------------------------
    async fn delete_embeddings_for_candidate(&self, candidate_id: Uuid) -> Result<()>;
    async fn insert_embeddings(&self, embeddings: &[ResumeEmbedding]) -> Result<()>;
    /// Cosine-distance nearest-neighbor search (pgvector `<=>` on Postgres;
    /// exact in-process cosine on SQLite).
    async fn similarity_search(&self, query: &[f32], limit: i64) -> Result<Vec<ScoredEmbedding>>;

    // -- Job requirements ----------------------------------------------
    async fn get_job_requirement(&self, id: Uuid) -> Result<Option<JobRequirement>>;
    async fn list_active_job_requirements(&self) -> Result<Vec<JobRequirement>>;

    // -- Matches --------------------------------------------------------
    /// Upsert on `(candidate_id, job_requirement_id)`: a re-match overwrites
    /// the existing row.
    async fn upsert_match(&self, m: CandidateMatch) -> Result<CandidateMatch>;
    async fn get_match(
        &self,
        candidate_id: Uuid,
        job_requirement_id: Uuid,
    ) -> Result<Option<CandidateMatch>>;

    // -- External profiles ----------------------------------------------
    async fn get_external_profiles(&self, candidate_id: Uuid) -> Result<Vec<CandidateExternalProfile>>;
    /// Upsert on `(candidate_id, source)`: at most one profile per source.
    async fn upsert_external_profile(
        &self,
        profile: CandidateExternalProfile,
    ) -> Result<CandidateExternalProfile>;

    // -- Match audits (append-only) ---------------------------------------
    async fn insert_match_audit(&self, audit: MatchAudit) -> Result<Uuid>;
    async fn update_match_audit(&self, id: Uuid, patch: MatchAuditUpdate) -> Result<()>;

    // -- Process tracker --------------------------------------------------
    async fn create_tracker(&self, tracker: ProcessTracker) -> Result<Uuid>;
    async fn get_tracker(&self, id: Uuid) -> Result<Option<ProcessTracker>>;
    async fn update_tracker(&self, id: Uuid, patch: TrackerUpdate) -> Result<()>;
    /// Atomically increments `processed_files` (on `success`) or
    /// `failed_files` (otherwise) in one SQL statement and returns the
    /// post-increment row, so concurrent callers for the same tracker never
    /// lose an increment to a read-modify-write race.
    async fn increment_tracker_progress(&self, id: Uuid, success: bool) -> Result<ProcessTracker>;
}

/// Factory matching the configured backend, mirroring
/// `jobs::storage::create_storage`'s config-driven pattern.
pub async fn create_persistence(cfg: &RuntimeConfig) -> Result<Arc<dyn PersistenceGateway>> {
    if cfg.database_url.starts_with("postgres") {
        let gw = PgGateway::new(&cfg.database_url).await?;
        gw.setup().await?;
        Ok(Arc::new(gw))
    } else {
        let gw = SqliteGateway::new(&cfg.database_url).await?;
        gw.setup().await?;
        Ok(Arc::new(gw))
    }
}
