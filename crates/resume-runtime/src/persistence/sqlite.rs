//! SQLite-backed [`PersistenceGateway`] — local dev / test backend.
//!
//! There is no vector extension here: the `embedding` column is a
//! TEXT-encoded JSON float array, and
//! [`PersistenceGateway::similarity_search`] pulls every row and scores it
//! in-process with [`crate::embeddings::cosine_similarity`] rather than
//! pushing the distance computation into SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use super::{MatchAuditUpdate, PersistenceGateway, ScoredEmbedding, TrackerUpdate};
use crate::embeddings::cosine_similarity;
use crate::errors::{Result, RuntimeError};
use crate::model::{
    Candidate, CandidateExternalProfile, CandidateMatch, ExternalProfileSource,
    ExternalProfileStatus, JobRequirement, MatchAudit, MatchAuditStatus, ProcessTracker,
    ProcessTrackerStatus, ResumeEmbedding,
};

pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub async fn new(connection: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(connection)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| RuntimeError::StorageConflict(e.to_string()))
}

fn source_str(s: ExternalProfileSource) -> &'static str {
    match s {
        ExternalProfileSource::Github => "GITHUB",
        ExternalProfileSource::Linkedin => "LINKEDIN",
        ExternalProfileSource::Twitter => "TWITTER",
        ExternalProfileSource::InternetSearch => "INTERNET_SEARCH",
    }
}

fn parse_source(s: &str) -> ExternalProfileSource {
    match s {
        "LINKEDIN" => ExternalProfileSource::Linkedin,
        "TWITTER" => ExternalProfileSource::Twitter,
        "INTERNET_SEARCH" => ExternalProfileSource::InternetSearch,
        _ => ExternalProfileSource::Github,
    }
}

fn status_str(s: ExternalProfileStatus) -> &'static str {
    match s {
        ExternalProfileStatus::Pending => "PENDING",
        ExternalProfileStatus::Success => "SUCCESS",
        ExternalProfileStatus::Failed => "FAILED",
        ExternalProfileStatus::NotFound => "NOT_FOUND",
    }
}

fn parse_ext_status(s: &str) -> ExternalProfileStatus {
    match s {
        "SUCCESS" => ExternalProfileStatus::Success,
        "FAILED" => ExternalProfileStatus::Failed,
        "NOT_FOUND" => ExternalProfileStatus::NotFound,
        _ => ExternalProfileStatus::Pending,
    }
}

fn tracker_status_str(s: ProcessTrackerStatus) -> &'static str {
    match s {
        ProcessTrackerStatus::Initiated => "INITIATED",
        ProcessTrackerStatus::EmbedGenerated => "EMBED_GENERATED",
        ProcessTrackerStatus::VectorDbUpdated => "VECTOR_DB_UPDATED",
        ProcessTrackerStatus::ResumeAnalyzed => "RESUME_ANALYZED",
        ProcessTrackerStatus::Completed => "COMPLETED",
        ProcessTrackerStatus::Failed => "FAILED",
    }
}

fn parse_tracker_status(s: &str) -> ProcessTrackerStatus {
    match s {
        "EMBED_GENERATED" => ProcessTrackerStatus::EmbedGenerated,
        "VECTOR_DB_UPDATED" => ProcessTrackerStatus::VectorDbUpdated,
        "RESUME_ANALYZED" => ProcessTrackerStatus::ResumeAnalyzed,
        "COMPLETED" => ProcessTrackerStatus::Completed,
        "FAILED" => ProcessTrackerStatus::Failed,
        _ => ProcessTrackerStatus::Initiated,
    }
}

fn audit_status_str(s: MatchAuditStatus) -> &'static str {
    match s {
        MatchAuditStatus::Running => "RUNNING",
        MatchAuditStatus::Completed => "COMPLETED",
        MatchAuditStatus::Failed => "FAILED",
    }
}

fn parse_audit_status(s: &str) -> MatchAuditStatus {
    match s {
        "COMPLETED" => MatchAuditStatus::Completed,
        "FAILED" => MatchAuditStatus::Failed,
        _ => MatchAuditStatus::Running,
    }
}

fn row_to_candidate(row: &sqlx::sqlite::SqliteRow) -> Result<Candidate> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Candidate {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        mobile: row.try_get("mobile")?,
        resume_filename: row.try_get("resume_filename")?,
        resume_content: row.try_get("resume_content")?,
        resume_file: row.try_get("resume_file")?,
        experience_summary: row.try_get("experience_summary")?,
        skills: row.try_get("skills")?,
        domain_knowledge: row.try_get("domain_knowledge")?,
        academic_background: row.try_get("academic_background")?,
        years_of_experience: row.try_get("years_of_experience")?,
        created_at: parse_dt(&created_at)?,
    })
}

fn row_to_job_requirement(row: &sqlx::sqlite::SqliteRow) -> Result<JobRequirement> {
    let id: String = row.try_get("id")?;
    Ok(JobRequirement {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        required_skills: row.try_get("required_skills")?,
        min_experience: row.try_get("min_experience")?,
        max_experience: row.try_get("max_experience")?,
        required_education: row.try_get("required_education")?,
        domain: row.try_get("domain")?,
        location: row.try_get("location")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
    })
}

fn row_to_match(row: &sqlx::sqlite::SqliteRow) -> Result<CandidateMatch> {
    let id: String = row.try_get("id")?;
    let candidate_id: String = row.try_get("candidate_id")?;
    let job_requirement_id: String = row.try_get("job_requirement_id")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(CandidateMatch {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        candidate_id: candidate_id
            .parse()
            .map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        job_requirement_id: job_requirement_id
            .parse()
            .map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        match_score: row.try_get("match_score")?,
        skills_score: row.try_get("skills_score")?,
        experience_score: row.try_get("experience_score")?,
        education_score: row.try_get("education_score")?,
        domain_score: row.try_get("domain_score")?,
        match_explanation: row.try_get("match_explanation")?,
        is_shortlisted: row.try_get::<i64, _>("is_shortlisted")? != 0,
        is_selected: row.try_get::<i64, _>("is_selected")? != 0,
        recruiter_notes: row.try_get("recruiter_notes")?,
        created_at: parse_dt(&created_at)?,
    })
}

fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<CandidateExternalProfile> {
    let id: String = row.try_get("id")?;
    let candidate_id: String = row.try_get("candidate_id")?;
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("status")?;
    let last_fetched_at: Option<String> = row.try_get("last_fetched_at")?;
    Ok(CandidateExternalProfile {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        candidate_id: candidate_id
            .parse()
            .map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        source: parse_source(&source),
        profile_url: row.try_get("profile_url")?,
        display_name: row.try_get("display_name")?,
        bio: row.try_get("bio")?,
        enriched_summary: row.try_get("enriched_summary")?,
        status: parse_ext_status(&status),
        last_fetched_at: last_fetched_at.map(|s| parse_dt(&s)).transpose()?,
        error_message: row.try_get("error_message")?,
        followers_count: row.try_get("followers_count")?,
        public_repos: row.try_get("public_repos")?,
        location: row.try_get("location")?,
    })
}

fn row_to_embedding(row: &sqlx::sqlite::SqliteRow) -> Result<ResumeEmbedding> {
    let id: String = row.try_get("id")?;
    let candidate_id: String = row.try_get("candidate_id")?;
    let embedding_json: String = row.try_get("embedding")?;
    let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
        .map_err(|e| RuntimeError::StorageConflict(e.to_string()))?;
    Ok(ResumeEmbedding {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        candidate_id: candidate_id
            .parse()
            .map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        chunk_text: row.try_get("chunk_text")?,
        embedding,
        chunk_index: row.try_get("chunk_index")?,
    })
}

fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> Result<MatchAudit> {
    let id: String = row.try_get("id")?;
    let job_requirement_id: String = row.try_get("job_requirement_id")?;
    let status: String = row.try_get("status")?;
    let initiated_at: String = row.try_get("initiated_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let match_summaries: Option<String> = row.try_get("match_summaries")?;
    Ok(MatchAudit {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        job_requirement_id: job_requirement_id
            .parse()
            .map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        job_title: row.try_get("job_title")?,
        status: parse_audit_status(&status),
        total_candidates: row.try_get("total_candidates")?,
        successful_matches: row.try_get("successful_matches")?,
        shortlisted_count: row.try_get("shortlisted_count")?,
        average_match_score: row.try_get("average_match_score")?,
        highest_match_score: row.try_get("highest_match_score")?,
        estimated_tokens_used: row.try_get("estimated_tokens_used")?,
        duration_ms: row.try_get("duration_ms")?,
        initiated_by: row.try_get("initiated_by")?,
        initiated_at: parse_dt(&initiated_at)?,
        completed_at: completed_at.map(|s| parse_dt(&s)).transpose()?,
        match_summaries: match_summaries
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| RuntimeError::StorageConflict(e.to_string()))?,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_tracker(row: &sqlx::sqlite::SqliteRow) -> Result<ProcessTracker> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let job_id: Option<String> = row.try_get("job_id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    Ok(ProcessTracker {
        id: id.parse().map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        status: parse_tracker_status(&status),
        total_files: row.try_get("total_files")?,
        processed_files: row.try_get("processed_files")?,
        failed_files: row.try_get("failed_files")?,
        message: row.try_get("message")?,
        uploaded_filename: row.try_get("uploaded_filename")?,
        correlation_id: row.try_get("correlation_id")?,
        job_id: job_id
            .map(|s| s.parse())
            .transpose()
            .map_err(|_| RuntimeError::StorageConflict("bad uuid".into()))?,
        created_at: parse_dt(&created_at)?,
        updated_at: parse_dt(&updated_at)?,
        completed_at: completed_at.map(|s| parse_dt(&s)).transpose()?,
    })
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn setup(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                name TEXT,
                email TEXT,
                mobile TEXT,
                resume_filename TEXT,
                resume_content TEXT,
                resume_file BLOB,
                experience_summary TEXT,
                skills TEXT,
                domain_knowledge TEXT,
                academic_background TEXT,
                years_of_experience INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_embeddings (
                id TEXT PRIMARY KEY,
                candidate_id TEXT NOT NULL,
                chunk_text TEXT NOT NULL,
                embedding TEXT NOT NULL,
                chunk_index INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_requirements (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                required_skills TEXT,
                min_experience INTEGER,
                max_experience INTEGER,
                required_education TEXT,
                domain TEXT,
                location TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidate_matches (
                id TEXT PRIMARY KEY,
                candidate_id TEXT NOT NULL,
                job_requirement_id TEXT NOT NULL,
                match_score REAL NOT NULL,
                skills_score REAL NOT NULL,
                experience_score REAL NOT NULL,
                education_score REAL NOT NULL,
                domain_score REAL NOT NULL,
                match_explanation TEXT,
                is_shortlisted INTEGER NOT NULL DEFAULT 0,
                is_selected INTEGER NOT NULL DEFAULT 0,
                recruiter_notes TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (candidate_id, job_requirement_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidate_external_profiles (
                id TEXT PRIMARY KEY,
                candidate_id TEXT NOT NULL,
                source TEXT NOT NULL,
                profile_url TEXT,
                display_name TEXT,
                bio TEXT,
                enriched_summary TEXT,
                status TEXT NOT NULL,
                last_fetched_at TEXT,
                error_message TEXT,
                followers_count INTEGER,
                public_repos INTEGER,
                location TEXT,
                UNIQUE (candidate_id, source)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS match_audits (
                id TEXT PRIMARY KEY,
                job_requirement_id TEXT NOT NULL,
                job_title TEXT NOT NULL,
                status TEXT NOT NULL,
                total_candidates INTEGER NOT NULL,
                successful_matches INTEGER NOT NULL DEFAULT 0,
                shortlisted_count INTEGER NOT NULL DEFAULT 0,
                average_match_score REAL,
                highest_match_score REAL,
                estimated_tokens_used INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                initiated_by TEXT,
                initiated_at TEXT NOT NULL,
                completed_at TEXT,
                match_summaries TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS process_tracker (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                total_files INTEGER NOT NULL,
                processed_files INTEGER NOT NULL DEFAULT 0,
                failed_files INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                uploaded_filename TEXT,
                correlation_id TEXT,
                job_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }

    async fn find_candidate_by_email(&self, email: &str) -> Result<Option<Candidate>> {
        let row = sqlx::query("SELECT * FROM candidates WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_candidate).transpose()
    }

    async fn find_candidate_by_name_and_filename(
        &self,
        name: &str,
        filename: &str,
    ) -> Result<Option<Candidate>> {
        let row = sqlx::query("SELECT * FROM candidates WHERE name = ? AND resume_filename = ?")
            .bind(name)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_candidate).transpose()
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>> {
        let row = sqlx::query("SELECT * FROM candidates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_candidate).transpose()
    }

    async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let rows = sqlx::query("SELECT * FROM candidates ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn insert_candidate(&self, candidate: Candidate) -> Result<Candidate> {
        sqlx::query(
            r#"
            INSERT INTO candidates
                (id, name, email, mobile, resume_filename, resume_content, resume_file,
                 experience_summary, skills, domain_knowledge, academic_background,
                 years_of_experience, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candidate.id.to_string())
        .bind(&candidate.name)
        .bind(&candidate.email)
        .bind(&candidate.mobile)
        .bind(&candidate.resume_filename)
        .bind(&candidate.resume_content)
        .bind(&candidate.resume_file)
        .bind(&candidate.experience_summary)
        .bind(&candidate.skills)
        .bind(&candidate.domain_knowledge)
        .bind(&candidate.academic_background)
        .bind(candidate.years_of_experience)
        .bind(candidate.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(candidate)
    }

    async fn update_candidate(&self, candidate: Candidate) -> Result<Candidate> {
        sqlx::query(
            r#"
            UPDATE candidates SET
                name = ?, email = ?, mobile = ?, resume_filename = ?, resume_content = ?,
                resume_file = ?, experience_summary = ?, skills = ?, domain_knowledge = ?,
                academic_background = ?, years_of_experience = ?
            WHERE id = ?
            "#,
        )
        .bind(&candidate.name)
        .bind(&candidate.email)
        .bind(&candidate.mobile)
        .bind(&candidate.resume_filename)
        .bind(&candidate.resume_content)
        .bind(&candidate.resume_file)
        .bind(&candidate.experience_summary)
        .bind(&candidate.skills)
        .bind(&candidate.domain_knowledge)
        .bind(&candidate.academic_background)
        .bind(candidate.years_of_experience)
        .bind(candidate.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(candidate)
    }

    async fn delete_candidate_cascade(&self, id: Uuid) -> Result<()> {
        let id_str = id.to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query("DELETE FROM candidate_matches WHERE candidate_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        sqlx::query("DELETE FROM candidate_external_profiles WHERE candidate_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        sqlx::query("DELETE FROM resume_embeddings WHERE candidate_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        sqlx::query("DELETE FROM candidates WHERE id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_embeddings_for_candidate(&self, candidate_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM resume_embeddings WHERE candidate_id = ?")
            .bind(candidate_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn insert_embeddings(&self, embeddings: &[ResumeEmbedding]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        for e in embeddings {
            let json = serde_json::to_string(&e.embedding)
                .map_err(|err| RuntimeError::StorageConflict(err.to_string()))?;
            sqlx::query(
                "INSERT INTO resume_embeddings (id, candidate_id, chunk_text, embedding, chunk_index) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(e.id.to_string())
            .bind(e.candidate_id.to_string())
            .bind(&e.chunk_text)
            .bind(json)
            .bind(e.chunk_index)
            .execute(&mut *tx)
            .await
            .map_err(|err| RuntimeError::StorageUnavailable(err.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn similarity_search(&self, query: &[f32], limit: i64) -> Result<Vec<ScoredEmbedding>> {
        let rows = sqlx::query("SELECT * FROM resume_embeddings")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        let mut scored: Vec<ScoredEmbedding> = rows
            .iter()
            .map(|row| {
                let embedding = row_to_embedding(row)?;
                let score = cosine_similarity(query, &embedding.embedding);
                Ok(ScoredEmbedding { embedding, score })
            })
            .collect::<Result<Vec<_>>>()?;

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);
        Ok(scored)
    }

    async fn get_job_requirement(&self, id: Uuid) -> Result<Option<JobRequirement>> {
        let row = sqlx::query("SELECT * FROM job_requirements WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_job_requirement).transpose()
    }

    async fn list_active_job_requirements(&self) -> Result<Vec<JobRequirement>> {
        let rows = sqlx::query("SELECT * FROM job_requirements WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        rows.iter().map(row_to_job_requirement).collect()
    }

    async fn upsert_match(&self, m: CandidateMatch) -> Result<CandidateMatch> {
        sqlx::query(
            r#"
            INSERT INTO candidate_matches
                (id, candidate_id, job_requirement_id, match_score, skills_score,
                 experience_score, education_score, domain_score, match_explanation,
                 is_shortlisted, is_selected, recruiter_notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (candidate_id, job_requirement_id) DO UPDATE SET
                match_score = excluded.match_score,
                skills_score = excluded.skills_score,
                experience_score = excluded.experience_score,
                education_score = excluded.education_score,
                domain_score = excluded.domain_score,
                match_explanation = excluded.match_explanation,
                is_shortlisted = excluded.is_shortlisted,
                created_at = excluded.created_at
            "#,
        )
        .bind(m.id.to_string())
        .bind(m.candidate_id.to_string())
        .bind(m.job_requirement_id.to_string())
        .bind(m.match_score)
        .bind(m.skills_score)
        .bind(m.experience_score)
        .bind(m.education_score)
        .bind(m.domain_score)
        .bind(&m.match_explanation)
        .bind(m.is_shortlisted)
        .bind(m.is_selected)
        .bind(&m.recruiter_notes)
        .bind(m.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        self.get_match(m.candidate_id, m.job_requirement_id)
            .await?
            .ok_or_else(|| RuntimeError::StorageConflict("match vanished after upsert".into()))
    }

    async fn get_match(
        &self,
        candidate_id: Uuid,
        job_requirement_id: Uuid,
    ) -> Result<Option<CandidateMatch>> {
        let row = sqlx::query(
            "SELECT * FROM candidate_matches WHERE candidate_id = ? AND job_requirement_id = ?",
        )
        .bind(candidate_id.to_string())
        .bind(job_requirement_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_match).transpose()
    }

    async fn get_external_profiles(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateExternalProfile>> {
        let rows = sqlx::query("SELECT * FROM candidate_external_profiles WHERE candidate_id = ?")
            .bind(candidate_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        rows.iter().map(row_to_profile).collect()
    }

    async fn upsert_external_profile(
        &self,
        profile: CandidateExternalProfile,
    ) -> Result<CandidateExternalProfile> {
        sqlx::query(
            r#"
            INSERT INTO candidate_external_profiles
                (id, candidate_id, source, profile_url, display_name, bio, enriched_summary,
                 status, last_fetched_at, error_message, followers_count, public_repos, location)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (candidate_id, source) DO UPDATE SET
                profile_url = excluded.profile_url,
                display_name = excluded.display_name,
                bio = excluded.bio,
                enriched_summary = excluded.enriched_summary,
                status = excluded.status,
                last_fetched_at = excluded.last_fetched_at,
                error_message = excluded.error_message,
                followers_count = excluded.followers_count,
                public_repos = excluded.public_repos,
                location = excluded.location
            "#,
        )
        .bind(profile.id.to_string())
        .bind(profile.candidate_id.to_string())
        .bind(source_str(profile.source))
        .bind(&profile.profile_url)
        .bind(&profile.display_name)
        .bind(&profile.bio)
        .bind(&profile.enriched_summary)
        .bind(status_str(profile.status))
        .bind(profile.last_fetched_at.map(|d| d.to_rfc3339()))
        .bind(&profile.error_message)
        .bind(profile.followers_count)
        .bind(profile.public_repos)
        .bind(&profile.location)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        self.get_external_profiles(profile.candidate_id)
            .await?
            .into_iter()
            .find(|p| p.source == profile.source)
            .ok_or_else(|| RuntimeError::StorageConflict("profile vanished after upsert".into()))
    }

    async fn insert_match_audit(&self, audit: MatchAudit) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO match_audits
                (id, job_requirement_id, job_title, status, total_candidates,
                 successful_matches, shortlisted_count, average_match_score,
                 highest_match_score, estimated_tokens_used, duration_ms,
                 initiated_by, initiated_at, completed_at, match_summaries, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(audit.id.to_string())
        .bind(audit.job_requirement_id.to_string())
        .bind(&audit.job_title)
        .bind(audit_status_str(audit.status))
        .bind(audit.total_candidates)
        .bind(audit.successful_matches)
        .bind(audit.shortlisted_count)
        .bind(audit.average_match_score)
        .bind(audit.highest_match_score)
        .bind(audit.estimated_tokens_used)
        .bind(audit.duration_ms)
        .bind(&audit.initiated_by)
        .bind(audit.initiated_at.to_rfc3339())
        .bind(audit.completed_at.map(|d| d.to_rfc3339()))
        .bind(
            audit
                .match_summaries
                .as_ref()
                .map(|v| serde_json::to_string(v))
                .transpose()
                .map_err(|e| RuntimeError::StorageConflict(e.to_string()))?,
        )
        .bind(&audit.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(audit.id)
    }

    async fn update_match_audit(&self, id: Uuid, patch: MatchAuditUpdate) -> Result<()> {
        let current = sqlx::query("SELECT * FROM match_audits WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        let Some(row) = current else {
            return Err(RuntimeError::StorageConflict("audit not found".into()));
        };
        let existing = row_to_audit(&row)?;

        let status = patch.status.unwrap_or(existing.status);
        let successful_matches = patch.successful_matches.unwrap_or(existing.successful_matches);
        let shortlisted_count = patch.shortlisted_count.unwrap_or(existing.shortlisted_count);
        let average_match_score = patch.average_match_score.or(existing.average_match_score);
        let highest_match_score = patch.highest_match_score.or(existing.highest_match_score);
        let estimated_tokens_used = patch.estimated_tokens_used.unwrap_or(existing.estimated_tokens_used);
        let duration_ms = patch.duration_ms.or(existing.duration_ms);
        let completed_at = patch.completed_at.or(existing.completed_at);
        let match_summaries = patch.match_summaries.or(existing.match_summaries);
        let error_message = patch.error_message.or(existing.error_message);

        sqlx::query(
            r#"
            UPDATE match_audits SET
                status = ?, successful_matches = ?, shortlisted_count = ?,
                average_match_score = ?, highest_match_score = ?, estimated_tokens_used = ?,
                duration_ms = ?, completed_at = ?, match_summaries = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(audit_status_str(status))
        .bind(successful_matches)
        .bind(shortlisted_count)
        .bind(average_match_score)
        .bind(highest_match_score)
        .bind(estimated_tokens_used)
        .bind(duration_ms)
        .bind(completed_at.map(|d| d.to_rfc3339()))
        .bind(
            match_summaries
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| RuntimeError::StorageConflict(e.to_string()))?,
        )
        .bind(error_message)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn create_tracker(&self, tracker: ProcessTracker) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO process_tracker
                (id, status, total_files, processed_files, failed_files, message,
                 uploaded_filename, correlation_id, job_id, created_at, updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tracker.id.to_string())
        .bind(tracker_status_str(tracker.status))
        .bind(tracker.total_files)
        .bind(tracker.processed_files)
        .bind(tracker.failed_files)
        .bind(&tracker.message)
        .bind(&tracker.uploaded_filename)
        .bind(&tracker.correlation_id)
        .bind(tracker.job_id.map(|j| j.to_string()))
        .bind(tracker.created_at.to_rfc3339())
        .bind(tracker.updated_at.to_rfc3339())
        .bind(tracker.completed_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(tracker.id)
    }

    async fn get_tracker(&self, id: Uuid) -> Result<Option<ProcessTracker>> {
        let row = sqlx::query("SELECT * FROM process_tracker WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        row.as_ref().map(row_to_tracker).transpose()
    }

    async fn update_tracker(&self, id: Uuid, patch: TrackerUpdate) -> Result<()> {
        let current = self
            .get_tracker(id)
            .await?
            .ok_or_else(|| RuntimeError::StorageConflict("tracker not found".into()))?;

        let status = patch.status.unwrap_or(current.status);
        let processed_files = patch.processed_files.unwrap_or(current.processed_files);
        let failed_files = patch.failed_files.unwrap_or(current.failed_files);
        let message = patch.message.or(current.message);
        let job_id = patch.job_id.or(current.job_id);
        let completed_at = patch.completed_at.or(current.completed_at);

        sqlx::query(
            r#"
            UPDATE process_tracker SET
                status = ?, processed_files = ?, failed_files = ?, message = ?,
                job_id = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(tracker_status_str(status))
        .bind(processed_files)
        .bind(failed_files)
        .bind(message)
        .bind(job_id.map(|j| j.to_string()))
        .bind(completed_at.map(|d| d.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn increment_tracker_progress(&self, id: Uuid, success: bool) -> Result<ProcessTracker> {
        let row = sqlx::query(
            r#"
            UPDATE process_tracker SET
                processed_files = processed_files + ?,
                failed_files = failed_files + ?,
                updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(i32::from(success))
        .bind(i32::from(!success))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        match row {
            Some(row) => row_to_tracker(&row),
            None => Err(RuntimeError::StorageConflict("tracker not found".into())),
        }
    }
}
