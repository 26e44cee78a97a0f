//! Postgres-backed [`PersistenceGateway`] — the production backend.
//!
//! Uses `pgvector`'s `vector` column type via a raw SQL cast
//! (`$1::vector`) on a text literal rather than a `pgvector` crate
//! dependency, and its `<=>` cosine-distance operator for
//! [`PersistenceGateway::similarity_search`] — the distance metric is
//! pushed into the query instead of computed in Rust.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use uuid::Uuid;

use super::{
    MatchAuditUpdate, PersistenceGateway, ScoredEmbedding, TrackerUpdate,
};
use crate::errors::{Result, RuntimeError};
use crate::model::{
    Candidate, CandidateExternalProfile, CandidateMatch, JobRequirement, MatchAudit,
    ProcessTracker, ResumeEmbedding,
};

pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    pub async fn new(connection: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    fn vector_literal(v: &[f32]) -> String {
        let mut s = String::with_capacity(v.len() * 8 + 2);
        s.push('[');
        for (i, x) in v.iter().enumerate() {
            if i > 0 {
                s.push(',');
            }
            s.push_str(&x.to_string());
        }
        s.push(']');
        s
    }

    fn row_to_embedding(row: &sqlx::postgres::PgRow) -> Result<ResumeEmbedding> {
        let embedding_text: String = row.try_get("embedding_text")?;
        let embedding = parse_vector_literal(&embedding_text);
        Ok(ResumeEmbedding {
            id: row.try_get("id")?,
            candidate_id: row.try_get("candidate_id")?,
            chunk_text: row.try_get("chunk_text")?,
            embedding,
            chunk_index: row.try_get("chunk_index")?,
        })
    }
}

fn parse_vector_literal(s: &str) -> Vec<f32> {
    s.trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter(|p| !p.is_empty())
        .filter_map(|p| p.parse::<f32>().ok())
        .collect()
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn setup(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id UUID PRIMARY KEY,
                name TEXT,
                email TEXT,
                mobile TEXT,
                resume_filename TEXT,
                resume_content TEXT,
                resume_file BYTEA,
                experience_summary TEXT,
                skills TEXT,
                domain_knowledge TEXT,
                academic_background TEXT,
                years_of_experience INTEGER,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS candidates_email_unique ON candidates (email) WHERE email IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS candidates_name_idx ON candidates (name)")
            .execute(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_embeddings (
                id UUID PRIMARY KEY,
                candidate_id UUID NOT NULL REFERENCES candidates(id) ON DELETE CASCADE,
                chunk_text TEXT NOT NULL,
                embedding VECTOR(768) NOT NULL,
                chunk_index INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS resume_embeddings_embedding_ivfflat
                ON resume_embeddings USING ivfflat (embedding vector_cosine_ops)
                WITH (lists = 100)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS resume_embeddings_candidate_id_idx ON resume_embeddings (candidate_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_requirements (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                required_skills TEXT,
                min_experience INTEGER,
                max_experience INTEGER,
                required_education TEXT,
                domain TEXT,
                location TEXT,
                is_active BOOLEAN NOT NULL DEFAULT true
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidate_matches (
                id UUID PRIMARY KEY,
                candidate_id UUID NOT NULL REFERENCES candidates(id) ON DELETE CASCADE,
                job_requirement_id UUID NOT NULL REFERENCES job_requirements(id) ON DELETE CASCADE,
                match_score DOUBLE PRECISION NOT NULL,
                skills_score DOUBLE PRECISION NOT NULL,
                experience_score DOUBLE PRECISION NOT NULL,
                education_score DOUBLE PRECISION NOT NULL,
                domain_score DOUBLE PRECISION NOT NULL,
                match_explanation TEXT,
                is_shortlisted BOOLEAN NOT NULL DEFAULT false,
                is_selected BOOLEAN NOT NULL DEFAULT false,
                recruiter_notes TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
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
                id UUID PRIMARY KEY,
                candidate_id UUID NOT NULL REFERENCES candidates(id) ON DELETE CASCADE,
                source TEXT NOT NULL,
                profile_url TEXT,
                display_name TEXT,
                bio TEXT,
                enriched_summary TEXT,
                status TEXT NOT NULL,
                last_fetched_at TIMESTAMPTZ,
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
                id UUID PRIMARY KEY,
                job_requirement_id UUID NOT NULL,
                job_title TEXT NOT NULL,
                status TEXT NOT NULL,
                total_candidates INTEGER NOT NULL,
                successful_matches INTEGER NOT NULL DEFAULT 0,
                shortlisted_count INTEGER NOT NULL DEFAULT 0,
                average_match_score DOUBLE PRECISION,
                highest_match_score DOUBLE PRECISION,
                estimated_tokens_used BIGINT NOT NULL DEFAULT 0,
                duration_ms BIGINT,
                initiated_by TEXT,
                initiated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                completed_at TIMESTAMPTZ,
                match_summaries JSONB,
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
                id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                total_files INTEGER NOT NULL,
                processed_files INTEGER NOT NULL DEFAULT 0,
                failed_files INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                uploaded_filename TEXT,
                correlation_id TEXT,
                job_id UUID,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        Ok(())
    }

    async fn find_candidate_by_email(&self, email: &str) -> Result<Option<Candidate>> {
        let row = sqlx::query_as::<_, Candidate>("SELECT * FROM candidates WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn find_candidate_by_name_and_filename(
        &self,
        name: &str,
        filename: &str,
    ) -> Result<Option<Candidate>> {
        let row = sqlx::query_as::<_, Candidate>(
            "SELECT * FROM candidates WHERE name = $1 AND resume_filename = $2",
        )
        .bind(name)
        .bind(filename)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>> {
        let row = sqlx::query_as::<_, Candidate>("SELECT * FROM candidates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let rows = sqlx::query_as::<_, Candidate>("SELECT * FROM candidates ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(rows)
    }

    async fn insert_candidate(&self, candidate: Candidate) -> Result<Candidate> {
        let row = sqlx::query_as::<_, Candidate>(
            r#"
            INSERT INTO candidates
                (id, name, email, mobile, resume_filename, resume_content, resume_file,
                 experience_summary, skills, domain_knowledge, academic_background,
                 years_of_experience, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(candidate.id)
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
        .bind(candidate.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn update_candidate(&self, candidate: Candidate) -> Result<Candidate> {
        let row = sqlx::query_as::<_, Candidate>(
            r#"
            UPDATE candidates SET
                name = $2, email = $3, mobile = $4, resume_filename = $5,
                resume_content = $6, resume_file = $7, experience_summary = $8,
                skills = $9, domain_knowledge = $10, academic_background = $11,
                years_of_experience = $12
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(candidate.id)
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
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn delete_candidate_cascade(&self, id: Uuid) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        sqlx::query("DELETE FROM candidate_matches WHERE candidate_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        sqlx::query("DELETE FROM candidate_external_profiles WHERE candidate_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        sqlx::query("DELETE FROM resume_embeddings WHERE candidate_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        sqlx::query("DELETE FROM candidates WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_embeddings_for_candidate(&self, candidate_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM resume_embeddings WHERE candidate_id = $1")
            .bind(candidate_id)
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
            let literal = Self::vector_literal(&e.embedding);
            sqlx::query(
                r#"
                INSERT INTO resume_embeddings (id, candidate_id, chunk_text, embedding, chunk_index)
                VALUES ($1, $2, $3, $4::vector, $5)
                "#,
            )
            .bind(e.id)
            .bind(e.candidate_id)
            .bind(&e.chunk_text)
            .bind(literal)
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
        let literal = Self::vector_literal(query);
        let rows = sqlx::query(
            r#"
            SELECT id, candidate_id, chunk_text, chunk_index,
                   embedding::text AS embedding_text,
                   1 - (embedding <=> $1::vector) AS score
            FROM resume_embeddings
            ORDER BY embedding <=> $1::vector
            LIMIT $2
            "#,
        )
        .bind(literal)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let embedding = Self::row_to_embedding(row)?;
                let score: f64 = row.try_get("score")?;
                Ok(ScoredEmbedding {
                    embedding,
                    score: score as f32,
                })
            })
            .collect()
    }

    async fn get_job_requirement(&self, id: Uuid) -> Result<Option<JobRequirement>> {
        let row =
            sqlx::query_as::<_, JobRequirement>("SELECT * FROM job_requirements WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn list_active_job_requirements(&self) -> Result<Vec<JobRequirement>> {
        let rows = sqlx::query_as::<_, JobRequirement>(
            "SELECT * FROM job_requirements WHERE is_active = true",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(rows)
    }

    async fn upsert_match(&self, m: CandidateMatch) -> Result<CandidateMatch> {
        let row = sqlx::query_as::<_, CandidateMatch>(
            r#"
            INSERT INTO candidate_matches
                (id, candidate_id, job_requirement_id, match_score, skills_score,
                 experience_score, education_score, domain_score, match_explanation,
                 is_shortlisted, is_selected, recruiter_notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (candidate_id, job_requirement_id) DO UPDATE SET
                match_score = EXCLUDED.match_score,
                skills_score = EXCLUDED.skills_score,
                experience_score = EXCLUDED.experience_score,
                education_score = EXCLUDED.education_score,
                domain_score = EXCLUDED.domain_score,
                match_explanation = EXCLUDED.match_explanation,
                is_shortlisted = EXCLUDED.is_shortlisted,
                created_at = EXCLUDED.created_at
            RETURNING *
            "#,
        )
        .bind(m.id)
        .bind(m.candidate_id)
        .bind(m.job_requirement_id)
        .bind(m.match_score)
        .bind(m.skills_score)
        .bind(m.experience_score)
        .bind(m.education_score)
        .bind(m.domain_score)
        .bind(&m.match_explanation)
        .bind(m.is_shortlisted)
        .bind(m.is_selected)
        .bind(&m.recruiter_notes)
        .bind(m.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn get_match(
        &self,
        candidate_id: Uuid,
        job_requirement_id: Uuid,
    ) -> Result<Option<CandidateMatch>> {
        let row = sqlx::query_as::<_, CandidateMatch>(
            "SELECT * FROM candidate_matches WHERE candidate_id = $1 AND job_requirement_id = $2",
        )
        .bind(candidate_id)
        .bind(job_requirement_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn get_external_profiles(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<CandidateExternalProfile>> {
        let rows = sqlx::query_as::<_, CandidateExternalProfile>(
            "SELECT * FROM candidate_external_profiles WHERE candidate_id = $1",
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(rows)
    }

    async fn upsert_external_profile(
        &self,
        profile: CandidateExternalProfile,
    ) -> Result<CandidateExternalProfile> {
        let row = sqlx::query_as::<_, CandidateExternalProfile>(
            r#"
            INSERT INTO candidate_external_profiles
                (id, candidate_id, source, profile_url, display_name, bio, enriched_summary,
                 status, last_fetched_at, error_message, followers_count, public_repos, location)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (candidate_id, source) DO UPDATE SET
                profile_url = EXCLUDED.profile_url,
                display_name = EXCLUDED.display_name,
                bio = EXCLUDED.bio,
                enriched_summary = EXCLUDED.enriched_summary,
                status = EXCLUDED.status,
                last_fetched_at = EXCLUDED.last_fetched_at,
                error_message = EXCLUDED.error_message,
                followers_count = EXCLUDED.followers_count,
                public_repos = EXCLUDED.public_repos,
                location = EXCLUDED.location
            RETURNING *
            "#,
        )
        .bind(profile.id)
        .bind(profile.candidate_id)
        .bind(profile.source)
        .bind(&profile.profile_url)
        .bind(&profile.display_name)
        .bind(&profile.bio)
        .bind(&profile.enriched_summary)
        .bind(profile.status)
        .bind(profile.last_fetched_at)
        .bind(&profile.error_message)
        .bind(profile.followers_count)
        .bind(profile.public_repos)
        .bind(&profile.location)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn insert_match_audit(&self, audit: MatchAudit) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO match_audits
                (id, job_requirement_id, job_title, status, total_candidates,
                 successful_matches, shortlisted_count, average_match_score,
                 highest_match_score, estimated_tokens_used, duration_ms,
                 initiated_by, initiated_at, completed_at, match_summaries, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(audit.id)
        .bind(audit.job_requirement_id)
        .bind(&audit.job_title)
        .bind(audit.status)
        .bind(audit.total_candidates)
        .bind(audit.successful_matches)
        .bind(audit.shortlisted_count)
        .bind(audit.average_match_score)
        .bind(audit.highest_match_score)
        .bind(audit.estimated_tokens_used)
        .bind(audit.duration_ms)
        .bind(&audit.initiated_by)
        .bind(audit.initiated_at)
        .bind(audit.completed_at)
        .bind(&audit.match_summaries)
        .bind(&audit.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(audit.id)
    }

    async fn update_match_audit(&self, id: Uuid, patch: MatchAuditUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE match_audits SET
                status = COALESCE($2, status),
                successful_matches = COALESCE($3, successful_matches),
                shortlisted_count = COALESCE($4, shortlisted_count),
                average_match_score = COALESCE($5, average_match_score),
                highest_match_score = COALESCE($6, highest_match_score),
                estimated_tokens_used = COALESCE($7, estimated_tokens_used),
                duration_ms = COALESCE($8, duration_ms),
                completed_at = COALESCE($9, completed_at),
                match_summaries = COALESCE($10, match_summaries),
                error_message = COALESCE($11, error_message)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status)
        .bind(patch.successful_matches)
        .bind(patch.shortlisted_count)
        .bind(patch.average_match_score)
        .bind(patch.highest_match_score)
        .bind(patch.estimated_tokens_used)
        .bind(patch.duration_ms)
        .bind(patch.completed_at)
        .bind(patch.match_summaries)
        .bind(patch.error_message)
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(tracker.id)
        .bind(tracker.status)
        .bind(tracker.total_files)
        .bind(tracker.processed_files)
        .bind(tracker.failed_files)
        .bind(&tracker.message)
        .bind(&tracker.uploaded_filename)
        .bind(&tracker.correlation_id)
        .bind(tracker.job_id)
        .bind(tracker.created_at)
        .bind(tracker.updated_at)
        .bind(tracker.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(tracker.id)
    }

    async fn get_tracker(&self, id: Uuid) -> Result<Option<ProcessTracker>> {
        let row = sqlx::query_as::<_, ProcessTracker>("SELECT * FROM process_tracker WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(row)
    }

    async fn update_tracker(&self, id: Uuid, patch: TrackerUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE process_tracker SET
                status = COALESCE($2, status),
                processed_files = COALESCE($3, processed_files),
                failed_files = COALESCE($4, failed_files),
                message = COALESCE($5, message),
                job_id = COALESCE($6, job_id),
                completed_at = COALESCE($7, completed_at),
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status)
        .bind(patch.processed_files)
        .bind(patch.failed_files)
        .bind(&patch.message)
        .bind(patch.job_id)
        .bind(patch.completed_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn increment_tracker_progress(&self, id: Uuid, success: bool) -> Result<ProcessTracker> {
        let row = sqlx::query_as::<_, ProcessTracker>(
            r#"
            UPDATE process_tracker SET
                processed_files = processed_files + $2,
                failed_files = failed_files + $3,
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(i32::from(success))
        .bind(i32::from(!success))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RuntimeError::StorageUnavailable(e.to_string()))?;

        row.ok_or_else(|| RuntimeError::StorageConflict("tracker not found".into()))
    }
}
