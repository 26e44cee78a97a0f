//! Audit Store (C10): append-only [`MatchAudit`] rows, written fire-and-
//! forget so a slow or failing audit insert never blocks the match caller.
//! The sink is the `match_audits` table via [`PersistenceGateway`], so rows
//! stay queryable rather than just appended to a local file.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::model::{MatchAudit, MatchAuditStatus};
use crate::persistence::{MatchAuditUpdate, PersistenceGateway};

/// Async, best-effort sink for [`MatchAudit`] rows.
pub struct AuditStore {
    persistence: Arc<dyn PersistenceGateway>,
    cfg: AuditConfig,
}

impl AuditStore {
    pub fn new(persistence: Arc<dyn PersistenceGateway>, cfg: AuditConfig) -> Self {
        Self { persistence, cfg }
    }

    /// Stamps `estimated_tokens_used` from `audit.estimatedTokensPerCandidate
    /// × totalCandidates` (a fresh `RUNNING` row never has real LLM usage
    /// yet) and spawns the insert. Never awaited by the caller.
    pub fn record_start(&self, mut audit: MatchAudit) {
        audit.estimated_tokens_used =
            audit.total_candidates as i64 * self.cfg.estimated_tokens_per_candidate as i64;
        let persistence = self.persistence.clone();
        let audit_id = audit.id;
        tokio::spawn(async move {
            if let Err(e) = persistence.insert_match_audit(audit).await {
                warn!(audit_id = %audit_id, error = %e, "failed to persist match audit start row");
            }
        });
    }

    /// Patches a `RUNNING` row to `COMPLETED` with its final tallies.
    /// Spawned, never awaited, so it never blocks the match result returned
    /// to the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn record_completion(
        &self,
        audit_id: Uuid,
        successful_matches: i32,
        shortlisted_count: i32,
        average_match_score: Option<f64>,
        highest_match_score: Option<f64>,
        duration_ms: i64,
        match_summaries: Value,
    ) {
        let persistence = self.persistence.clone();
        tokio::spawn(async move {
            let patch = MatchAuditUpdate {
                status: Some(MatchAuditStatus::Completed),
                successful_matches: Some(successful_matches),
                shortlisted_count: Some(shortlisted_count),
                average_match_score,
                highest_match_score,
                duration_ms: Some(duration_ms),
                completed_at: Some(Utc::now()),
                match_summaries: Some(match_summaries),
                ..Default::default()
            };
            if let Err(e) = persistence.update_match_audit(audit_id, patch).await {
                warn!(audit_id = %audit_id, error = %e, "failed to persist match audit completion");
            }
        });
    }

    /// Patches a `RUNNING` row to `FAILED` when the batch itself couldn't
    /// run at all (e.g. the job requirement vanished mid-run), as distinct
    /// from individual candidate match failures, which are simply absent
    /// from `successful_matches`.
    pub fn record_failure(&self, audit_id: Uuid, error_message: String) {
        let persistence = self.persistence.clone();
        tokio::spawn(async move {
            let patch = MatchAuditUpdate {
                status: Some(MatchAuditStatus::Failed),
                completed_at: Some(Utc::now()),
                error_message: Some(error_message),
                ..Default::default()
            };
            if let Err(e) = persistence.update_match_audit(audit_id, patch).await {
                warn!(audit_id = %audit_id, error = %e, "failed to persist match audit failure");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{create_persistence, PersistenceGateway};
    use std::time::Duration;

    async fn test_gateway() -> Arc<dyn PersistenceGateway> {
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
    async fn token_estimate_applied_on_start() {
        let persistence = test_gateway().await;
        let store = AuditStore::new(persistence.clone(), AuditConfig::default());

        let job_id = Uuid::new_v4();
        let audit_id = Uuid::new_v4();
        let audit = MatchAudit {
            id: audit_id,
            job_requirement_id: job_id,
            job_title: "Engineer".into(),
            status: MatchAuditStatus::Running,
            total_candidates: 5,
            successful_matches: 0,
            shortlisted_count: 0,
            average_match_score: None,
            highest_match_score: None,
            estimated_tokens_used: 0,
            duration_ms: None,
            initiated_by: None,
            initiated_at: Utc::now(),
            completed_at: None,
            match_summaries: None,
            error_message: None,
        };
        store.record_start(audit);
        store.record_completion(audit_id, 4, 2, Some(81.5), Some(95.0), 1200, serde_json::json!([]));

        // Both inserts are fire-and-forget; yield so the spawned tasks run
        // to completion without panicking before the test exits.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
