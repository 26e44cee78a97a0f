//! Enrichment Store & Fetchers (C8).
//!
//! A strategy registry keyed by [`ExternalProfileSource`]: one
//! factory-built trait object per external source.

mod fetchers;

pub use fetchers::{GithubFetcher, InternetSearchFetcher, LinkedinFetcher, TwitterFetcher};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::EnrichmentConfig;
use crate::errors::Result;
use crate::model::{Candidate, CandidateExternalProfile, ExternalProfileSource, ExternalProfileStatus};
use crate::persistence::PersistenceGateway;

/// Implement this to enrich a candidate's profile from one external source.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    fn source(&self) -> ExternalProfileSource;

    /// Populate `profile`'s source-specific fields from `candidate`. Never
    /// returns `Err` for a not-found/unreachable remote — that's encoded in
    /// `status`/`error_message` on the returned profile.
    async fn enrich(
        &self,
        profile: CandidateExternalProfile,
        candidate: &Candidate,
    ) -> CandidateExternalProfile;
}

/// Dispatches by [`ExternalProfileSource`], built once at startup from
/// [`crate::config::EnrichmentConfig`].
pub struct FetcherRegistry {
    fetchers: HashMap<ExternalProfileSource, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new(cfg: &EnrichmentConfig) -> Self {
        let mut fetchers: HashMap<ExternalProfileSource, Arc<dyn Fetcher>> = HashMap::new();
        fetchers.insert(
            ExternalProfileSource::Github,
            Arc::new(GithubFetcher::new(cfg.github_token.clone())),
        );
        fetchers.insert(ExternalProfileSource::Linkedin, Arc::new(LinkedinFetcher));
        fetchers.insert(ExternalProfileSource::Twitter, Arc::new(TwitterFetcher));
        fetchers.insert(
            ExternalProfileSource::InternetSearch,
            Arc::new(InternetSearchFetcher::new(cfg.tavily_api_key.clone())),
        );
        Self { fetchers }
    }

    pub fn get(&self, source: ExternalProfileSource) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(&source).cloned()
    }
}

/// Wraps [`PersistenceGateway`] + [`FetcherRegistry`] with the staleness
/// policy used by the matching engine's first three steps.
pub struct EnrichmentStore {
    persistence: Arc<dyn PersistenceGateway>,
    registry: FetcherRegistry,
    staleness_ttl: chrono::Duration,
}

impl EnrichmentStore {
    pub fn new(persistence: Arc<dyn PersistenceGateway>, cfg: &EnrichmentConfig) -> Self {
        Self {
            persistence,
            registry: FetcherRegistry::new(cfg),
            staleness_ttl: chrono::Duration::days(cfg.staleness_ttl_days),
        }
    }

    pub async fn profiles(&self, candidate_id: Uuid) -> Result<Vec<CandidateExternalProfile>> {
        self.persistence.get_external_profiles(candidate_id).await
    }

    /// Fetch-and-upsert `source` for `candidate` regardless of current
    /// staleness (used when the caller has already decided a refresh is
    /// needed).
    pub async fn refresh(
        &self,
        candidate: &Candidate,
        source: ExternalProfileSource,
        existing: Option<CandidateExternalProfile>,
    ) -> Result<CandidateExternalProfile> {
        let base = existing.unwrap_or_else(|| blank_profile(candidate.id, source));
        let Some(fetcher) = self.registry.get(source) else {
            return Ok(base);
        };
        let enriched = fetcher.enrich(base, candidate).await;
        self.persistence.upsert_external_profile(enriched).await
    }

    /// True if `profile` is absent or stale per `staleness_ttl`.
    pub fn needs_refresh(&self, profile: Option<&CandidateExternalProfile>) -> bool {
        match profile {
            None => true,
            Some(p) if p.status != ExternalProfileStatus::Success => true,
            Some(p) => p.is_stale(self.staleness_ttl, Utc::now()),
        }
    }
}

fn blank_profile(candidate_id: Uuid, source: ExternalProfileSource) -> CandidateExternalProfile {
    CandidateExternalProfile {
        id: Uuid::new_v4(),
        candidate_id,
        source,
        profile_url: None,
        display_name: None,
        bio: None,
        enriched_summary: None,
        status: ExternalProfileStatus::Pending,
        last_fetched_at: None,
        error_message: None,
        followers_count: None,
        public_repos: None,
        location: None,
    }
}
