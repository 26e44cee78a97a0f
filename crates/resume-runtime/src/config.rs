//! Runtime configuration.
//!
//! One `RuntimeConfig` built once at startup from defaults, overlaid with a
//! TOML file, overlaid with environment variables (env wins).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RuntimeError};

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_batch_size() -> usize {
    5
}
fn default_thread_pool_size() -> usize {
    5
}
fn default_stale_threshold() -> Duration {
    Duration::from_secs(600)
}
fn default_cleanup_cron() -> String {
    // `cron::Schedule` expects sec/min/hour/dom/month/dow (6 fields, 7 with
    // an optional year), not the 5-field unix form — "0 0 2 * * *" is
    // 02:00:00 daily.
    "0 0 2 * * *".to_string()
}
fn default_retention_days() -> u32 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(300)
}
fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}
fn default_allowed_extensions() -> Vec<String> {
    vec![
        ".pdf".to_string(),
        ".doc".to_string(),
        ".docx".to_string(),
        ".zip".to_string(),
    ]
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_chat_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_embed_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_embed_batch_size() -> usize {
    10
}
fn default_staleness_ttl_days() -> i64 {
    7
}
fn default_true() -> bool {
    true
}
fn default_borderline_min() -> f64 {
    50.0
}
fn default_borderline_max() -> f64 {
    75.0
}
fn default_estimated_tokens() -> u64 {
    1500
}
fn default_max_pending() -> u64 {
    10_000
}

/// `scheduler.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default = "default_stale_threshold", with = "duration_secs")]
    pub stale_threshold: Duration,
    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_max_pending")]
    pub max_pending: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: default_poll_interval(),
            batch_size: default_batch_size(),
            thread_pool_size: default_thread_pool_size(),
            stale_threshold: default_stale_threshold(),
            cleanup_cron: default_cleanup_cron(),
            retention_days: default_retention_days(),
            max_pending: default_max_pending(),
        }
    }
}

/// `queue.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,
    #[serde(default)]
    pub exponential_backoff: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            exponential_backoff: false,
        }
    }
}

/// `upload.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: default_allowed_extensions(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// `llm.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chat_timeout", with = "duration_secs")]
    pub chat_timeout: Duration,
    #[serde(default = "default_embed_timeout", with = "duration_secs")]
    pub embed_timeout: Duration,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            chat_model: String::new(),
            embedding_model: String::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            chat_timeout: default_chat_timeout(),
            embed_timeout: default_embed_timeout(),
            api_key: None,
        }
    }
}

/// `embeddings.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_embed_batch_size(),
        }
    }
}

/// `enrichment.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_staleness_ttl_days")]
    pub staleness_ttl_days: i64,
    #[serde(default)]
    pub source_selection_enabled: bool,
    #[serde(default = "default_true")]
    pub multi_pass_enabled: bool,
    #[serde(default = "default_borderline_min")]
    pub multi_pass_borderline_min: f64,
    #[serde(default = "default_borderline_max")]
    pub multi_pass_borderline_max: f64,
    #[serde(default)]
    pub tavily_api_key: String,
    #[serde(default)]
    pub github_token: Option<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            staleness_ttl_days: default_staleness_ttl_days(),
            source_selection_enabled: false,
            multi_pass_enabled: true,
            multi_pass_borderline_min: default_borderline_min(),
            multi_pass_borderline_max: default_borderline_max(),
            tavily_api_key: String::new(),
            github_token: None,
        }
    }
}

/// `audit.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_estimated_tokens")]
    pub estimated_tokens_per_candidate: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            estimated_tokens_per_candidate: default_estimated_tokens(),
        }
    }
}

/// Top-level configuration, composed of the sections above.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    pub database_url: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl RuntimeConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut cfg: RuntimeConfig = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text).map_err(|e| RuntimeError::Config(e.to_string()))?
            }
            None => return Err(RuntimeError::Config("no config file provided".into())),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(v) = std::env::var("SCHEDULER_ENABLED") {
            self.scheduler.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("TAVILY_API_KEY") {
            self.enrichment.tavily_api_key = v;
        }
        if let Ok(v) = std::env::var("GITHUB_TOKEN") {
            self.enrichment.github_token = Some(v);
        }
    }

    /// Fail-fast validation. Never called at job time, only at startup.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(RuntimeError::Config("database_url must not be empty".into()));
        }
        if self.llm.base_url.is_empty() {
            return Err(RuntimeError::Config("llm.base_url must not be empty".into()));
        }
        if self.scheduler.thread_pool_size == 0 {
            return Err(RuntimeError::Config(
                "scheduler.thread_pool_size must be > 0".into(),
            ));
        }
        if self.scheduler.batch_size == 0 {
            return Err(RuntimeError::Config("scheduler.batch_size must be > 0".into()));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.stale_threshold, Duration::from_secs(600));
        assert_eq!(cfg.cleanup_cron, "0 0 2 * * *");

        let q = QueueConfig::default();
        assert_eq!(q.max_retries, 3);
        assert_eq!(q.retry_delay, Duration::from_secs(300));

        let e = EmbeddingsConfig::default();
        assert_eq!(e.chunk_size, 1000);
        assert_eq!(e.chunk_overlap, 200);
        assert_eq!(e.batch_size, 10);

        let en = EnrichmentConfig::default();
        assert_eq!(en.staleness_ttl_days, 7);
        assert!(!en.source_selection_enabled);
        assert!(en.multi_pass_enabled);
        assert_eq!(en.multi_pass_borderline_min, 50.0);
        assert_eq!(en.multi_pass_borderline_max, 75.0);

        assert_eq!(AuditConfig::default().estimated_tokens_per_candidate, 1500);
    }

    #[test]
    fn validate_rejects_empty_database_url() {
        let cfg = RuntimeConfig {
            database_url: String::new(),
            llm: LlmConfig {
                base_url: "http://localhost:11434".into(),
                chat_model: "m".into(),
                embedding_model: "e".into(),
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                chat_timeout: default_chat_timeout(),
                embed_timeout: default_embed_timeout(),
                api_key: None,
            },
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
