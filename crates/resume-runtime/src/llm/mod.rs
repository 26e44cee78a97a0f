//! LLM Gateway (C2).
//!
//! HTTP client to an OpenAI-compatible server. Kept as a direct
//! `reqwest`-based client rather than a higher-level SDK because the
//! response parsing contract (balanced-brace extraction, array-or-string
//! coercion) needs the raw `choices[0].message.content` string, not a
//! pre-parsed struct.

mod parsing;

pub use parsing::{extract_json_object, StringOrArray};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::errors::{Result, RuntimeError};
use crate::model::ExternalProfileSource;

/// A chat message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Usage block from a chat completion. `completion_tokens` is tolerated as
/// absent — some OpenAI-compatible servers omit it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Structured extraction result from `analyzeResume`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateExtract {
    pub name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub experience_summary: Option<String>,
    #[serde(default)]
    pub skills: Option<StringOrArray>,
    #[serde(default)]
    pub domain_knowledge: Option<StringOrArray>,
    #[serde(default)]
    pub academic_background: Option<StringOrArray>,
    pub years_of_experience: Option<i32>,
}

/// Result of `matchCandidate`.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchScores {
    pub match_score: f64,
    pub skills_score: f64,
    pub experience_score: f64,
    pub education_score: f64,
    pub domain_score: f64,
    pub match_explanation: Option<String>,
}

/// Result of `selectEnrichmentSources`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSelection {
    pub sources: Vec<ExternalProfileSource>,
    pub reasoning: Option<String>,
}

impl SourceSelection {
    pub fn fallback() -> Self {
        Self {
            sources: vec![ExternalProfileSource::InternetSearch],
            reasoning: None,
        }
    }
}

/// The LLM Gateway.
pub struct LlmGateway {
    client: reqwest::Client,
    cfg: LlmConfig,
}

impl LlmGateway {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(RuntimeError::Http)?;
        Ok(Self { client, cfg })
    }

    async fn chat_raw(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<(String, TokenUsage)> {
        let body = serde_json::json!({
            "model": self.cfg.chat_model,
            "messages": messages,
            "temperature": temperature.clamp(0.0, 2.0),
            "max_tokens": max_tokens,
        });

        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.cfg.base_url.trim_end_matches('/')))
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            RuntimeError::LlmUnavailable(format!("chat request failed: {e}"))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(RuntimeError::LlmUnavailable(format!(
                "chat endpoint returned {status}"
            )));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| RuntimeError::LlmUnavailable(format!("invalid chat response body: {e}")))?;

        let content = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| RuntimeError::LlmFormatError("missing choices[0].message.content".into()))?
            .to_string();

        let usage = value
            .get("usage")
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok())
            .unwrap_or_default();

        Ok((content, usage))
    }

    /// `analyzeResume(text) → CandidateExtract`.
    pub async fn analyze_resume(&self, text: &str) -> Result<CandidateExtract> {
        let messages = vec![
            ChatMessage::system(
                "You are a resume parser. Extract structured candidate data as a single JSON object \
                 with keys: name, email, mobile, experienceSummary, skills, domainKnowledge, \
                 academicBackground, yearsOfExperience. Respond with JSON only.",
            ),
            ChatMessage::user(text),
        ];
        let (content, _usage) = self
            .chat_raw(messages, self.cfg.temperature, self.cfg.max_tokens, self.cfg.chat_timeout)
            .await?;
        let obj = extract_json_object(&content)
            .ok_or_else(|| RuntimeError::LlmFormatError("no balanced JSON object in response".into()))?;
        serde_json::from_str(&obj).map_err(|e| RuntimeError::LlmFormatError(e.to_string()))
    }

    /// `matchCandidate(candidate, job, enrichedContext) → MatchScores`.
    pub async fn match_candidate(
        &self,
        candidate_summary: &str,
        job_summary: &str,
        enriched_context: Option<&str>,
    ) -> Result<MatchScores> {
        let mut prompt = format!(
            "Candidate:\n{candidate_summary}\n\nJob requirement:\n{job_summary}\n"
        );
        if let Some(ctx) = enriched_context {
            prompt.push_str(&format!("\nAdditional external context:\n{ctx}\n"));
        }
        prompt.push_str(
            "\nScore this candidate against the job on a 0-100 scale overall and per \
             dimension (skills, experience, education, domain). Respond with a single JSON \
             object: matchScore, skillsScore, experienceScore, educationScore, domainScore, \
             matchExplanation.",
        );
        let messages = vec![ChatMessage::user(prompt)];
        let (content, _usage) = self
            .chat_raw(messages, self.cfg.temperature, self.cfg.max_tokens, self.cfg.chat_timeout)
            .await?;
        let obj = extract_json_object(&content)
            .ok_or_else(|| RuntimeError::LlmFormatError("no balanced JSON object in response".into()))?;
        serde_json::from_str(&obj).map_err(|e| RuntimeError::LlmFormatError(e.to_string()))
    }

    /// `selectEnrichmentSources(candidate, job) → {sources, reasoning}`.
    /// Runs at temperature 0.1 with a 300-token cap; on parse failure falls
    /// back to `[INTERNET_SEARCH]` rather than erroring.
    pub async fn select_enrichment_sources(
        &self,
        candidate_summary: &str,
        job_summary: &str,
    ) -> SourceSelection {
        let prompt = format!(
            "Candidate:\n{candidate_summary}\n\nJob:\n{job_summary}\n\n\
             Which external sources should be consulted to enrich this candidate's profile? \
             Choose from GITHUB, LINKEDIN, TWITTER, INTERNET_SEARCH. Respond with a single \
             JSON object: sources (array of the enum values above), reasoning (short string)."
        );
        let messages = vec![ChatMessage::user(prompt)];
        let result = self
            .chat_raw(messages, 0.1, 300, self.cfg.chat_timeout)
            .await
            .ok()
            .and_then(|(content, _)| extract_json_object(&content))
            .and_then(|obj| serde_json::from_str::<SourceSelection>(&obj).ok());
        result.unwrap_or_else(SourceSelection::fallback)
    }

    /// `embed(text) → float[]`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        batch
            .pop()
            .ok_or_else(|| RuntimeError::LlmFormatError("empty embedding response".into()))
    }

    /// `embedBatch(texts) → float[][]`. On a refused batch request or a
    /// response whose `data` array length doesn't match the input, falls
    /// back to one call per text.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.embed_batch_once(texts).await {
            Ok(v) if v.len() == texts.len() => Ok(v),
            _ => {
                let mut out = Vec::with_capacity(texts.len());
                for t in texts {
                    let v = self.embed_batch_once(std::slice::from_ref(t)).await?;
                    let item = v
                        .into_iter()
                        .next()
                        .ok_or_else(|| RuntimeError::LlmFormatError("empty embedding item".into()))?;
                    out.push(item);
                }
                Ok(out)
            }
        }
    }

    async fn embed_batch_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.cfg.embedding_model,
            "input": texts,
        });
        let mut req = self
            .client
            .post(format!("{}/v1/embeddings", self.cfg.base_url.trim_end_matches('/')))
            .timeout(self.cfg.embed_timeout)
            .json(&body);
        if let Some(key) = &self.cfg.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RuntimeError::LlmUnavailable(format!("embed request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(RuntimeError::LlmUnavailable(format!(
                "embeddings endpoint returned {status}"
            )));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| RuntimeError::LlmUnavailable(format!("invalid embeddings response body: {e}")))?;

        let data = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| RuntimeError::LlmFormatError("missing data array".into()))?;

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| RuntimeError::LlmFormatError("missing embedding field".into()))?;
            let vec: Vec<f32> = embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            out.push(vec);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LlmConfig {
        LlmConfig {
            base_url: "http://localhost:11434".into(),
            chat_model: "m".into(),
            embedding_model: "e".into(),
            max_tokens: 4000,
            temperature: 0.7,
            chat_timeout: Duration::from_secs(120),
            embed_timeout: Duration::from_secs(60),
            api_key: None,
        }
    }

    #[test]
    fn gateway_constructs() {
        assert!(LlmGateway::new(cfg()).is_ok());
    }

    #[test]
    fn source_selection_fallback_is_internet_search() {
        let s = SourceSelection::fallback();
        assert_eq!(s.sources, vec![ExternalProfileSource::InternetSearch]);
    }
}
