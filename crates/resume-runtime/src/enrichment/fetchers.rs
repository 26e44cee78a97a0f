//! The four external-profile fetchers: GitHub, LinkedIn, Twitter, and a
//! general internet-search fallback.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::Fetcher;
use crate::model::{Candidate, CandidateExternalProfile, ExternalProfileSource, ExternalProfileStatus};

fn now_success(mut profile: CandidateExternalProfile, summary: String) -> CandidateExternalProfile {
    profile.status = ExternalProfileStatus::Success;
    profile.last_fetched_at = Some(Utc::now());
    profile.enriched_summary = Some(summary);
    profile.error_message = None;
    profile
}

fn not_found(mut profile: CandidateExternalProfile, reason: &str) -> CandidateExternalProfile {
    profile.status = ExternalProfileStatus::NotFound;
    profile.last_fetched_at = Some(Utc::now());
    profile.error_message = Some(reason.to_string());
    profile
}

fn failed(mut profile: CandidateExternalProfile, reason: String) -> CandidateExternalProfile {
    profile.status = ExternalProfileStatus::Failed;
    profile.last_fetched_at = Some(Utc::now());
    profile.error_message = Some(reason);
    profile
}

fn github_username(profile: &CandidateExternalProfile) -> Option<String> {
    let url = profile.profile_url.as_ref()?;
    url.trim_end_matches('/').rsplit('/').next().map(str::to_string)
}

/// `GET /users/{u}` and `GET /users/{u}/repos?sort=stars`.
pub struct GithubFetcher {
    client: reqwest::Client,
    token: Option<String>,
}

impl GithubFetcher {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("resume-intelligence-engine")
                .build()
                .unwrap_or_default(),
            token,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    bio: Option<String>,
    followers: Option<i32>,
    public_repos: Option<i32>,
    location: Option<String>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubRepo {
    name: String,
    stargazers_count: Option<i64>,
    language: Option<String>,
}

#[async_trait::async_trait]
impl Fetcher for GithubFetcher {
    fn source(&self) -> ExternalProfileSource {
        ExternalProfileSource::Github
    }

    async fn enrich(&self, profile: CandidateExternalProfile, _candidate: &Candidate) -> CandidateExternalProfile {
        let Some(username) = github_username(&profile) else {
            return not_found(profile, "no github username in profile_url");
        };

        let user: GithubUser = match self.request(&format!("https://api.github.com/users/{username}")).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(u) => u,
                Err(e) => return failed(profile, format!("invalid github user response: {e}")),
            },
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                return not_found(profile, "github user not found");
            }
            Ok(resp) => return failed(profile, format!("github returned {}", resp.status())),
            Err(e) => return failed(profile, format!("github request failed: {e}")),
        };

        let repos_resp = self
            .request(&format!("https://api.github.com/users/{username}/repos?sort=stars"))
            .send()
            .await;
        let repos: Vec<GithubRepo> = match repos_resp {
            Ok(resp) if resp.status().is_success() => resp.json().await.unwrap_or_default(),
            _ => Vec::new(),
        };

        let top_repos: Vec<&GithubRepo> = repos.iter().take(3).collect();
        let languages: Vec<&str> = repos.iter().filter_map(|r| r.language.as_deref()).take(5).collect();

        let mut summary = format!("GitHub: {}", user.login);
        if let Some(bio) = &user.bio {
            summary.push_str(&format!(" — {bio}"));
        }
        if !top_repos.is_empty() {
            let names: Vec<&str> = top_repos.iter().map(|r| r.name.as_str()).collect();
            summary.push_str(&format!(". Top repos: {}", names.join(", ")));
        }
        if !languages.is_empty() {
            summary.push_str(&format!(". Languages: {}", languages.join(", ")));
        }

        let mut profile = now_success(profile, summary);
        profile.display_name = Some(user.login);
        profile.bio = user.bio;
        profile.followers_count = user.followers;
        profile.public_repos = user.public_repos;
        profile.location = user.location;
        if profile.profile_url.is_none() {
            profile.profile_url = user.html_url;
        }
        profile
    }
}

/// Scraping is out of scope; synthesises a labeled summary from DB fields.
pub struct LinkedinFetcher;

#[async_trait::async_trait]
impl Fetcher for LinkedinFetcher {
    fn source(&self) -> ExternalProfileSource {
        ExternalProfileSource::Linkedin
    }

    async fn enrich(&self, profile: CandidateExternalProfile, candidate: &Candidate) -> CandidateExternalProfile {
        let summary = synthesize_summary(candidate, "LinkedIn");
        now_success(profile, summary)
    }
}

pub struct TwitterFetcher;

#[async_trait::async_trait]
impl Fetcher for TwitterFetcher {
    fn source(&self) -> ExternalProfileSource {
        ExternalProfileSource::Twitter
    }

    async fn enrich(&self, profile: CandidateExternalProfile, candidate: &Candidate) -> CandidateExternalProfile {
        let summary = synthesize_summary(candidate, "Twitter");
        now_success(profile, summary)
    }
}

fn synthesize_summary(candidate: &Candidate, source_label: &str) -> String {
    let name = candidate.name.as_deref().unwrap_or("this candidate");
    let skills = candidate.skills.as_deref().unwrap_or("no listed skills");
    format!(
        "[synthesised from resume] {name} — skills: {skills}. No {source_label} data was \
         fetched; this summary was generated from the parsed resume."
    )
}

/// Tavily-shaped web search.
pub struct InternetSearchFetcher {
    client: reqwest::Client,
    api_key: String,
}

impl InternetSearchFetcher {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for InternetSearchFetcher {
    fn source(&self) -> ExternalProfileSource {
        ExternalProfileSource::InternetSearch
    }

    async fn enrich(&self, profile: CandidateExternalProfile, candidate: &Candidate) -> CandidateExternalProfile {
        if self.api_key.is_empty() {
            let summary = synthesize_summary(candidate, "the internet");
            return now_success(profile, summary);
        }

        let name = candidate.name.as_deref().unwrap_or("candidate");
        let top_skill = candidate
            .skills
            .as_deref()
            .and_then(|s| s.split(',').next())
            .unwrap_or("professional")
            .trim();
        let query = format!("{name} {top_skill} professional profile");

        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": 5,
            "include_answer": true,
            "search_depth": "basic",
        });

        let resp = match self.client.post("https://api.tavily.com/search").json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "internet search request failed, falling back to synthesis");
                return now_success(profile, synthesize_summary(candidate, "the internet"));
            }
        };

        if !resp.status().is_success() {
            return now_success(profile, synthesize_summary(candidate, "the internet"));
        }

        let value: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return now_success(profile, synthesize_summary(candidate, "the internet")),
        };

        let answer = value.get("answer").and_then(Value::as_str).unwrap_or_default();
        let snippets: Vec<String> = value
            .get("results")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .take(3)
                    .filter_map(|r| r.get("content").and_then(Value::as_str))
                    .map(|s| truncate(s, 300))
                    .collect()
            })
            .unwrap_or_default();

        let mut combined = answer.to_string();
        for s in &snippets {
            combined.push_str(" ");
            combined.push_str(s);
        }

        if combined.trim().len() < 100 {
            return now_success(profile, synthesize_summary(candidate, "the internet"));
        }

        now_success(profile, combined)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_username_from_url() {
        let mut p = blank_for_test();
        p.profile_url = Some("https://github.com/octocat".into());
        assert_eq!(github_username(&p), Some("octocat".into()));
    }

    #[test]
    fn github_username_missing_without_url() {
        let p = blank_for_test();
        assert_eq!(github_username(&p), None);
    }

    #[test]
    fn truncate_respects_max_length() {
        let s = "x".repeat(500);
        assert_eq!(truncate(&s, 300).chars().count(), 300);
    }

    fn blank_for_test() -> CandidateExternalProfile {
        CandidateExternalProfile {
            id: uuid::Uuid::new_v4(),
            candidate_id: uuid::Uuid::new_v4(),
            source: ExternalProfileSource::Github,
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
}
