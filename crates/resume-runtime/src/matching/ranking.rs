//! Context ranking for the matching engine (C9 step 4): weights external
//! profiles by `(source, jobType)` and renders the survivors into one
//! context string, or `None` if nothing is eligible. A small fixed set of
//! sources is weighted by job leaning, ties broken by recency.

use crate::model::{
    CandidateExternalProfile, ExternalProfileSource, ExternalProfileStatus, JobRequirement,
};

/// Source weight table for context ranking, keyed by job leaning.
pub fn source_weight(job: &JobRequirement, source: ExternalProfileSource) -> u8 {
    use ExternalProfileSource::*;

    if job.is_developer_leaning() {
        match source {
            Github => 3,
            Linkedin => 2,
            _ => 1,
        }
    } else if job.is_social_leaning() {
        match source {
            Twitter => 3,
            Linkedin => 2,
            _ => 1,
        }
    } else {
        match source {
            Linkedin => 2,
            _ => 1,
        }
    }
}

/// Ranks `profiles`' `SUCCESS` entries by `source_weight` desc, ties broken
/// by `last_fetched_at` desc, and renders them into one context string.
/// `None` if no profile is `SUCCESS`.
pub fn rank_profiles(job: &JobRequirement, profiles: &[CandidateExternalProfile]) -> Option<String> {
    let mut ranked: Vec<&CandidateExternalProfile> = profiles
        .iter()
        .filter(|p| p.status == ExternalProfileStatus::Success)
        .collect();

    if ranked.is_empty() {
        return None;
    }

    ranked.sort_by(|a, b| {
        let wa = source_weight(job, a.source);
        let wb = source_weight(job, b.source);
        wb.cmp(&wa).then_with(|| b.last_fetched_at.cmp(&a.last_fetched_at))
    });

    Some(ranked.iter().map(|p| render_profile(p)).collect::<Vec<_>>().join("\n\n"))
}

fn render_profile(p: &CandidateExternalProfile) -> String {
    format!(
        "[{}] {}\n{}",
        p.source,
        p.display_name.as_deref().unwrap_or("unknown"),
        p.enriched_summary.as_deref().or(p.bio.as_deref()).unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn job(title: &str, skills: Option<&str>, domain: Option<&str>) -> JobRequirement {
        JobRequirement {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            required_skills: skills.map(String::from),
            min_experience: None,
            max_experience: None,
            required_education: None,
            domain: domain.map(String::from),
            location: None,
            is_active: true,
        }
    }

    fn profile(
        source: ExternalProfileSource,
        status: ExternalProfileStatus,
        fetched_secs_ago: i64,
    ) -> CandidateExternalProfile {
        CandidateExternalProfile {
            id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            source,
            profile_url: None,
            display_name: Some("name".into()),
            bio: None,
            enriched_summary: Some("summary".into()),
            status,
            last_fetched_at: Some(Utc::now() - chrono::Duration::seconds(fetched_secs_ago)),
            error_message: None,
            followers_count: None,
            public_repos: None,
            location: None,
        }
    }

    #[test]
    fn developer_leaning_weights_github_highest() {
        let j = job("Senior Software Engineer", Some("rust, systems"), None);
        assert_eq!(source_weight(&j, ExternalProfileSource::Github), 3);
        assert_eq!(source_weight(&j, ExternalProfileSource::Linkedin), 2);
        assert_eq!(source_weight(&j, ExternalProfileSource::Twitter), 1);
    }

    #[test]
    fn social_leaning_weights_twitter_highest() {
        let j = job("Social Media Manager", None, Some("marketing"));
        assert_eq!(source_weight(&j, ExternalProfileSource::Twitter), 3);
        assert_eq!(source_weight(&j, ExternalProfileSource::Linkedin), 2);
        assert_eq!(source_weight(&j, ExternalProfileSource::Github), 1);
    }

    #[test]
    fn default_weighting_favors_linkedin() {
        let j = job("Office Manager", None, None);
        assert_eq!(source_weight(&j, ExternalProfileSource::Linkedin), 2);
        assert_eq!(source_weight(&j, ExternalProfileSource::Github), 1);
        assert_eq!(source_weight(&j, ExternalProfileSource::Twitter), 1);
    }

    #[test]
    fn no_success_profiles_yields_no_context() {
        let j = job("Engineer", None, None);
        let profiles = vec![profile(ExternalProfileSource::Github, ExternalProfileStatus::Failed, 0)];
        assert!(rank_profiles(&j, &profiles).is_none());
    }

    #[test]
    fn ranks_by_weight_then_recency() {
        let j = job("Software Engineer", None, None);
        let profiles = vec![
            profile(ExternalProfileSource::Linkedin, ExternalProfileStatus::Success, 3600),
            profile(ExternalProfileSource::Github, ExternalProfileStatus::Success, 7200),
        ];
        let ctx = rank_profiles(&j, &profiles).unwrap();
        let github_pos = ctx.find("GITHUB").unwrap();
        let linkedin_pos = ctx.find("LINKEDIN").unwrap();
        assert!(github_pos < linkedin_pos);
    }

    #[test]
    fn ties_break_by_recency_desc() {
        let j = job("Office Manager", None, None);
        let profiles = vec![
            profile(ExternalProfileSource::Github, ExternalProfileStatus::Success, 7200),
            profile(ExternalProfileSource::Twitter, ExternalProfileStatus::Success, 60),
        ];
        // Both weight 1 under default weighting; the more recently fetched wins.
        let ctx = rank_profiles(&j, &profiles).unwrap();
        let twitter_pos = ctx.find("TWITTER").unwrap();
        let github_pos = ctx.find("GITHUB").unwrap();
        assert!(twitter_pos < github_pos);
    }
}
