//! Match decision and external-only detection for one listing.

use crate::backend::{Backend, BackendError};
use crate::dom;
use crate::llm::{Evaluator, MatchResult, prompts::truncate};
use crate::site::SiteProfile;
use autoapply_common::model::{ApplicantProfile, JobListing};
use autoapply_common::protocol::{ExecutionContext, NavigateOptions, WaitUntil};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const EXTERNAL_ONLY: &str = "External application only";

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Proceed(MatchResult),
    Skip { result: MatchResult, reason: String },
}

/// Proceed iff the model says apply and the score reaches the threshold.
pub fn decide(result: MatchResult, min_score: u8) -> MatchDecision {
    if result.should_apply && result.score >= min_score {
        MatchDecision::Proceed(result)
    } else {
        let reason = format!("Match score {}/100: {}", result.score, result.reason);
        MatchDecision::Skip { result, reason }
    }
}

/// Open the listing and read its description. Any failure yields an empty
/// excerpt.
pub async fn read_description<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    job: &JobListing,
    timeout: Duration,
    max_chars: usize,
) -> String {
    match try_read_description(backend, site, job, timeout).await {
        Ok(text) => truncate(text.trim(), max_chars).to_string(),
        Err(e) => {
            warn!("Could not read description for {}: {}", job.label(), e);
            String::new()
        }
    }
}

async fn try_read_description<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    job: &JobListing,
    timeout: Duration,
) -> Result<String, BackendError> {
    let tab = backend.primary_tab()?;
    backend
        .navigate(
            &job.url,
            NavigateOptions::new(WaitUntil::DomContentLoaded, timeout),
        )
        .await?;
    let text = dom::read_text(
        backend,
        &ExecutionContext::Tab(tab),
        site.description_selectors,
    )
    .await?;
    Ok(text.unwrap_or_default())
}

/// Score the listing; an unreachable model yields the neutral result.
pub async fn evaluate(
    evaluator: &dyn Evaluator,
    profile: &ApplicantProfile,
    job: &JobListing,
    description: &str,
    min_score: u8,
) -> MatchDecision {
    let result = match evaluator.evaluate_match(profile, job, description).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Match evaluation failed for {}: {}", job.label(), e);
            MatchResult::neutral()
        }
    };
    info!(
        "Match score for {}: {} ({})",
        job.label(),
        result.score,
        result.reason
    );
    decide(result, min_score)
}

/// An external-only listing shows an external indicator on a visible control,
/// or its apply container links off-site in a new window. Reads the page
/// currently open in the primary tab.
pub async fn is_external<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
) -> Result<bool, BackendError> {
    let context = ExecutionContext::Tab(backend.primary_tab()?);

    let controls = dom::query(backend, &context, site.external_candidates).await?;
    if let Some(hit) = dom::match_text(&controls, site.external_phrases, &[]) {
        debug!("External indicator: {}", dom::label_of(hit));
        return Ok(true);
    }

    let links = dom::query(backend, &context, site.external_link_selectors).await?;
    let off_site = links.iter().any(|link| {
        link.attr("href")
            .and_then(|href| site.resolve(href))
            .is_some_and(|href| !site.is_on_site(&href))
    });
    if off_site {
        debug!("Apply container links off-site");
    }
    Ok(off_site)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: u8, should_apply: bool) -> MatchResult {
        MatchResult {
            score,
            should_apply,
            reason: "skills overlap".into(),
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(matches!(decide(result(60, true), 60), MatchDecision::Proceed(_)));
        match decide(result(59, true), 60) {
            MatchDecision::Skip { reason, result } => {
                assert_eq!(reason, "Match score 59/100: skills overlap");
                assert_eq!(result.score, 59);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn model_veto_wins_over_score() {
        assert!(matches!(
            decide(result(95, false), 50),
            MatchDecision::Skip { .. }
        ));
    }

    #[test]
    fn neutral_result_passes_default_threshold() {
        assert!(matches!(
            decide(MatchResult::neutral(), 50),
            MatchDecision::Proceed(_)
        ));
        assert!(matches!(
            decide(MatchResult::neutral(), 51),
            MatchDecision::Skip { .. }
        ));
    }
}
