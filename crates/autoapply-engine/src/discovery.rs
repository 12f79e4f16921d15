//! Search result extraction and URL-identity deduplication.

use crate::backend::{Backend, BackendError};
use crate::config::{DiscoveryConfig, TimingConfig};
use crate::dom;
use crate::site::SiteProfile;
use autoapply_common::model::{JobListing, SearchParams};
use autoapply_common::protocol::{ExecutionContext, NavigateOptions, RawCard, ScrollRequest, WaitUntil};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

/// Stable identity of a listing URL: the job-id query parameter when
/// present, else the path without trailing slash. Unparseable input is used
/// trimmed as-is.
pub fn job_identity(raw: &str, id_param: &str) -> String {
    let trimmed = raw.trim();
    let Ok(url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if let Some((_, id)) = url
        .query_pairs()
        .find(|(key, value)| key == id_param && !value.is_empty())
    {
        return id.into_owned();
    }
    let path = url.path().trim_end_matches('/');
    if path.is_empty() { "/".to_string() } else { path.to_string() }
}

/// First occurrence wins; order is preserved.
pub fn dedupe(jobs: Vec<JobListing>, id_param: &str) -> Vec<JobListing> {
    let mut seen = HashSet::new();
    jobs.into_iter()
        .filter(|job| seen.insert(job_identity(&job.url, id_param)))
        .collect()
}

/// Cards without title, company or link are dropped.
pub fn listing_from_card(card: RawCard, site: &SiteProfile) -> Option<JobListing> {
    let title = card.title.filter(|t| !t.is_empty())?;
    let company = card.company.filter(|c| !c.is_empty())?;
    let url = site.resolve(card.href.as_deref().filter(|h| !h.is_empty())?)?;
    Some(JobListing {
        title,
        company,
        location: card.location.unwrap_or_default(),
        url,
        salary: card.salary,
        snippet: card.snippet,
        easy_apply: card.easy_apply,
    })
}

/// Search, scroll, extract and deduplicate. A second page is fetched when the
/// first one is thin; its failure is tolerated.
pub async fn discover<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    discovery: &DiscoveryConfig,
    timing: &TimingConfig,
    search: &SearchParams,
) -> Result<Vec<JobListing>, BackendError> {
    let mut raw = search_page(backend, site, discovery, timing, search, None).await?;
    if raw.len() < discovery.min_results {
        info!(
            "First page returned {} listings, fetching the next page",
            raw.len()
        );
        match search_page(backend, site, discovery, timing, search, Some(discovery.page_size)).await {
            Ok(more) => raw.extend(more),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Second results page failed: {}", e),
        }
    }

    let raw_count = raw.len();
    let unique = dedupe(raw, site.job_id_param);
    info!("Found {} raw -> {} unique jobs", raw_count, unique.len());
    Ok(unique)
}

async fn search_page<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    discovery: &DiscoveryConfig,
    timing: &TimingConfig,
    search: &SearchParams,
    start: Option<u32>,
) -> Result<Vec<JobListing>, BackendError> {
    let url = site
        .search_url(
            &search.query,
            &search.location,
            search.job_type.as_deref(),
            start,
        )
        .map_err(|e| BackendError::Navigation(e.to_string()))?;
    let tab = backend.primary_tab()?;
    let context = ExecutionContext::Tab(tab.clone());

    debug!("Searching {}", url);
    backend
        .navigate(
            url.as_str(),
            NavigateOptions::new(WaitUntil::DomContentLoaded, timing.navigation_timeout()),
        )
        .await?;
    if let Err(e) = backend
        .wait_for_network_idle(&tab, timing.network_idle(), timing.network_idle_timeout())
        .await
    {
        debug!("Network idle wait failed: {}", e);
    }

    dom::scroll(
        backend,
        &context,
        ScrollRequest {
            into_view: vec![],
            steps: discovery.scroll_steps,
            delta_y: discovery.scroll_delta,
            pause_ms: discovery.scroll_pause_ms,
        },
    )
    .await?;

    let cards = dom::cards(backend, &context, site.card_request()).await?;
    let total = cards.len();
    let listings: Vec<JobListing> = cards
        .into_iter()
        .filter_map(|card| listing_from_card(card, site))
        .collect();
    debug!("Extracted {} of {} cards", listings.len(), total);
    Ok(listings)
}
