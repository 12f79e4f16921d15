use crate::backend::{Backend, BackendError};
use crate::dom;
use crate::site::SiteProfile;
use autoapply_common::protocol::{ElementInfo, ExecutionContext, ScrollRequest};
use tracing::debug;

/// Priority CSS hit first, then a text match over generic candidates.
async fn locate<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    selectors: &[&str],
    candidates: &[&str],
    texts: &[&str],
    skip: &[&str],
) -> Result<Option<ElementInfo>, BackendError> {
    let hits = dom::query(backend, context, selectors).await?;
    if let Some(hit) = hits
        .into_iter()
        .find(|el| el.is_rendered() && !dom::is_skipped(el, skip))
    {
        return Ok(Some(hit));
    }
    let candidates = dom::query(backend, context, candidates).await?;
    Ok(dom::match_text(&candidates, texts, skip).cloned())
}

pub async fn find_apply_control<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    site: &SiteProfile,
) -> Result<Option<ElementInfo>, BackendError> {
    let reveal = ScrollRequest {
        into_view: site.apply_area.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    if let Err(e) = dom::scroll(backend, context, reveal).await {
        debug!("Could not scroll apply area into view: {}", e);
    }
    locate(
        backend,
        context,
        site.apply_selectors,
        site.apply_candidates,
        site.apply_texts,
        site.apply_skip_texts,
    )
    .await
}

pub async fn find_next_control<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    site: &SiteProfile,
) -> Result<Option<ElementInfo>, BackendError> {
    locate(
        backend,
        context,
        site.next_selectors,
        site.next_candidates,
        site.next_texts,
        site.next_skip_texts,
    )
    .await
}

/// The control reads like a final submission.
pub fn is_submit(control: &ElementInfo, site: &SiteProfile) -> bool {
    let label = dom::label_of(control);
    site.submit_texts.iter().any(|t| label.contains(t))
}
