//! Locate the DOM surface hosting the application form.

use crate::backend::{Backend, BackendError};
use crate::dom;
use crate::site::SiteProfile;
use autoapply_common::protocol::{ElementInfo, ExecutionContext, FrameInfo};
use tracing::debug;
use url::Url;

const CONTAINER_MIN_HEIGHT: f64 = 50.0;
const FORM_MIN_HEIGHT: f64 = 80.0;
const FORM_CONTENT: &[&str] = &[
    "form",
    "input:not([type=\"hidden\"])",
    "textarea",
    "select",
    "button[type=\"submit\"]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStrategy {
    /// The active tab is on a dedicated apply URL.
    FullPageUrl,
    /// Apply container, form or flow button rendered in the active tab.
    PageStructure,
    /// A tab opened by the apply click.
    NewTab,
    /// An iframe recognised by its attributes.
    NamedIframe,
    /// Any child frame with form content.
    FrameScan,
}

impl ContextStrategy {
    pub const ORDER: [ContextStrategy; 5] = [
        ContextStrategy::FullPageUrl,
        ContextStrategy::PageStructure,
        ContextStrategy::NewTab,
        ContextStrategy::NamedIframe,
        ContextStrategy::FrameScan,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormContext {
    pub context: ExecutionContext,
    pub strategy: ContextStrategy,
}

/// Everything a resolution attempt needs to know about the tabs.
#[derive(Debug, Clone)]
pub struct TabScope {
    pub active: String,
    /// Tabs that existed before the apply click.
    pub known: Vec<String>,
}

/// One pass over every strategy, in order.
pub async fn resolve<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    scope: &TabScope,
) -> Result<Option<FormContext>, BackendError> {
    for strategy in ContextStrategy::ORDER {
        match try_strategy(backend, site, scope, strategy).await {
            Ok(Some(context)) => {
                debug!("Form context via {:?}: {}", strategy, context);
                return Ok(Some(FormContext { context, strategy }));
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("Strategy {:?} failed: {}", strategy, e),
        }
    }
    Ok(None)
}

async fn try_strategy<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    scope: &TabScope,
    strategy: ContextStrategy,
) -> Result<Option<ExecutionContext>, BackendError> {
    let active = ExecutionContext::Tab(scope.active.clone());
    match strategy {
        ContextStrategy::FullPageUrl => {
            let url = backend.current_url(&scope.active).await?;
            Ok(site.is_full_page_apply(&url).then_some(active))
        }
        ContextStrategy::PageStructure => {
            Ok(has_form_structure(backend, &active, site).await?.then_some(active))
        }
        ContextStrategy::NewTab => {
            let tabs = backend.tabs().await?;
            let opened = tabs.into_iter().find(|t| {
                t.id != scope.active && !scope.known.contains(&t.id) && site.is_on_site(&t.url)
            });
            let Some(tab) = opened else {
                return Ok(None);
            };
            let context = ExecutionContext::Tab(tab.id.clone());
            let hosts_form = site.is_full_page_apply(&tab.url)
                || has_form_structure(backend, &context, site).await?;
            Ok(hosts_form.then_some(context))
        }
        ContextStrategy::NamedIframe => {
            let iframes = dom::query(backend, &active, site.apply_iframes).await?;
            if iframes.is_empty() {
                return Ok(None);
            }
            let page_url = backend.current_url(&scope.active).await?;
            let frames = child_frames(backend, &scope.active).await?;
            Ok(iframes
                .iter()
                .find_map(|el| frame_for_iframe(el, &frames, &page_url))
                .map(|frame| ExecutionContext::Frame {
                    tab: scope.active.clone(),
                    frame: frame.id.clone(),
                }))
        }
        ContextStrategy::FrameScan => {
            for frame in child_frames(backend, &scope.active).await? {
                let context = ExecutionContext::Frame {
                    tab: scope.active.clone(),
                    frame: frame.id.clone(),
                };
                match dom::query(backend, &context, FORM_CONTENT).await {
                    Ok(found) if !found.is_empty() => return Ok(Some(context)),
                    Ok(_) => {}
                    Err(e) => debug!("Frame {} unreadable: {}", frame.url, e),
                }
            }
            Ok(None)
        }
    }
}

/// Container taller than 50px, a form taller than 80px with inputs or a
/// button, or a visible apply-flow button.
pub async fn has_form_structure<B: Backend + ?Sized>(
    backend: &mut B,
    context: &ExecutionContext,
    site: &SiteProfile,
) -> Result<bool, BackendError> {
    let containers = dom::query(backend, context, site.form_containers).await?;
    if containers.iter().any(|c| c.rect.height > CONTAINER_MIN_HEIGHT) {
        return Ok(true);
    }
    let forms = dom::query(backend, context, site.form_selectors).await?;
    if forms
        .iter()
        .any(|f| f.rect.height > FORM_MIN_HEIGHT && (f.has_inputs || f.has_button))
    {
        return Ok(true);
    }
    let buttons = dom::query(backend, context, site.action_candidates).await?;
    Ok(dom::match_text(&buttons, site.action_texts, &[]).is_some())
}

/// Every frame below the main frame, nested ones included.
pub async fn child_frames<B: Backend + ?Sized>(
    backend: &mut B,
    tab: &str,
) -> Result<Vec<FrameInfo>, BackendError> {
    Ok(backend
        .frames(tab)
        .await?
        .into_iter()
        .filter(|f| !f.is_main)
        .collect())
}

/// Match an iframe element to its frame by name, then by source URL.
fn frame_for_iframe<'a>(
    iframe: &ElementInfo,
    frames: &'a [FrameInfo],
    page_url: &str,
) -> Option<&'a FrameInfo> {
    if let Some(name) = iframe.attr("name").filter(|n| !n.is_empty())
        && let Some(frame) = frames.iter().find(|f| f.name.as_deref() == Some(name))
    {
        return Some(frame);
    }
    let src = iframe.attr("src").filter(|s| !s.is_empty())?;
    let resolved = Url::parse(page_url)
        .and_then(|base| base.join(src))
        .map(String::from)
        .unwrap_or_else(|_| src.to_string());
    frames
        .iter()
        .find(|f| f.url == resolved || f.url.starts_with(&resolved))
}

/// Debug-level dump of what the page does contain, for failed resolutions.
pub async fn log_diagnostics<B: Backend + ?Sized>(backend: &mut B, tab: &str) {
    let context = ExecutionContext::Tab(tab.to_string());
    let url = backend.current_url(tab).await.unwrap_or_default();
    let iframes = dom::query(backend, &context, &["iframe"])
        .await
        .unwrap_or_default();
    let dialogs = dom::query(
        backend,
        &context,
        &["[role=\"dialog\"]", ".icl-Modal", "[class*=\"modal\"]", "[class*=\"Modal\"]"],
    )
    .await
    .unwrap_or_default();
    debug!("Form detection failed on {}", url);
    for iframe in &iframes {
        debug!(
            "  iframe id={:?} name={:?} src={:?} title={:?} {}x{}",
            iframe.attr("id"),
            iframe.attr("name"),
            iframe.attr("src").map(|s| s.chars().take(100).collect::<String>()),
            iframe.attr("title"),
            iframe.rect.width,
            iframe.rect.height
        );
    }
    for dialog in &dialogs {
        debug!(
            "  dialog <{}> class={:?} height={}",
            dialog.tag,
            dialog.attr("class"),
            dialog.rect.height
        );
    }
}
