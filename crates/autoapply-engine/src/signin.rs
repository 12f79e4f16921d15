//! Sign-in gate. Detection uses positive evidence only: an account or avatar
//! affordance that is actually rendered. A missing sign-in button proves
//! nothing. The credential exchange itself is left to a human.

use crate::backend::{Backend, BackendError};
use crate::config::TimingConfig;
use crate::control::ControlFlags;
use crate::dom;
use crate::poll::{PollOutcome, poll_until};
use crate::site::SiteProfile;
use autoapply_common::protocol::{ExecutionContext, NavigateOptions, WaitUntil};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const NAV_READY_WAIT: Duration = Duration::from_secs(5);
const EMAIL_INPUT_WAIT: Duration = Duration::from_secs(8);
const AFFORDANCE_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("Sign-in not completed within {0:?}")]
    TimedOut(Duration),

    #[error("Sign-in wait cancelled")]
    Cancelled,

    #[error("Browser error during sign-in: {0}")]
    Backend(#[from] BackendError),
}

/// Block until the browser profile is signed in to the site.
pub async fn ensure_signed_in<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    timing: &TimingConfig,
    flags: &ControlFlags,
    email: &str,
) -> Result<(), SignInError> {
    let primary = backend.primary_tab()?;
    let home = NavigateOptions::new(WaitUntil::DomContentLoaded, timing.sign_in_navigation());

    if let Err(e) = backend.navigate(&site.home_url(), home).await {
        if e.is_fatal() {
            return Err(e.into());
        }
        warn!("Failed to open site home: {}", e);
    }
    if is_signed_in(backend, &primary, site, NAV_READY_WAIT).await {
        info!("Already signed in");
        return Ok(());
    }

    info!("Not signed in, opening sign-in page");
    if let Err(e) = start_third_party_sign_in(backend, site, timing, email).await {
        if e.is_fatal() {
            return Err(e.into());
        }
        warn!("Assisted sign-in step failed, waiting for manual sign-in: {}", e);
    }

    info!(
        "Waiting up to {:?} for sign-in to complete",
        timing.sign_in_timeout()
    );
    let shared = Mutex::new(&mut *backend);
    let backend_ref = &shared;
    let outcome = poll_until(
        move || async move {
            let mut backend = backend_ref.lock().await;
            signed_in_tab(&mut **backend, site).await.is_some()
        },
        timing.sign_in_poll(),
        timing.sign_in_timeout(),
        flags,
    )
    .await;
    drop(shared);

    match outcome {
        PollOutcome::Satisfied => {
            info!("Sign-in detected");
            focus(backend, &primary).await;
            return Ok(());
        }
        PollOutcome::Cancelled => return Err(SignInError::Cancelled),
        PollOutcome::TimedOut => {}
    }

    // One last look from the home page; some flows land elsewhere.
    if backend.navigate(&site.home_url(), home).await.is_ok()
        && is_signed_in(backend, &primary, site, NAV_READY_WAIT).await
    {
        info!("Sign-in detected on final check");
        focus(backend, &primary).await;
        return Ok(());
    }

    Err(SignInError::TimedOut(timing.sign_in_timeout()))
}

async fn focus<B: Backend + ?Sized>(backend: &mut B, tab: &str) {
    match backend.bring_to_front(tab).await {
        Ok(()) | Err(BackendError::NotSupported(_)) => {}
        Err(e) => debug!("Could not bring tab {} to front: {}", tab, e),
    }
}

/// Positive evidence check on one tab. Never signed in while on the auth page.
pub async fn is_signed_in<B: Backend + ?Sized>(
    backend: &mut B,
    tab: &str,
    site: &SiteProfile,
    nav_wait: Duration,
) -> bool {
    let context = ExecutionContext::Tab(tab.to_string());
    match backend.current_url(tab).await {
        Ok(url) if site.is_sign_in_page(&url) => return false,
        Ok(_) => {}
        Err(e) => {
            debug!("Could not read URL of tab {}: {}", tab, e);
            return false;
        }
    }
    if !nav_wait.is_zero() {
        let _ = backend
            .wait_for_selector(&context, site.nav_ready, nav_wait)
            .await;
    }
    let evidence: Vec<&str> = site
        .account_selectors
        .iter()
        .chain(site.avatar_selectors)
        .copied()
        .collect();
    match dom::first_rendered(backend, &context, &evidence).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            debug!("Sign-in check failed on tab {}: {}", tab, e);
            false
        }
    }
}

/// The primary tab first, then every other tab on the site, skipping any
/// still on the auth page.
async fn signed_in_tab<B: Backend + ?Sized>(backend: &mut B, site: &SiteProfile) -> Option<String> {
    let primary = backend.primary_tab().ok()?;
    let mut tabs = match backend.tabs().await {
        Ok(tabs) => tabs,
        Err(e) => {
            debug!("Could not list tabs: {}", e);
            return None;
        }
    };
    tabs.sort_by_key(|t| t.id != primary);
    for tab in tabs {
        if !site.is_on_site(&tab.url) || site.is_sign_in_page(&tab.url) {
            continue;
        }
        if is_signed_in(backend, &tab.id, site, Duration::ZERO).await {
            return Some(tab.id);
        }
    }
    None
}

/// Open the auth page, press the third-party affordance and pre-fill the
/// email. Everything here is best effort.
async fn start_third_party_sign_in<B: Backend + ?Sized>(
    backend: &mut B,
    site: &SiteProfile,
    timing: &TimingConfig,
    email: &str,
) -> Result<(), BackendError> {
    let primary = backend.primary_tab()?;
    let context = ExecutionContext::Tab(primary.clone());
    backend
        .navigate(
            site.auth_url.as_str(),
            NavigateOptions::new(WaitUntil::NetworkIdle, timing.sign_in_navigation()),
        )
        .await?;

    let before: Vec<String> = backend.tabs().await?.into_iter().map(|t| t.id).collect();

    let control = match dom::first_rendered(backend, &context, site.sign_in_selectors).await? {
        Some(el) => Some(el),
        None => {
            let candidates = dom::query(backend, &context, &["button", "a", "[role=\"button\"]"]).await?;
            dom::match_text(&candidates, site.sign_in_texts, &[]).cloned()
        }
    };
    let Some(control) = control else {
        info!("No third-party sign-in control found, leaving sign-in to the user");
        return Ok(());
    };

    debug!("Clicking sign-in control: {}", dom::label_of(&control));
    dom::click(backend, &context, control.handle).await?;
    tokio::time::sleep(AFFORDANCE_SETTLE).await;

    let tabs = backend.tabs().await?;
    let surface = tabs
        .iter()
        .find(|t| !before.contains(&t.id) && site.is_identity_page(&t.url))
        .map(|t| t.id.clone())
        .or_else(|| {
            tabs.iter()
                .find(|t| t.id == primary && site.is_identity_page(&t.url))
                .map(|t| t.id.clone())
        })
        .or_else(|| {
            tabs.iter()
                .find(|t| site.is_identity_page(&t.url))
                .map(|t| t.id.clone())
        });
    let Some(surface) = surface else {
        info!("Identity provider page not found, leaving sign-in to the user");
        return Ok(());
    };

    focus(backend, &surface).await;
    if email.trim().is_empty() {
        return Ok(());
    }

    let surface_context = ExecutionContext::Tab(surface.clone());
    if !backend
        .wait_for_selector(&surface_context, site.email_input, EMAIL_INPUT_WAIT)
        .await?
    {
        info!("Email field did not appear, leaving sign-in to the user");
        return Ok(());
    }
    if let Some(input) = dom::first_rendered(backend, &surface_context, &[site.email_input]).await? {
        backend
            .type_text(&surface_context, input.handle, email)
            .await?;
        info!("Pre-filled sign-in email");
    }

    match dom::first_rendered(backend, &surface_context, &[site.identifier_next]).await? {
        Some(next) => dom::click(backend, &surface_context, next.handle).await?,
        None => backend.press_key(&surface, "Enter").await?,
    }
    Ok(())
}
