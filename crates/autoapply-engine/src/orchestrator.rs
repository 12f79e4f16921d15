//! One session, end to end: launch, sign in, discover, then score and apply
//! to each listing until the queue, the cap or the user stops it.

use crate::apply::{ApplyFlow, ApplyRequest};
use crate::backend::{Backend, BackendError};
use crate::config::AutoApplyConfig;
use crate::control::ControlFlags;
use crate::discovery;
use crate::llm::Evaluator;
use crate::matcher::{self, EXTERNAL_ONLY, MatchDecision};
use crate::progress::ProgressEmitter;
use crate::signin::{self, SignInError};
use crate::site::SiteProfile;
use autoapply_common::model::{ApplyLogEntry, JobListing, LogStatus, SessionConfig, SessionStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to launch browser: {0}")]
    Launch(#[source] BackendError),

    #[error("Sign-in failed: {0}")]
    SignIn(#[source] SignInError),

    #[error("Browser connection lost: {0}")]
    Backend(#[from] BackendError),

    #[error("Session cancelled")]
    Cancelled,
}

/// Final status of a run plus the error that ended it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: SessionStatus,
    pub error: Option<String>,
}

/// Everything one run needs. Built by the control plane, consumed on the
/// session's own task.
pub struct SessionRunner {
    pub site: Arc<SiteProfile>,
    pub config: Arc<AutoApplyConfig>,
    pub evaluator: Arc<dyn Evaluator>,
    pub flags: Arc<ControlFlags>,
    pub emitter: ProgressEmitter,
    pub session: SessionConfig,
}

enum Pace {
    AfterApplication,
    AfterError,
    None,
}

impl SessionRunner {
    /// Drive the session to a terminal status. The backend is always closed.
    pub async fn run<B: Backend + ?Sized>(&self, backend: &mut B) -> RunOutcome {
        let result = self.drive(backend).await;
        if let Err(e) = backend.close().await {
            warn!("[{}] Failed to close browser: {}", self.emitter.id(), e);
        }
        match result {
            Ok(()) => RunOutcome {
                status: SessionStatus::Completed,
                error: None,
            },
            Err(SessionError::Cancelled) | Err(SessionError::SignIn(SignInError::Cancelled)) => {
                info!("[{}] Cancelled", self.emitter.id());
                RunOutcome {
                    status: SessionStatus::Cancelled,
                    error: None,
                }
            }
            Err(e) => {
                error!("[{}] {}", self.emitter.id(), e);
                RunOutcome {
                    status: SessionStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn drive<B: Backend + ?Sized>(&self, backend: &mut B) -> Result<(), SessionError> {
        self.emitter.step("Launching browser");
        backend.launch().await.map_err(SessionError::Launch)?;
        if self.flags.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        self.emitter.step("Waiting for sign-in");
        signin::ensure_signed_in(
            backend,
            &self.site,
            &self.config.timing,
            &self.flags,
            &self.session.profile.email,
        )
        .await
        .map_err(SessionError::SignIn)?;

        self.emitter.step("Searching for jobs");
        let jobs = match discovery::discover(
            backend,
            &self.site,
            &self.config.discovery,
            &self.config.timing,
            &self.session.search,
        )
        .await
        {
            Ok(jobs) => jobs,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("[{}] Job search failed: {}", self.emitter.id(), e);
                Vec::new()
            }
        };
        self.emitter.found(jobs.len() as u32);

        for job in &jobs {
            if self.flags.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            if self.flags.is_paused() {
                info!("[{}] Paused", self.emitter.id());
                self.emitter.status(SessionStatus::Paused, None);
                if !self
                    .flags
                    .wait_while_paused(self.config.timing.pause_poll())
                    .await
                {
                    return Err(SessionError::Cancelled);
                }
                self.emitter.status(SessionStatus::Running, None);
                info!("[{}] Resumed", self.emitter.id());
            }
            if self
                .emitter
                .snapshot()
                .is_some_and(|session| session.cap_reached())
            {
                info!(
                    "[{}] Reached the cap of {} applications",
                    self.emitter.id(),
                    self.session.max_applications
                );
                break;
            }

            self.emitter.current_job(Some(job));
            let (entry, pace) = match self.process(backend, job).await {
                Ok(entry) => {
                    let pace = if entry.status == LogStatus::Skipped {
                        Pace::None
                    } else {
                        Pace::AfterApplication
                    };
                    (entry, pace)
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("[{}] Error on {}: {}", self.emitter.id(), job.label(), e);
                    (ApplyLogEntry::failed(job, e.to_string(), None), Pace::AfterError)
                }
            };
            self.emitter.log(entry);

            match pace {
                Pace::AfterApplication => {
                    tokio::time::sleep(self.config.timing.between_applications()).await
                }
                Pace::AfterError => tokio::time::sleep(self.config.timing.after_error()).await,
                Pace::None => {}
            }
        }

        self.emitter.current_job(None);
        Ok(())
    }

    /// Score, filter and apply to one listing.
    async fn process<B: Backend + ?Sized>(
        &self,
        backend: &mut B,
        job: &JobListing,
    ) -> Result<ApplyLogEntry, BackendError> {
        let apply = &self.config.apply;

        self.emitter.step("Reading job description");
        let description = matcher::read_description(
            backend,
            &self.site,
            job,
            apply.description_navigation(),
            apply.description_chars,
        )
        .await;

        self.emitter.step("Evaluating match");
        let result = match matcher::evaluate(
            self.evaluator.as_ref(),
            &self.session.profile,
            job,
            &description,
            self.session.min_match_score,
        )
        .await
        {
            MatchDecision::Proceed(result) => result,
            MatchDecision::Skip { result, reason } => {
                return Ok(ApplyLogEntry::skipped(job, reason, Some(result.score)));
            }
        };
        let score = Some(result.score);

        match matcher::is_external(backend, &self.site).await {
            Ok(true) => return Ok(ApplyLogEntry::skipped(job, EXTERNAL_ONLY, score)),
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("External check failed for {}: {}", job.label(), e),
        }

        let request = ApplyRequest {
            job,
            profile: &self.session.profile,
            description: &description,
            resume: self.session.resume_path.as_deref(),
        };
        let outcome = ApplyFlow::new(
            backend,
            &self.site,
            self.evaluator.as_ref(),
            apply,
            &self.config.timing,
            request,
        )
        .on_state(|state| self.emitter.step(state.label()))
        .run()
        .await?;

        Ok(ApplyLogEntry::finished(
            job,
            outcome.status,
            outcome.questions_found,
            outcome.questions_answered,
            outcome.answers,
            outcome.failure_reason,
            score,
        ))
    }
}
