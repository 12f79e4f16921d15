//! Application form state machine.
//!
//! One [`ApplyFlow`] drives a single listing from a fresh navigation through
//! the multi-step form. Each state either yields the next state or a terminal
//! [`ApplyOutcome`]. Only fatal backend errors escape; everything else ends the
//! job with a failure reason.

pub mod context;
pub mod controls;
pub mod fill;
pub mod questions;

use crate::backend::{Backend, BackendError};
use crate::config::{ApplyConfig, TimingConfig};
use crate::dom;
use crate::llm::Evaluator;
use crate::site::SiteProfile;
use autoapply_common::model::{
    AnsweredQuestion, ApplicantProfile, ApplicationQuestion, JobListing, LogStatus,
};
use autoapply_common::protocol::{ExecutionContext, FieldInfo, NavigateOptions, WaitUntil};
use context::{FormContext, TabScope};
use std::path::Path;
use tracing::{debug, info, warn};

pub const NO_APPLY_CONTROL: &str = "No apply button found";
pub const SIGN_IN_REDIRECT: &str = "Redirected to sign-in page";
pub const EXTERNAL_REDIRECT: &str = "Redirected to external site";
pub const NO_FORM: &str = "Could not find application form after clicking Apply";
pub const NOT_CONFIRMED: &str = "Could not confirm application submission";
pub const SUBMIT_UNCONFIRMED: &str = "Submitted but completion was not confirmed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    NavigatingToJob,
    LocatingApplyControl,
    ResolvingFormContext,
    ExtractingQuestions,
    AnsweringQuestions,
    AdvancingStep,
    Finalizing,
}

impl ApplyState {
    pub fn label(self) -> &'static str {
        match self {
            ApplyState::NavigatingToJob => "Opening job page",
            ApplyState::LocatingApplyControl => "Looking for apply button",
            ApplyState::ResolvingFormContext => "Locating application form",
            ApplyState::ExtractingQuestions => "Reading form questions",
            ApplyState::AnsweringQuestions => "Answering questions",
            ApplyState::AdvancingStep => "Advancing form",
            ApplyState::Finalizing => "Confirming submission",
        }
    }
}

/// Result of one apply attempt, ready to become a log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub status: LogStatus,
    pub questions_found: u32,
    pub questions_answered: u32,
    pub answers: Vec<AnsweredQuestion>,
    pub failure_reason: Option<String>,
}

/// What the flow needs to know about the job and the applicant.
pub struct ApplyRequest<'a> {
    pub job: &'a JobListing,
    pub profile: &'a ApplicantProfile,
    pub description: &'a str,
    pub resume: Option<&'a Path>,
}

pub struct ApplyFlow<'a, B: Backend + ?Sized> {
    backend: &'a mut B,
    site: &'a SiteProfile,
    evaluator: &'a dyn Evaluator,
    apply: &'a ApplyConfig,
    timing: &'a TimingConfig,
    request: ApplyRequest<'a>,
    on_state: Box<dyn Fn(ApplyState) + Send + Sync + 'a>,

    primary: String,
    active: String,
    known_tabs: Vec<String>,
    form: Option<FormContext>,
    steps: u32,
    submit_clicked: bool,
    fields: Vec<FieldInfo>,
    pending: Vec<ApplicationQuestion>,
    outcome: ApplyOutcome,
}

enum Step {
    Next(ApplyState),
    Done(LogStatus, Option<String>),
}

impl<'a, B: Backend + ?Sized> ApplyFlow<'a, B> {
    pub fn new(
        backend: &'a mut B,
        site: &'a SiteProfile,
        evaluator: &'a dyn Evaluator,
        apply: &'a ApplyConfig,
        timing: &'a TimingConfig,
        request: ApplyRequest<'a>,
    ) -> Self {
        Self {
            backend,
            site,
            evaluator,
            apply,
            timing,
            request,
            on_state: Box::new(|_| {}),
            primary: String::new(),
            active: String::new(),
            known_tabs: Vec::new(),
            form: None,
            steps: 0,
            submit_clicked: false,
            fields: Vec::new(),
            pending: Vec::new(),
            outcome: ApplyOutcome {
                status: LogStatus::Failed,
                questions_found: 0,
                questions_answered: 0,
                answers: Vec::new(),
                failure_reason: None,
            },
        }
    }

    /// Observe state transitions, e.g. to publish the current step label.
    pub fn on_state(mut self, f: impl Fn(ApplyState) + Send + Sync + 'a) -> Self {
        self.on_state = Box::new(f);
        self
    }

    pub async fn run(mut self) -> Result<ApplyOutcome, BackendError> {
        self.primary = self.backend.primary_tab()?;
        self.active = self.primary.clone();

        let mut state = ApplyState::NavigatingToJob;
        loop {
            debug!("Apply state: {:?}", state);
            (self.on_state)(state);
            let step = match state {
                ApplyState::NavigatingToJob => self.navigate_to_job().await?,
                ApplyState::LocatingApplyControl => self.click_apply().await?,
                ApplyState::ResolvingFormContext => self.resolve_form().await?,
                ApplyState::ExtractingQuestions => self.extract().await?,
                ApplyState::AnsweringQuestions => self.answer().await?,
                ApplyState::AdvancingStep => self.advance().await?,
                ApplyState::Finalizing => self.finalize().await?,
            };
            match step {
                Step::Next(next) => state = next,
                Step::Done(status, reason) => {
                    self.outcome.status = status;
                    self.outcome.failure_reason = reason;
                    return Ok(self.outcome);
                }
            }
        }
    }

    async fn navigate_to_job(&mut self) -> Result<Step, BackendError> {
        let options = NavigateOptions::new(WaitUntil::DomContentLoaded, self.apply.job_navigation());
        if let Err(e) = self.backend.navigate(&self.request.job.url, options).await {
            if e.is_fatal() {
                return Err(e);
            }
            return Ok(failed(format!("Failed to open job page: {}", e)));
        }
        let url = self.backend.current_url(&self.primary).await?;
        if self.site.is_sign_in_page(&url) {
            return Ok(failed(SIGN_IN_REDIRECT));
        }
        Ok(Step::Next(ApplyState::LocatingApplyControl))
    }

    async fn click_apply(&mut self) -> Result<Step, BackendError> {
        let page = ExecutionContext::Tab(self.primary.clone());
        let Some(control) = controls::find_apply_control(self.backend, &page, self.site).await?
        else {
            return Ok(failed(NO_APPLY_CONTROL));
        };
        debug!("Apply control: <{}> {}", control.tag, dom::label_of(&control));

        self.known_tabs = self.backend.tabs().await?.into_iter().map(|t| t.id).collect();
        dom::click(self.backend, &page, control.handle).await?;
        tokio::time::sleep(self.apply.click_settle()).await;
        self.settle_network(&self.primary.clone()).await;

        let opened = self.backend.tabs().await?.into_iter().find(|t| {
            !self.known_tabs.contains(&t.id) && self.site.is_on_site(&t.url)
        });
        if let Some(tab) = opened {
            info!("Apply flow opened a new tab: {}", tab.url);
            if let Err(e) = self.backend.bring_to_front(&tab.id).await {
                debug!("Could not focus new tab: {}", e);
            }
            self.active = tab.id;
        }
        Ok(Step::Next(ApplyState::ResolvingFormContext))
    }

    async fn resolve_form(&mut self) -> Result<Step, BackendError> {
        let attempts = self.apply.context_attempts.max(1);
        let scope = self.scope();
        for attempt in 1..=attempts {
            if let Some(form) = context::resolve(self.backend, self.site, &scope).await? {
                info!("Application form found via {:?}", form.strategy);
                self.form = Some(form);
                return Ok(Step::Next(ApplyState::ExtractingQuestions));
            }
            if attempt < attempts {
                debug!("Form not found (attempt {}/{})", attempt, attempts);
                tokio::time::sleep(self.apply.context_retry(attempt)).await;
            }
        }

        context::log_diagnostics(self.backend, &self.active).await;
        let url = self.backend.current_url(&self.active).await?;
        if !self.site.is_on_site(&url) {
            return Ok(failed(EXTERNAL_REDIRECT));
        }
        if self.is_complete().await? {
            return Ok(Step::Done(LogStatus::Applied, None));
        }
        Ok(failed(NO_FORM))
    }

    async fn extract(&mut self) -> Result<Step, BackendError> {
        if self.steps >= self.apply.max_steps {
            return Ok(Step::Next(ApplyState::Finalizing));
        }
        self.steps += 1;
        tokio::time::sleep(self.apply.step_settle()).await;

        if self.is_complete().await? {
            info!("Application confirmed after {} step(s)", self.steps);
            return Ok(Step::Done(LogStatus::Applied, None));
        }

        // Step transitions can swap frames or open a dedicated page.
        let scope = self.scope();
        if let Some(form) = context::resolve(self.backend, self.site, &scope).await? {
            if self.form.as_ref() != Some(&form) {
                debug!("Form context moved to {}", form.context);
            }
            self.form = Some(form);
        }
        let ctx = self.form_context();

        self.fields = match dom::fields(self.backend, &ctx, self.site.question_containers).await {
            Ok(fields) => fields,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Could not read form fields: {}", e);
                Vec::new()
            }
        };
        self.pending = questions::extract_questions(&self.fields);
        self.outcome.questions_found += self.pending.len() as u32;
        debug!(
            "Step {}: {} field(s), {} open question(s)",
            self.steps,
            self.fields.len(),
            self.pending.len()
        );

        if self.pending.is_empty() {
            Ok(Step::Next(ApplyState::AdvancingStep))
        } else {
            Ok(Step::Next(ApplyState::AnsweringQuestions))
        }
    }

    async fn answer(&mut self) -> Result<Step, BackendError> {
        let questions = std::mem::take(&mut self.pending);
        let answers = match self
            .evaluator
            .answer_questions(
                self.request.profile,
                self.request.job,
                self.request.description,
                &questions,
            )
            .await
        {
            Ok(answers) => answers,
            Err(e) => {
                warn!("Answer generation failed, leaving fields blank: {}", e);
                Vec::new()
            }
        };

        let ctx = self.form_context();
        for answer in &answers {
            let Some(action) = fill::plan_fill(answer, &self.fields) else {
                debug!("No field applied for '{}'", answer.question);
                continue;
            };
            match dom::set_field(self.backend, &ctx, action.handle, action.value).await {
                Ok(()) => self.outcome.questions_answered += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Failed to fill '{}': {}", answer.question, e),
            }
        }
        self.outcome.answers.extend(answers);
        Ok(Step::Next(ApplyState::AdvancingStep))
    }

    async fn advance(&mut self) -> Result<Step, BackendError> {
        let ctx = self.form_context();
        if let Some(resume) = self.request.resume {
            self.upload_resume(&ctx, resume).await?;
        }

        let Some(control) = controls::find_next_control(self.backend, &ctx, self.site).await?
        else {
            debug!("No continue control on step {}", self.steps);
            return Ok(Step::Next(ApplyState::Finalizing));
        };
        if controls::is_submit(&control, self.site) {
            self.submit_clicked = true;
        }
        debug!("Clicking '{}'", dom::label_of(&control));
        dom::click(self.backend, &ctx, control.handle).await?;
        self.settle_network(&self.active.clone()).await;
        Ok(Step::Next(ApplyState::ExtractingQuestions))
    }

    async fn finalize(&mut self) -> Result<Step, BackendError> {
        if self.is_complete().await? {
            return Ok(Step::Done(LogStatus::Applied, None));
        }
        if self.submit_clicked {
            return Ok(Step::Done(
                LogStatus::NeedsReview,
                Some(SUBMIT_UNCONFIRMED.to_string()),
            ));
        }
        Ok(failed(NOT_CONFIRMED))
    }

    async fn upload_resume(
        &mut self,
        ctx: &ExecutionContext,
        resume: &Path,
    ) -> Result<(), BackendError> {
        let inputs = dom::query(self.backend, ctx, self.site.file_inputs).await?;
        let Some(input) = inputs.first() else {
            return Ok(());
        };
        match self.backend.upload_file(ctx, input.handle, resume).await {
            Ok(()) => info!("Attached resume {}", resume.display()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Resume upload failed: {}", e),
        }
        Ok(())
    }

    /// Success text anywhere: active tab, primary tab and all their frames.
    async fn is_complete(&mut self) -> Result<bool, BackendError> {
        let mut tabs = vec![self.active.clone()];
        if self.primary != self.active {
            tabs.push(self.primary.clone());
        }
        for tab in tabs {
            let page = ExecutionContext::Tab(tab.clone());
            match dom::snapshot(self.backend, &page).await {
                Ok(snapshot) if self.site.contains_success_phrase(&snapshot.text) => {
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!("Completion check failed on {}: {}", tab, e),
            }
            let frames = match context::child_frames(self.backend, &tab).await {
                Ok(frames) => frames,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => continue,
            };
            for frame in frames {
                let ctx = ExecutionContext::Frame {
                    tab: tab.clone(),
                    frame: frame.id,
                };
                if let Ok(snapshot) = dom::snapshot(self.backend, &ctx).await
                    && self.site.contains_success_phrase(&snapshot.text)
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn settle_network(&mut self, tab: &str) {
        if let Err(e) = self
            .backend
            .wait_for_network_idle(
                tab,
                self.timing.network_idle(),
                self.timing.network_idle_timeout(),
            )
            .await
        {
            debug!("Network did not settle: {}", e);
        }
    }

    fn scope(&self) -> TabScope {
        TabScope {
            active: self.active.clone(),
            known: self.known_tabs.clone(),
        }
    }

    fn form_context(&self) -> ExecutionContext {
        self.form
            .as_ref()
            .map(|f| f.context.clone())
            .unwrap_or_else(|| ExecutionContext::Tab(self.active.clone()))
    }
}

fn failed(reason: impl Into<String>) -> Step {
    Step::Done(LogStatus::Failed, Some(reason.into()))
}
