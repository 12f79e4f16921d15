#![allow(dead_code)]

use async_trait::async_trait;
use autoapply_engine::backend::{Backend, BackendError, NavigationResult};
use autoapply_engine::config::SiteConfig;
use autoapply_engine::llm::{Evaluator, EvaluatorError, MatchResult};
use autoapply_engine::model::{
    AnsweredQuestion, ApplicantProfile, ApplicationQuestion, ApplyLogEntry, Counters,
    JobListing, SearchParams, Session, SessionConfig, SessionStatus,
};
use autoapply_engine::protocol::{
    ActionResult, DomCommand, DomData, DomResponse, ElementInfo, ExecutionContext, FieldInfo,
    FieldValue, FrameInfo, LabelHints, NavigateOptions, PageSnapshot, RawCard, Rect, TabInfo,
};
use autoapply_engine::site::SiteProfile;
use autoapply_engine::store::{SessionStore, StoreError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

pub const TAB: &str = "tab-1";
pub const APPLY_TAB: &str = "tab-2";
pub const MAIN_FRAME: &str = "main";
pub const APPLY_FRAME: &str = "apply-frame";
pub const APPLY_FRAME_NAME: &str = "indeedapply-modal";
pub const WRAPPER_FRAME: &str = "wrapper-frame";
pub const NESTED_FRAME: &str = "nested-frame";
pub const APPLY_TAB_URL: &str = "https://smartapply.indeed.com/beta/indeedapply/form/questions";
pub const OFFSITE_URL: &str = "https://careers.example.com/jobs/42";

pub const AVATAR: u32 = 1;
pub const NAV: u32 = 2;
pub const APPLY_BUTTON: u32 = 10;
pub const EXTERNAL_BUTTON: u32 = 11;
pub const FORM_CONTAINER: u32 = 12;
pub const APPLY_IFRAME: u32 = 13;
pub const FORM_ELEMENT: u32 = 14;
pub const SUBMIT_BUTTON: u32 = 20;
pub const CONTINUE_BUTTON: u32 = 21;
pub const FILE_INPUT: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    EasyApply,
    External,
    NoApplyButton,
}

/// Where the form shows up after the apply click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormHost {
    /// Modal in the job page itself.
    Inline,
    /// Child frame behind an iframe carrying the apply name.
    NamedIframe,
    /// Frame nested inside an anonymous wrapper frame.
    NestedFrame,
    /// Dedicated apply page in a tab opened by the click.
    NewTab,
    /// The click leaves the site.
    Offsite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Submit,
}

/// One step of the application form.
#[derive(Debug, Clone)]
pub struct FormPage {
    pub fields: Vec<FieldInfo>,
    pub control: Option<Control>,
    pub file_input: bool,
}

impl FormPage {
    pub fn next(fields: Vec<FieldInfo>) -> Self {
        Self {
            fields,
            control: Some(Control::Continue),
            file_input: false,
        }
    }

    pub fn submit(fields: Vec<FieldInfo>) -> Self {
        Self {
            fields,
            control: Some(Control::Submit),
            file_input: false,
        }
    }

    pub fn with_file_input(mut self) -> Self {
        self.file_input = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakeJob {
    pub jk: String,
    pub title: String,
    pub company: String,
    pub description: String,
    pub kind: JobKind,
    pub host: FormHost,
    /// Continue on the last page stays on it.
    pub pages: Vec<FormPage>,
    /// Whether submitting shows the success message.
    pub confirms: bool,
}

impl FakeJob {
    pub fn easy(jk: &str, title: &str) -> Self {
        Self {
            jk: jk.into(),
            title: title.into(),
            company: format!("{} Ltd", jk.to_uppercase()),
            description: format!("We are hiring a {}.", title),
            kind: JobKind::EasyApply,
            host: FormHost::Inline,
            pages: vec![FormPage::submit(Vec::new())],
            confirms: true,
        }
    }

    pub fn kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn hosted(mut self, host: FormHost) -> Self {
        self.host = host;
        self
    }

    /// Single-page form with these fields and a submit button.
    pub fn with_fields(mut self, fields: Vec<FieldInfo>) -> Self {
        self.pages = vec![FormPage::submit(fields)];
        self
    }

    pub fn with_pages(mut self, pages: Vec<FormPage>) -> Self {
        self.pages = pages;
        self
    }

    pub fn unconfirmed(mut self) -> Self {
        self.confirms = false;
        self
    }

    pub fn card(&self) -> RawCard {
        self.card_with_href(&format!("/viewjob?jk={}", self.jk))
    }

    pub fn card_with_href(&self, href: &str) -> RawCard {
        RawCard {
            title: Some(self.title.clone()),
            company: Some(self.company.clone()),
            location: Some("Cape Town".into()),
            href: Some(href.into()),
            easy_apply: self.kind == JobKind::EasyApply,
            ..Default::default()
        }
    }
}

/// What the fake site looks like: search pages by `start / 10` and the jobs
/// behind the cards.
#[derive(Debug, Clone)]
pub struct FakeSite {
    /// `None` never signs in.
    pub signed_in_after: Option<Duration>,
    pub pages: Vec<Vec<RawCard>>,
    pub jobs: Vec<FakeJob>,
}

impl FakeSite {
    pub fn signed_in(jobs: Vec<FakeJob>) -> Self {
        let pages = vec![jobs.iter().map(FakeJob::card).collect()];
        Self {
            signed_in_after: Some(Duration::ZERO),
            pages,
            jobs,
        }
    }
}

/// Everything the fake observed, shared with the test.
#[derive(Debug, Default)]
pub struct Journal {
    pub navigations: Vec<String>,
    pub clicks: Vec<u32>,
    pub clicked_in: Vec<ExecutionContext>,
    pub filled: Vec<(u32, FieldValue)>,
    pub filled_in: Vec<ExecutionContext>,
    pub uploads: Vec<(ExecutionContext, PathBuf)>,
    pub focused: Vec<String>,
    pub launched: bool,
    pub closed: bool,
}

pub struct FakeDom {
    site: SiteProfile,
    script: FakeSite,
    journal: Arc<Mutex<Journal>>,
    started: Instant,
    url: String,
    /// Index into the job's form pages once the apply button was clicked.
    page: Option<usize>,
    submitted: bool,
    apply_tab_open: bool,
}

impl FakeDom {
    pub fn new(script: FakeSite, journal: Arc<Mutex<Journal>>) -> Self {
        Self {
            site: SiteProfile::indeed(&SiteConfig::default()).unwrap(),
            script,
            journal,
            started: Instant::now(),
            url: "about:blank".into(),
            page: None,
            submitted: false,
            apply_tab_open: false,
        }
    }

    fn signed_in(&self) -> bool {
        self.script
            .signed_in_after
            .is_some_and(|after| self.started.elapsed() >= after)
    }

    /// The user finishing sign-in moves the tab off the auth page.
    fn url(&self) -> String {
        if self.signed_in() && self.site.is_sign_in_page(&self.url) {
            self.site.home_url()
        } else {
            self.url.clone()
        }
    }

    fn current_job(&self) -> Option<&FakeJob> {
        let url = Url::parse(&self.url).ok()?;
        if !url.path().starts_with("/viewjob") {
            return None;
        }
        let jk = url
            .query_pairs()
            .find(|(k, _)| k == "jk")
            .map(|(_, v)| v.into_owned())?;
        self.script.jobs.iter().find(|j| j.jk == jk)
    }

    fn applying_job(&self) -> Option<&FakeJob> {
        self.page.and(self.current_job())
    }

    fn form_page(&self) -> Option<&FormPage> {
        self.applying_job()?.pages.get(self.page?)
    }

    /// The DOM surface hosting the form right now.
    fn form_context(&self) -> Option<ExecutionContext> {
        let frame = |frame: &str| ExecutionContext::Frame {
            tab: TAB.into(),
            frame: frame.into(),
        };
        match self.applying_job()?.host {
            FormHost::Inline => Some(ExecutionContext::Tab(TAB.into())),
            FormHost::NamedIframe => Some(frame(APPLY_FRAME)),
            FormHost::NestedFrame => Some(frame(NESTED_FRAME)),
            FormHost::NewTab => Some(ExecutionContext::Tab(APPLY_TAB.into())),
            FormHost::Offsite => None,
        }
    }

    fn in_form(&self, context: &ExecutionContext) -> bool {
        self.form_context().as_ref() == Some(context)
    }

    fn is(selectors: &[String], list: &[&str]) -> bool {
        selectors.iter().map(String::as_str).eq(list.iter().copied())
    }

    fn query(&self, context: &ExecutionContext, selectors: &[String]) -> Vec<ElementInfo> {
        let site = &self.site;
        if Self::is(selectors, &[site.nav_ready]) {
            return vec![element(NAV, "nav", "")];
        }
        let evidence: Vec<&str> = site
            .account_selectors
            .iter()
            .chain(site.avatar_selectors)
            .copied()
            .collect();
        if Self::is(selectors, &evidence) {
            let on_page = !self.site.is_sign_in_page(&self.url());
            return if self.signed_in() && on_page {
                vec![element(AVATAR, "div", "")]
            } else {
                vec![]
            };
        }

        if self.in_form(context) {
            return self.form_query(selectors);
        }
        if *context != ExecutionContext::Tab(TAB.into()) {
            return vec![];
        }
        let Some(job) = self.current_job() else {
            return vec![];
        };
        if self.page.is_some() {
            if job.host == FormHost::NamedIframe && Self::is(selectors, site.apply_iframes) {
                let mut iframe = element(APPLY_IFRAME, "iframe", "");
                iframe
                    .attributes
                    .insert("name".into(), APPLY_FRAME_NAME.into());
                return vec![iframe];
            }
            return vec![];
        }

        let apply_button = element(APPLY_BUTTON, "button", "Apply now");
        match job.kind {
            JobKind::EasyApply
                if Self::is(selectors, site.apply_selectors)
                    || Self::is(selectors, site.external_candidates) =>
            {
                vec![apply_button]
            }
            JobKind::External if Self::is(selectors, site.external_candidates) => {
                vec![element(EXTERNAL_BUTTON, "button", "Apply on company site")]
            }
            _ => vec![],
        }
    }

    /// Queries answered by whichever context hosts the form.
    fn form_query(&self, selectors: &[String]) -> Vec<ElementInfo> {
        let site = &self.site;
        let page = self.form_page();
        if Self::is(selectors, site.form_containers) {
            let mut container = element(FORM_CONTAINER, "div", "");
            container.rect.height = 400.0;
            return vec![container];
        }
        // The form element itself, for plain form and frame content lookups.
        if selectors.first().is_some_and(|s| s == "form") {
            let mut form = element(FORM_ELEMENT, "form", "");
            form.rect.height = 300.0;
            form.has_inputs = true;
            return vec![form];
        }
        if Self::is(selectors, site.next_selectors) {
            return match page.and_then(|p| p.control) {
                Some(Control::Continue) => vec![element(CONTINUE_BUTTON, "button", "Continue")],
                Some(Control::Submit) => {
                    vec![element(SUBMIT_BUTTON, "button", "Submit your application")]
                }
                None => vec![],
            };
        }
        if Self::is(selectors, site.file_inputs) && page.is_some_and(|p| p.file_input) {
            return vec![element(FILE_INPUT, "input", "")];
        }
        vec![]
    }

    fn snapshot(&self, context: &ExecutionContext) -> PageSnapshot {
        let text = if self.submitted
            && self.applying_job().is_some_and(|j| j.confirms)
            && self.in_form(context)
        {
            "Your application has been submitted. Good luck!"
        } else {
            "Job details"
        };
        let url = match context.tab() {
            APPLY_TAB => APPLY_TAB_URL.to_string(),
            _ => self.url(),
        };
        PageSnapshot {
            url,
            title: String::new(),
            text: text.into(),
        }
    }

    fn click(&mut self, handle: u32) {
        let pages = self.current_job().map_or(0, |j| j.pages.len());
        match handle {
            APPLY_BUTTON => {
                self.page = Some(0);
                match self.current_job().map(|j| j.host) {
                    Some(FormHost::NewTab) => self.apply_tab_open = true,
                    Some(FormHost::Offsite) => self.url = OFFSITE_URL.into(),
                    _ => {}
                }
            }
            CONTINUE_BUTTON => {
                self.page = self.page.map(|p| (p + 1).min(pages.saturating_sub(1)));
            }
            SUBMIT_BUTTON => {
                self.submitted = true;
                self.page = Some(pages);
            }
            _ => {}
        }
    }

    fn frames_of(&self, tab: &str) -> Vec<FrameInfo> {
        let frame = |id: &str, url: &str, name: Option<&str>, parent: Option<&str>| FrameInfo {
            id: id.into(),
            tab: tab.into(),
            url: url.into(),
            name: name.map(str::to_string),
            parent: parent.map(str::to_string),
            is_main: parent.is_none(),
        };
        if tab == APPLY_TAB {
            return vec![frame(MAIN_FRAME, APPLY_TAB_URL, None, None)];
        }
        let mut frames = vec![frame(MAIN_FRAME, &self.url(), None, None)];
        match self.applying_job().map(|j| j.host) {
            Some(FormHost::NamedIframe) => frames.push(frame(
                APPLY_FRAME,
                "https://apply.indeed.com/indeedapply/form",
                Some(APPLY_FRAME_NAME),
                Some(MAIN_FRAME),
            )),
            Some(FormHost::NestedFrame) => {
                frames.push(frame(
                    WRAPPER_FRAME,
                    "https://za.indeed.com/apply/wrapper",
                    None,
                    Some(MAIN_FRAME),
                ));
                frames.push(frame(
                    NESTED_FRAME,
                    "https://apply.indeed.com/indeedapply/inner",
                    None,
                    Some(WRAPPER_FRAME),
                ));
            }
            _ => {}
        }
        frames
    }

    fn has_tab(&self, tab: &str) -> bool {
        tab == TAB || (tab == APPLY_TAB && self.apply_tab_open)
    }

    fn page_cards(&self) -> Vec<RawCard> {
        let start = Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "start")
                    .and_then(|(_, v)| v.parse::<usize>().ok())
            })
            .unwrap_or(0);
        self.script
            .pages
            .get(start / 10)
            .cloned()
            .unwrap_or_default()
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }
}

#[async_trait]
impl Backend for FakeDom {
    async fn launch(&mut self) -> Result<(), BackendError> {
        self.journal().launched = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.journal().closed = true;
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    fn primary_tab(&self) -> Result<String, BackendError> {
        Ok(TAB.into())
    }

    /// Also closes a tab the previous apply click opened.
    async fn navigate(
        &mut self,
        url: &str,
        _options: NavigateOptions,
    ) -> Result<NavigationResult, BackendError> {
        self.journal().navigations.push(url.to_string());
        self.url = url.to_string();
        self.page = None;
        self.submitted = false;
        self.apply_tab_open = false;
        Ok(NavigationResult {
            url: url.to_string(),
            title: String::new(),
            status: 200,
        })
    }

    async fn current_url(&mut self, tab: &str) -> Result<String, BackendError> {
        match tab {
            TAB => Ok(self.url()),
            APPLY_TAB if self.apply_tab_open => Ok(APPLY_TAB_URL.into()),
            _ => Err(BackendError::TabNotFound(tab.into())),
        }
    }

    async fn tabs(&mut self) -> Result<Vec<TabInfo>, BackendError> {
        let focused = self.journal().focused.last().cloned();
        let mut tabs = vec![TabInfo {
            id: TAB.into(),
            url: self.url(),
            title: String::new(),
            active: focused.as_deref() != Some(APPLY_TAB) || !self.apply_tab_open,
        }];
        if self.apply_tab_open {
            tabs.push(TabInfo {
                id: APPLY_TAB.into(),
                url: APPLY_TAB_URL.into(),
                title: "Apply".into(),
                active: focused.as_deref() == Some(APPLY_TAB),
            });
        }
        Ok(tabs)
    }

    async fn frames(&mut self, tab: &str) -> Result<Vec<FrameInfo>, BackendError> {
        if !self.has_tab(tab) {
            return Err(BackendError::TabNotFound(tab.into()));
        }
        Ok(self.frames_of(tab))
    }

    async fn execute_dom(
        &mut self,
        context: &ExecutionContext,
        command: DomCommand,
    ) -> Result<DomResponse, BackendError> {
        if !self.has_tab(context.tab()) {
            return Err(BackendError::TabNotFound(context.tab().into()));
        }
        let data = match command {
            DomCommand::Query(request) => {
                DomData::Elements(self.query(context, &request.selectors))
            }
            DomCommand::Snapshot(_) => DomData::Snapshot(self.snapshot(context)),
            DomCommand::ExtractCards(_) => DomData::Cards(self.page_cards()),
            DomCommand::ReadText(_) => {
                DomData::Text(self.current_job().map(|j| j.description.clone()))
            }
            DomCommand::Fields(_) => {
                let fields = match self.form_page() {
                    Some(page) if self.in_form(context) => page.fields.clone(),
                    _ => vec![],
                };
                DomData::Fields(fields)
            }
            DomCommand::SetField(request) => {
                let mut journal = self.journal();
                journal.filled.push((request.handle, request.value));
                journal.filled_in.push(context.clone());
                drop(journal);
                ok_action()
            }
            DomCommand::Click(request) => {
                let mut journal = self.journal();
                journal.clicks.push(request.handle);
                journal.clicked_in.push(context.clone());
                drop(journal);
                self.click(request.handle);
                ok_action()
            }
            DomCommand::Scroll(_) | DomCommand::Focus(_) => ok_action(),
        };
        Ok(DomResponse::ok(data))
    }

    async fn bring_to_front(&mut self, tab: &str) -> Result<(), BackendError> {
        if !self.has_tab(tab) {
            return Err(BackendError::TabNotFound(tab.into()));
        }
        self.journal().focused.push(tab.to_string());
        Ok(())
    }

    async fn upload_file(
        &mut self,
        context: &ExecutionContext,
        _handle: u32,
        path: &Path,
    ) -> Result<(), BackendError> {
        self.journal()
            .uploads
            .push((context.clone(), path.to_path_buf()));
        Ok(())
    }
}

fn ok_action() -> DomData {
    DomData::Action(ActionResult {
        success: true,
        message: None,
    })
}

pub fn element(handle: u32, tag: &str, text: &str) -> ElementInfo {
    ElementInfo {
        handle,
        matched: 0,
        tag: tag.into(),
        text: text.into(),
        attributes: HashMap::new(),
        rect: Rect {
            width: 120.0,
            height: 40.0,
        },
        has_inputs: false,
        has_button: false,
    }
}

pub fn text_field(handle: u32, name: &str, label: &str) -> FieldInfo {
    FieldInfo {
        handle,
        tag: "input".into(),
        input_type: Some("text".into()),
        name: Some(name.into()),
        visible: true,
        hints: LabelHints {
            for_label: Some(label.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Scores by title, answers by question text.
#[derive(Default)]
pub struct FakeEvaluator {
    pub scores: HashMap<String, (u8, bool)>,
    pub answers: HashMap<String, (String, f64)>,
    pub fail_matches: bool,
    pub answer_calls: Mutex<Vec<Vec<ApplicationQuestion>>>,
}

impl FakeEvaluator {
    pub fn score(mut self, title: &str, score: u8, should_apply: bool) -> Self {
        self.scores.insert(title.into(), (score, should_apply));
        self
    }

    pub fn answer(mut self, question: &str, answer: &str, confidence: f64) -> Self {
        self.answers
            .insert(question.into(), (answer.into(), confidence));
        self
    }
}

#[async_trait]
impl Evaluator for FakeEvaluator {
    async fn evaluate_match(
        &self,
        _profile: &ApplicantProfile,
        job: &JobListing,
        _description: &str,
    ) -> Result<MatchResult, EvaluatorError> {
        if self.fail_matches {
            return Err(EvaluatorError::EmptyContent);
        }
        let (score, should_apply) = self.scores.get(&job.title).copied().unwrap_or((80, true));
        Ok(MatchResult {
            score,
            should_apply,
            reason: "fake".into(),
        })
    }

    async fn answer_questions(
        &self,
        _profile: &ApplicantProfile,
        _job: &JobListing,
        _description: &str,
        questions: &[ApplicationQuestion],
    ) -> Result<Vec<AnsweredQuestion>, EvaluatorError> {
        self.answer_calls.lock().unwrap().push(questions.to_vec());
        Ok(questions
            .iter()
            .filter_map(|q| {
                let (answer, confidence) = self.answers.get(&q.question)?;
                Some(AnsweredQuestion {
                    question: q.question.clone(),
                    answer: answer.clone(),
                    confidence: *confidence,
                    field_name: q.field_name.clone(),
                })
            })
            .collect())
    }
}

/// A store that is down for the whole run.
pub struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn create_session(&self, _session: &Session) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn create_log(&self, _id: &str, _entry: &ApplyLogEntry) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn update_counters(&self, _id: &str, _counters: &Counters) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn update_status(
        &self,
        _id: &str,
        _status: SessionStatus,
        _error: Option<&str>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn load_session(&self, _id: &str) -> Result<Option<Session>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn list_sessions(&self, _user: &str, _limit: usize) -> Result<Vec<Session>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete_session(&self, _id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

pub fn session_config(user: &str, max_applications: u32, min_match_score: u8) -> SessionConfig {
    SessionConfig {
        user_id: user.into(),
        search: SearchParams {
            query: "rust developer".into(),
            location: "Cape Town".into(),
            job_type: None,
        },
        max_applications,
        min_match_score,
        profile: ApplicantProfile {
            name: "Sam Dlamini".into(),
            email: "sam@example.com".into(),
            skills: vec!["Rust".into(), "Tokio".into()],
            ..Default::default()
        },
        resume_path: None,
    }
}
