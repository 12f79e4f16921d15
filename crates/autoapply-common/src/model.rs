//! Session data model shared by the orchestrator, the stores and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type SessionId = String;

/// Answers at or below this confidence are never written into a form.
pub const CONFIDENCE_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

/// What the language model knows about the applicant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicantProfile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub desired_roles: Vec<String>,
    #[serde(default)]
    pub cv_text: Option<String>,
}

/// Everything needed to start one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub user_id: String,
    pub search: SearchParams,
    pub max_applications: u32,
    pub min_match_score: u8,
    pub profile: ApplicantProfile,
    #[serde(default)]
    pub resume_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total_found: u32,
    pub applied: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl Counters {
    pub fn record(&mut self, status: LogStatus) {
        match status {
            LogStatus::Applied => self.applied += 1,
            LogStatus::Skipped => self.skipped += 1,
            LogStatus::Failed | LogStatus::NeedsReview => self.failed += 1,
        }
    }

    pub fn processed(&self) -> u32 {
        self.applied + self.skipped + self.failed
    }
}

/// Live view of one run. The control plane owns it; everything else reports
/// into it through the progress emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub search: SearchParams,
    pub max_applications: u32,
    pub min_match_score: u8,
    pub profile: ApplicantProfile,
    pub status: SessionStatus,
    pub counters: Counters,
    #[serde(default)]
    pub current_job: Option<String>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub logs: Vec<ApplyLogEntry>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, config: &SessionConfig) -> Self {
        Self {
            id,
            user_id: config.user_id.clone(),
            search: config.search.clone(),
            max_applications: config.max_applications,
            min_match_score: config.min_match_score,
            profile: config.profile.clone(),
            status: SessionStatus::Running,
            counters: Counters::default(),
            current_job: None,
            current_step: None,
            logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            last_error: None,
        }
    }

    pub fn cap_reached(&self) -> bool {
        self.counters.applied >= self.max_applications
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default)]
    pub easy_apply: bool,
}

impl JobListing {
    pub fn label(&self) -> String {
        format!("{} at {}", self.title, self.company)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    Textarea,
    Select,
    Radio,
    Checkbox,
    Number,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Text => "text",
            QuestionType::Textarea => "textarea",
            QuestionType::Select => "select",
            QuestionType::Radio => "radio",
            QuestionType::Checkbox => "checkbox",
            QuestionType::Number => "number",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationQuestion {
    pub question: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub question: String,
    pub answer: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl AnsweredQuestion {
    /// Fill when plausible, leave blank rather than write garbage.
    pub fn is_applicable(&self) -> bool {
        !self.answer.trim().is_empty() && self.confidence > CONFIDENCE_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Applied,
    Skipped,
    Failed,
    NeedsReview,
}

/// One immutable record per job outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyLogEntry {
    pub job_title: String,
    pub company: String,
    pub job_url: String,
    pub status: LogStatus,
    pub questions_found: u32,
    pub questions_answered: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_responses: Option<Vec<AnsweredQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl ApplyLogEntry {
    fn base(job: &JobListing, status: LogStatus) -> Self {
        Self {
            job_title: job.title.clone(),
            company: job.company.clone(),
            job_url: job.url.clone(),
            status,
            questions_found: 0,
            questions_answered: 0,
            ai_responses: None,
            failure_reason: None,
            skip_reason: None,
            match_score: None,
            timestamp: Utc::now(),
        }
    }

    pub fn skipped(job: &JobListing, reason: impl Into<String>, score: Option<u8>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            match_score: score,
            ..Self::base(job, LogStatus::Skipped)
        }
    }

    pub fn failed(job: &JobListing, reason: impl Into<String>, score: Option<u8>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            match_score: score,
            ..Self::base(job, LogStatus::Failed)
        }
    }

    pub fn finished(
        job: &JobListing,
        status: LogStatus,
        questions_found: u32,
        questions_answered: u32,
        ai_responses: Vec<AnsweredQuestion>,
        failure_reason: Option<String>,
        score: Option<u8>,
    ) -> Self {
        Self {
            questions_found,
            questions_answered,
            ai_responses: (!ai_responses.is_empty()).then_some(ai_responses),
            failure_reason,
            match_score: score,
            ..Self::base(job, status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobListing {
        JobListing {
            title: "Rust Engineer".into(),
            company: "Acme".into(),
            location: "Cape Town".into(),
            url: "https://za.indeed.com/viewjob?jk=1".into(),
            salary: None,
            snippet: None,
            easy_apply: true,
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut answer = AnsweredQuestion {
            question: "Years of Rust?".into(),
            answer: "4".into(),
            confidence: CONFIDENCE_THRESHOLD,
            field_name: None,
        };
        assert!(!answer.is_applicable());
        answer.confidence = 0.16;
        assert!(answer.is_applicable());
        answer.answer = "   ".into();
        assert!(!answer.is_applicable());
    }

    #[test]
    fn needs_review_counts_as_failed() {
        let mut counters = Counters::default();
        counters.record(LogStatus::Applied);
        counters.record(LogStatus::NeedsReview);
        counters.record(LogStatus::Skipped);
        assert_eq!(counters.applied, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.processed(), 3);
    }

    #[test]
    fn cap_counts_only_applied_jobs() {
        let config = SessionConfig {
            user_id: "u".into(),
            search: SearchParams::default(),
            max_applications: 2,
            min_match_score: 60,
            profile: ApplicantProfile::default(),
            resume_path: None,
        };
        let mut session = Session::new("s".into(), &config);
        session.counters.record(LogStatus::Applied);
        session.counters.record(LogStatus::Failed);
        session.counters.record(LogStatus::NeedsReview);
        assert!(!session.cap_reached());
        session.counters.record(LogStatus::Applied);
        assert!(session.cap_reached());
    }

    #[test]
    fn statuses_serialize_snake_case() {
        let entry = ApplyLogEntry::skipped(&job(), "External application only", Some(80));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["match_score"], 80);
        assert!(value.get("ai_responses").is_none());
        assert_eq!(
            serde_json::to_value(LogStatus::NeedsReview).unwrap(),
            "needs_review"
        );
    }

    #[test]
    fn question_type_uses_type_key() {
        let q = ApplicationQuestion {
            question: "Do you have a licence?".into(),
            question_type: QuestionType::Checkbox,
            options: vec!["Yes".into(), "No".into()],
            required: true,
            field_name: Some("licence".into()),
        };
        let value = serde_json::to_value(&q).unwrap();
        assert_eq!(value["type"], "checkbox");
    }
}
