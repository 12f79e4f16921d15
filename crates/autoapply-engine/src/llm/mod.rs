//! Language-model evaluation consumed by the orchestrator.
//!
//! The orchestrator only sees [`Evaluator`]. Callers absorb its failures with
//! fixed fallbacks, so implementations report errors instead of guessing.

use async_trait::async_trait;
use autoapply_common::model::{AnsweredQuestion, ApplicantProfile, ApplicationQuestion, JobListing};
use thiserror::Error;

pub mod openai;
pub mod prompts;

pub use openai::OpenAiEvaluator;

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Model returned empty content")]
    EmptyContent,

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Clamped to 0..=100.
    pub score: u8,
    pub should_apply: bool,
    pub reason: String,
}

impl MatchResult {
    /// Used when the model cannot be reached: apply rather than drop the job.
    pub fn neutral() -> Self {
        Self {
            score: 50,
            should_apply: true,
            reason: "Could not evaluate, applying by default".into(),
        }
    }
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate_match(
        &self,
        profile: &ApplicantProfile,
        job: &JobListing,
        description: &str,
    ) -> Result<MatchResult, EvaluatorError>;

    /// One answer per question the model chose to answer, in any order.
    async fn answer_questions(
        &self,
        profile: &ApplicantProfile,
        job: &JobListing,
        description: &str,
        questions: &[ApplicationQuestion],
    ) -> Result<Vec<AnsweredQuestion>, EvaluatorError>;
}
