use super::prompts::{self, JSON_ONLY_SYSTEM};
use super::{Evaluator, EvaluatorError, MatchResult};
use crate::config::LlmConfig;
use async_trait::async_trait;
use autoapply_common::model::{AnsweredQuestion, ApplicantProfile, ApplicationQuestion, JobListing};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const MATCH_MAX_TOKENS: u32 = 300;
const ANSWERS_MAX_TOKENS: u32 = 2000;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const RETRY_BASE_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Chat-completions client in JSON mode.
#[derive(Clone)]
pub struct OpenAiEvaluator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiEvaluator {
    /// Reads the API key from the environment variable named in the config.
    pub fn from_env(config: &LlmConfig) -> Result<Self, EvaluatorError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EvaluatorError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, EvaluatorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Retries on 429 and 5xx with exponential backoff.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, EvaluatorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: JSON_ONLY_SYSTEM,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let attempts = self.max_retries + 1;
        let mut last_error: Option<EvaluatorError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = retry_delay(attempt);
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(EvaluatorError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, text);
                last_error = Some(EvaluatorError::Api {
                    status: status.as_u16(),
                    message: text,
                });
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&text)
                    .map(|e| e.error.message)
                    .unwrap_or(text);
                return Err(EvaluatorError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let parsed: ChatResponse = response.json().await?;
            if let Some(usage) = &parsed.usage {
                debug!(
                    "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
            return parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or(EvaluatorError::EmptyContent);
        }

        Err(last_error.unwrap_or(EvaluatorError::RateLimited {
            retries: self.max_retries,
        }))
    }
}

#[async_trait]
impl Evaluator for OpenAiEvaluator {
    async fn evaluate_match(
        &self,
        profile: &ApplicantProfile,
        job: &JobListing,
        description: &str,
    ) -> Result<MatchResult, EvaluatorError> {
        let prompt = prompts::match_prompt(profile, job, description);
        let content = self.complete(&prompt, MATCH_MAX_TOKENS).await?;
        parse_match(&content)
    }

    async fn answer_questions(
        &self,
        profile: &ApplicantProfile,
        job: &JobListing,
        description: &str,
        questions: &[ApplicationQuestion],
    ) -> Result<Vec<AnsweredQuestion>, EvaluatorError> {
        if questions.is_empty() {
            return Ok(vec![]);
        }
        let prompt = prompts::answers_prompt(profile, job, description, questions);
        let content = self.complete(&prompt, ANSWERS_MAX_TOKENS).await?;
        parse_answers(&content, questions)
    }
}

pub(crate) fn parse_match(content: &str) -> Result<MatchResult, EvaluatorError> {
    let value: Value = serde_json::from_str(content)?;
    let raw = value.get("score").and_then(Value::as_f64).unwrap_or(0.0);
    let score = raw.clamp(0.0, 100.0).round() as u8;
    let should_apply = value
        .get("shouldApply")
        .or_else(|| value.get("should_apply"))
        .and_then(Value::as_bool)
        .unwrap_or(score >= 50);
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or("No reason provided")
        .to_string();
    Ok(MatchResult {
        score,
        should_apply,
        reason,
    })
}

/// Doubling backoff starting at one second, capped at a minute.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(factor)).min(MAX_RETRY_DELAY)
}

/// Accepts a bare array or an object wrapping it under `answers` or
/// `responses`. Entries pointing outside `questions` are dropped.
pub(crate) fn parse_answers(
    content: &str,
    questions: &[ApplicationQuestion],
) -> Result<Vec<AnsweredQuestion>, EvaluatorError> {
    let value: Value = serde_json::from_str(content)?;
    let items = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("answers")
            .or_else(|| map.get("responses"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    let answers = items
        .iter()
        .filter_map(|item| {
            let index = item.get("questionIndex").and_then(Value::as_u64)? as usize;
            let question = questions.get(index)?;
            let answer = match item.get("answer") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => (if *b { "Yes" } else { "No" }).to_string(),
                _ => String::new(),
            };
            let confidence = item
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0);
            Some(AnsweredQuestion {
                question: question.question.clone(),
                answer,
                confidence,
                field_name: question.field_name.clone(),
            })
        })
        .collect();
    Ok(answers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoapply_common::model::QuestionType;

    fn question(text: &str, field: &str) -> ApplicationQuestion {
        ApplicationQuestion {
            question: text.into(),
            question_type: QuestionType::Text,
            options: vec![],
            required: false,
            field_name: Some(field.into()),
        }
    }

    #[test]
    fn match_score_is_clamped() {
        let result = parse_match(r#"{"score": 140, "reason": "great"}"#).unwrap();
        assert_eq!(result.score, 100);
        assert!(result.should_apply);

        let result = parse_match(r#"{"score": -3, "shouldApply": true}"#).unwrap();
        assert_eq!(result.score, 0);
        assert!(result.should_apply);
        assert_eq!(result.reason, "No reason provided");
    }

    #[test]
    fn should_apply_defaults_from_score() {
        assert!(!parse_match(r#"{"score": 49}"#).unwrap().should_apply);
        assert!(parse_match(r#"{"score": 50}"#).unwrap().should_apply);
    }

    #[test]
    fn answers_accept_wrapped_and_bare_arrays() {
        let questions = vec![question("Name?", "name"), question("Years?", "years")];
        let wrapped = r#"{"answers": [{"questionIndex": 1, "answer": 4, "confidence": 1.7}]}"#;
        let answers = parse_answers(wrapped, &questions).unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question, "Years?");
        assert_eq!(answers[0].answer, "4");
        assert_eq!(answers[0].confidence, 1.0);
        assert_eq!(answers[0].field_name.as_deref(), Some("years"));

        let bare = r#"[{"questionIndex": 0, "answer": "Sam"}, {"questionIndex": 7, "answer": "x"}]"#;
        let answers = parse_answers(bare, &questions).unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].confidence, DEFAULT_CONFIDENCE);

        let responses = r#"{"responses": [{"questionIndex": 0, "answer": "Sam", "confidence": 0.9}]}"#;
        assert_eq!(parse_answers(responses, &questions).unwrap().len(), 1);
    }

    #[test]
    fn answers_outside_the_question_list_are_dropped() {
        let questions = vec![question("Name?", "name")];
        let content = r#"{"answers": [
            {"questionIndex": 1, "answer": "stray"},
            {"questionIndex": -1, "answer": "negative"},
            {"questionIndex": "0", "answer": "string index"},
            {"questionIndex": 0, "answer": "Sam", "confidence": 0.8}
        ]}"#;
        let answers = parse_answers(content, &questions).unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, "Sam");
        assert_eq!(answers[0].field_name.as_deref(), Some("name"));
    }

    #[test]
    fn retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(4), Duration::from_secs(8));
        assert_eq!(retry_delay(7), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(200), MAX_RETRY_DELAY);
    }

    #[test]
    fn malformed_content_is_an_error() {
        assert!(matches!(
            parse_answers("not json", &[]),
            Err(EvaluatorError::Parse(_))
        ));
    }
}
