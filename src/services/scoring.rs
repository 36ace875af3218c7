use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;

pub(crate) mod normalize;

const SCORING_SYSTEM_PROMPT: &str = r#"You are an experienced essay examiner.
Your task is to correct a student essay and score it against the rubric below.

Scoring dimensions (each 0-100, weighted into the total):
1. Content: relevance to the title, depth of ideas, supporting detail
2. Structure: paragraphing, coherence, logical flow
3. Language: vocabulary range, sentence variety, register
4. Mechanics: grammar, spelling, punctuation

Response format (strict JSON):
{
  "total_score": <number 0-100>,
  "dimension_scores": {
    "content": <number>,
    "structure": <number>,
    "language": <number>,
    "mechanics": <number>
  },
  "error_list": [
    {
      "sentence": "the original sentence",
      "error_type": "grammar | spelling | word choice | structure",
      "correction": "the corrected sentence",
      "explanation": "short explanation"
    }
  ],
  "narrative_comments": "Overall feedback for the student",
  "improvement_suggestions": ["suggestion 1", "suggestion 2"],
  "normalized_content": "the full corrected essay text"
}
"#;

/// Failure taxonomy for a single scoring call. `Transient` is the only kind
/// the caller should retry in-process.
#[derive(Debug, Clone, Error)]
pub(crate) enum ScoringError {
    #[error("transient scoring failure: {0}")]
    Transient(String),
    #[error("permanent scoring failure: {0}")]
    Permanent(String),
    /// The engine answered with schema-valid JSON that cannot be used as a
    /// score. Retrying the same request is unlikely to help.
    #[error("malformed scoring response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone)]
pub(crate) struct ScoreRequest {
    pub(crate) essay_id: i64,
    pub(crate) title: String,
    pub(crate) content: String,
    pub(crate) grade: Option<String>,
    pub(crate) word_count: i32,
}

/// Canonical result shape every scoring response is decoded into.
/// `raw` keeps the engine's original payload for audit storage.
#[derive(Debug, Clone)]
pub(crate) struct NormalizedResult {
    pub(crate) total_score: f64,
    pub(crate) dimension_scores: BTreeMap<String, f64>,
    pub(crate) error_list: Vec<Value>,
    pub(crate) narrative_comments: Option<String>,
    pub(crate) improvement_suggestions: Vec<String>,
    pub(crate) normalized_content: Option<String>,
    pub(crate) raw: Value,
}

#[async_trait]
pub(crate) trait EssayScorer: Send + Sync {
    /// One scoring attempt. Retry policy lives with the caller, not here.
    async fn score(&self, request: &ScoreRequest) -> Result<NormalizedResult, ScoringError>;
}

#[derive(Debug, Clone)]
pub(crate) struct ScoringClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl ScoringClient {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(settings.scoring().request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.scoring().api_key.clone(),
            base_url: settings.scoring().base_url.trim_end_matches('/').to_string(),
            model: settings.scoring().model.clone(),
            max_tokens: settings.scoring().max_tokens,
        })
    }

    fn build_payload(&self, request: &ScoreRequest) -> Value {
        let grade = request.grade.as_deref().unwrap_or("unspecified");
        let user_prompt = format!(
            "Title: {}\nGrade level: {}\nWord count: {}\n\nEssay:\n{}\n\nCorrect the essay and score it. Respond with the JSON format described in the system prompt and nothing else.",
            request.title, grade, request.word_count, request.content
        );

        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SCORING_SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt}
            ],
            "max_completion_tokens": self.max_tokens,
            "temperature": 0.2,
            "response_format": {"type": "json_object"}
        })
    }
}

#[async_trait]
impl EssayScorer for ScoringClient {
    async fn score(&self, request: &ScoreRequest) -> Result<NormalizedResult, ScoringError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.build_payload(request);

        tracing::info!(essay_id = request.essay_id, model = %self.model, "Sending scoring request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|err| ScoringError::Transient(format!("Failed to read scoring response: {err}")))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ScoringError::MalformedResponse("Missing scoring response content".to_string())
            })?;

        // Truncated or fenced output can succeed on a fresh attempt.
        let raw: Value = serde_json::from_str(content).map_err(|err| {
            ScoringError::Transient(format!("Scoring response is not valid JSON: {err}"))
        })?;

        let result = normalize::from_response(raw)?;

        tracing::info!(
            essay_id = request.essay_id,
            total_score = result.total_score,
            errors_found = result.error_list.len(),
            "Scoring completed"
        );

        Ok(result)
    }
}

fn classify_transport_error(err: reqwest::Error) -> ScoringError {
    if err.is_timeout() {
        ScoringError::Transient(format!("Scoring request timed out: {err}"))
    } else {
        ScoringError::Transient(format!("Failed to call scoring engine: {err}"))
    }
}

fn classify_status(status: StatusCode, body: &Value) -> ScoringError {
    let detail = body
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("no detail")
        .to_string();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ScoringError::Transient(format!("Scoring engine returned {status}: {detail}"))
    } else {
        ScoringError::Permanent(format!("Scoring engine rejected the request ({status}): {detail}"))
    }
}
