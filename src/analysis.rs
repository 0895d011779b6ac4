//! Analysis provider client.
//!
//! Talks to the Anthropic Messages API with deterministic generation
//! settings, a per-attempt timeout, and a small bounded retry loop for
//! transient failures. Provider rejections (4xx other than 429) are never
//! retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::PipelineError;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const SYSTEM_PROMPT: &str =
    "You are an expert legal contract analyzer. Provide analysis in the exact JSON format requested.";
/// Base delay for the doubling retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Seam for the external completion call, so the pipeline can be tested
/// with canned replies.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Model identifier, used as the default author for AI redlines.
    fn model(&self) -> &str;

    /// Send the prompt and return the raw textual completion.
    async fn complete(&self, prompt: &str) -> Result<String, PipelineError>;
}

/// Whether a failed attempt is worth retrying.
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    Retryable,
    Fatal,
}

fn classify_status(status: StatusCode) -> Disposition {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Disposition::Retryable
    } else {
        Disposition::Fatal
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt)
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

fn completion_text(response: MessagesResponse) -> Option<String> {
    let mut text = String::new();
    for block in response.content {
        if block.block_type == "text"
            && let Some(chunk) = block.text
        {
            text.push_str(&chunk);
        }
    }
    if text.is_empty() { None } else { Some(text) }
}

enum AttemptError {
    Retryable(String),
    Fatal(PipelineError),
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: secrecy::SecretString,
    model: String,
    max_tokens: u32,
    retries: u32,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(settings: &Settings) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(settings.analysis_timeout)
            .build()
            .map_err(|e| PipelineError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_key: settings.anthropic_api_key.clone(),
            model: settings.analysis_model.clone(),
            max_tokens: settings.max_tokens,
            retries: settings.analysis_retries,
            base_url: ANTHROPIC_API_BASE.to_string(),
        })
    }

    async fn attempt(&self, body: &serde_json::Value) -> Result<String, AttemptError> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AttemptError::Fatal(PipelineError::AnalysisTimeout)
                } else {
                    AttemptError::Retryable(format!("transport error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return match classify_status(status) {
                Disposition::Retryable => {
                    Err(AttemptError::Retryable(format!("provider returned {status}")))
                }
                Disposition::Fatal => Err(AttemptError::Fatal(
                    PipelineError::AnalysisProviderError(format!(
                        "provider rejected the request with {status}"
                    )),
                )),
            };
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AttemptError::Fatal(PipelineError::AnalysisTimeout)
            } else {
                AttemptError::Retryable(format!("unreadable provider response: {e}"))
            }
        })?;

        completion_text(parsed).ok_or_else(|| {
            AttemptError::Fatal(PipelineError::AnalysisProviderError(
                "provider returned no text content".to_string(),
            ))
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut last_failure = String::new();
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
                tracing::info!(attempt, "retrying analysis request");
            }
            match self.attempt(&body).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(reason)) => {
                    tracing::warn!(attempt, %reason, "analysis attempt failed");
                    last_failure = reason;
                }
            }
        }

        Err(PipelineError::AnalysisServiceUnavailable(format!(
            "retries exhausted: {last_failure}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Disposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            Disposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Disposition::Retryable
        );
    }

    #[test]
    fn client_errors_are_fatal() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Disposition::Fatal);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), Disposition::Fatal);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Disposition::Fatal);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn completion_text_joins_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content": [
                {"type": "text", "text": "{\"risk"},
                {"type": "tool_use"},
                {"type": "text", "text": "_score\": 5}"}
            ]}"#,
        )
        .expect("parse");
        assert_eq!(completion_text(response).as_deref(), Some("{\"risk_score\": 5}"));
    }

    #[test]
    fn empty_content_yields_none() {
        let response: MessagesResponse =
            serde_json::from_str(r#"{"content": []}"#).expect("parse");
        assert_eq!(completion_text(response), None);
    }
}
