//! Google Gemini provider over the REST `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{Completion, CompletionRequest, LlmError, LlmProvider, TokenUsage};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use crate::types::{GenerateContentRequest, GenerateContentResponse};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Connection settings for [`GeminiProvider`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// Model identifier, e.g. `gemini-2.5-flash`.
    pub model: String,
    /// Scheme + host (+ optional path prefix), without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl GeminiConfig {
    /// Settings for the public endpoint and default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_owned(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// [`LlmProvider`] backed by the Gemini REST API.
///
/// Classifies failures (rate limits, server errors, blocked prompts) but never
/// retries; that is left to whoever re-submits the run.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    /// Builds a provider.
    ///
    /// # Errors
    ///
    /// [`LlmError::Misconfigured`] if the API key is empty or the HTTP client
    /// cannot be constructed.
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Misconfigured {
                message: "Gemini API key is empty".into(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::Misconfigured {
                message: e.to_string(),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = GenerateContentRequest::from(request);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(?retry_after, "rate limited");
            return Err(LlmError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "provider returned an error");
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| LlmError::Malformed {
                message: e.to_string(),
            })?;
        into_completion(parsed)
    }
}

fn into_completion(response: GenerateContentResponse) -> Result<Completion, LlmError> {
    let usage = response.usage_metadata.map(|u| TokenUsage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
    });

    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .map_or_else(|| "no candidates".to_owned(), |r| format!("prompt blocked: {r}"));
        return Err(LlmError::EmptyResponse { reason });
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    debug!(
        finish_reason = candidate.finish_reason.as_deref().unwrap_or("none"),
        chars = text.len(),
        "completion decoded"
    );

    Ok(Completion {
        text,
        usage,
        finish_reason: candidate.finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use pipeline::Message;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new(GeminiConfig {
            base_url: server.uri(),
            ..GeminiConfig::new("test-key")
        })
        .unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_instruction: Some("Explain briefly.".into()),
            contents: vec![Message::user_text("sales by month")],
            temperature: Some(0.2),
        }
    }

    #[tokio::test]
    async fn decodes_candidate_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "Explain briefly."}]},
                "generationConfig": {"temperature": 0.2}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{"text": "Sales peak "}, {"text": "in December."}]
                    },
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = provider(&server).await.complete(&request()).await.unwrap();

        assert_eq!(completion.text, "Sales peak in December.");
        assert_eq!(completion.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 5
            })
        );
    }

    #[tokio::test]
    async fn rate_limit_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "9"))
            .mount(&server)
            .await;

        let err = provider(&server).await.complete(&request()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(9))
            }
        );
        assert!(err.retry_policy().is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = provider(&server).await.complete(&request()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::Api {
                status: 400,
                message: "API key not valid".into()
            }
        );
        assert!(!err.retry_policy().is_retryable());
    }

    #[tokio::test]
    async fn blocked_prompt_is_an_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server).await.complete(&request()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::EmptyResponse {
                reason: "prompt blocked: SAFETY".into()
            }
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = GeminiProvider::new(GeminiConfig::new("  ")).unwrap_err();
        assert!(matches!(err, LlmError::Misconfigured { .. }));
    }
}
