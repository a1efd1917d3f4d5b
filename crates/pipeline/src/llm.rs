//! LLM provider port.
//!
//! The `llm` crate implements [`LlmProvider`] for concrete APIs; the `nodes`
//! crate's LLM step consumes it. Nothing here performs I/O.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{InvocationError, Message, RetryPolicy};

/// One completion request: a system instruction plus the conversation turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Rendered instruction for the model. `None` sends no system instruction.
    pub system_instruction: Option<String>,
    /// Conversation turns, oldest first.
    pub contents: Vec<Message>,
    /// Sampling temperature. `None` uses the provider default.
    pub temperature: Option<f32>,
}

/// Token usage reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

/// A provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Concatenated response text.
    pub text: String,
    /// Usage counters, if the provider reported them.
    pub usage: Option<TokenUsage>,
    /// Provider-specific finish reason (e.g. `"STOP"`, `"MAX_TOKENS"`).
    pub finish_reason: Option<String>,
}

/// Errors from an LLM provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// The request never produced an HTTP response (connect failure, timeout).
    #[error("Transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
    },

    /// The provider throttled the request.
    #[error("Rate limited by provider")]
    RateLimited {
        /// Delay suggested by the provider's `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// The provider answered with an error status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body or description.
        message: String,
    },

    /// The provider answered successfully but returned no usable text.
    #[error("Empty response: {reason}")]
    EmptyResponse {
        /// Why nothing usable was returned (e.g. a safety block).
        reason: String,
    },

    /// The response body could not be decoded.
    #[error("Malformed response: {message}")]
    Malformed {
        /// Decoder error.
        message: String,
    },

    /// The provider is not usable as configured (e.g. missing API key).
    #[error("Provider misconfigured: {message}")]
    Misconfigured {
        /// Description of the problem.
        message: String,
    },
}

impl LlmError {
    /// Whether repeating the same request could succeed.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transport { .. } => RetryPolicy::Retryable { after: None },
            Self::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Api { status, .. } if *status >= 500 => RetryPolicy::Retryable { after: None },
            Self::Api { .. }
            | Self::EmptyResponse { .. }
            | Self::Malformed { .. }
            | Self::Misconfigured { .. } => RetryPolicy::NonRetryable,
        }
    }
}

impl From<LlmError> for InvocationError {
    fn from(err: LlmError) -> Self {
        Self {
            retry: err.retry_policy(),
            message: err.to_string(),
        }
    }
}

/// A text-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Sends one completion request.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_follows_status_class() {
        let server = LlmError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        let client = LlmError::Api {
            status: 400,
            message: "bad request".into(),
        };
        assert!(server.retry_policy().is_retryable());
        assert!(!client.retry_policy().is_retryable());
    }

    #[test]
    fn rate_limit_carries_backoff_into_invocation_error() {
        let err: InvocationError = LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        }
        .into();
        assert_eq!(
            err.retry,
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(7))
            }
        );
    }
}
