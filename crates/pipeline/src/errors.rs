//! Top-level error and retry-policy types for the Baton pipeline domain.
//!
//! [`BatonError`] covers every condition that stops a run or rejects a
//! request. It is `Clone` and serialisable because it travels by value inside
//! the terminal [`crate::Event`] of a run rather than being returned across the
//! streaming boundary.
//!
//! [`InvocationError`] is what a [`crate::StepCapability`] returns. The runner
//! wraps it into [`BatonError::StepExecutionError`] together with the step
//! that failed.
//!
//! [`RetryPolicy`] is advisory: the runner never retries, but callers that
//! re-submit a failed run can use it to decide whether and when to do so.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SessionId, StepName};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether a failed invocation is safe to retry and, if so, after what delay.
///
/// - `Retryable`: upstream timeouts, transient rate-limit responses, 5xx.
/// - `NonRetryable`: malformed requests, rejected credentials, malformed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The invocation may be retried by the caller.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// Retrying will produce the same failure.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Step capability errors
// ---------------------------------------------------------------------------

/// Failure reported by a step's external capability.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct InvocationError {
    /// Human-readable description of what went wrong upstream.
    pub message: String,
    /// Whether re-submitting the run could succeed.
    pub retry: RetryPolicy,
}

impl InvocationError {
    /// Creates a non-retryable invocation error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::NonRetryable,
        }
    }

    /// Creates a retryable invocation error with an optional back-off hint.
    pub fn transient(message: impl Into<String>, after: Option<Duration>) -> Self {
        Self {
            message: message.into(),
            retry: RetryPolicy::Retryable { after },
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that reject a request or halt a pipeline run.
///
/// Construction-time problems ([`BatonError::ConfigurationError`]) are returned
/// directly from the builder. Everything else is delivered to the consumer as
/// the `error` field of the run's terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatonError {
    /// The pipeline definition is invalid. Raised at construction, never at run time.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },

    /// The session is unknown to this runner, or belongs to another owner or namespace.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The session the caller asked for.
        session_id: SessionId,
    },

    /// The session is already hosting a run.
    #[error("Session busy: {session_id}")]
    SessionBusy {
        /// The session the caller asked for.
        session_id: SessionId,
    },

    /// The submitted message is empty or malformed. No step was executed.
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// Why the message was rejected.
        reason: String,
    },

    /// A step's capability failed. Steps after it were not started.
    #[error("Step '{step}' (#{index}) failed: {message}")]
    StepExecutionError {
        /// Name of the failing step.
        step: StepName,
        /// Zero-based position of the failing step in the pipeline.
        index: usize,
        /// Upstream failure description.
        message: String,
        /// Whether re-submitting the run could succeed.
        retry: RetryPolicy,
    },

    /// The session registry is full.
    #[error("Session registry at capacity ({capacity})")]
    ResourceExhausted {
        /// Configured maximum number of live sessions.
        capacity: usize,
    },

    /// The run exceeded its overall deadline.
    #[error("Run timed out after {after_ms}ms")]
    TimedOut {
        /// The deadline that expired, in milliseconds.
        after_ms: u64,
    },

    /// The run was cancelled through its cancellation token.
    #[error("Run cancelled")]
    Cancelled,

    /// The runner is shutting down and accepts no new runs.
    #[error("Runner is shutting down")]
    ShutDown,

    /// A consumer's event handler failed; consumption stopped.
    #[error("Event consumer failed: {message}")]
    StreamConsumerError {
        /// The handler's error message.
        message: String,
    },
}

impl BatonError {
    /// Shorthand for [`BatonError::ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Shorthand for [`BatonError::InvalidMessage`].
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Wraps a capability failure with the step that produced it.
    pub fn step_failed(step: &StepName, index: usize, err: InvocationError) -> Self {
        Self::StepExecutionError {
            step: step.clone(),
            index,
            message: err.message,
            retry: err.retry,
        }
    }

    /// Stable snake_case tag, suitable for log fields and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigurationError { .. } => "configuration_error",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::SessionBusy { .. } => "session_busy",
            Self::InvalidMessage { .. } => "invalid_message",
            Self::StepExecutionError { .. } => "step_execution_error",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::ShutDown => "shut_down",
            Self::StreamConsumerError { .. } => "stream_consumer_error",
        }
    }

    /// Returns `true` when the error was caused by the request rather than by
    /// a step or the runtime.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound { .. } | Self::SessionBusy { .. } | Self::InvalidMessage { .. }
        )
    }

    /// The failing step, if this error came from one.
    pub fn failed_step(&self) -> Option<(&StepName, usize)> {
        match self {
            Self::StepExecutionError { step, index, .. } => Some((step, *index)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_keeps_retry_policy() {
        let step = StepName::new("review").unwrap();
        let err = BatonError::step_failed(
            &step,
            1,
            InvocationError::transient("503 from upstream", Some(Duration::from_secs(2))),
        );

        assert_eq!(err.kind(), "step_execution_error");
        assert_eq!(err.failed_step(), Some((&step, 1)));
        match err {
            BatonError::StepExecutionError { retry, .. } => assert!(retry.is_retryable()),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn caller_errors_are_classified() {
        assert!(BatonError::invalid_message("empty").is_caller_error());
        assert!(!BatonError::Cancelled.is_caller_error());
        assert!(!BatonError::configuration("bad").is_caller_error());
    }

    #[test]
    fn serialises_with_kind_tag() {
        let json = serde_json::to_value(BatonError::TimedOut { after_ms: 1500 }).unwrap();
        assert_eq!(json["kind"], "timed_out");
        assert_eq!(json["after_ms"], 1500);

        let back: BatonError = serde_json::from_value(json).unwrap();
        assert_eq!(back, BatonError::TimedOut { after_ms: 1500 });
    }
}
