//! Core domain for Baton: sequential, state-threading pipelines.
//!
//! A pipeline is an ordered list of steps. Each step reads the session state
//! accumulated by the steps before it, computes one value through an external
//! capability, and publishes that value under its output key. This crate
//! defines those concepts and the ports external capabilities plug into.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! The runner that drives pipelines lives in `nodes`; provider adapters live
//! in `llm`.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`SessionId`, `StepName`, `OutputKey`, ...) |
//! | [`types`] | `Message`, `SessionState`, `Timestamp` |
//! | [`step`] | `StepDescriptor`, `StepInput`, the `StepCapability` port |
//! | [`definition`] | `Pipeline` and its validating builder |
//! | [`template`] | `{key}` instruction templates |
//! | [`session`] | `Session` and `RunStatus` |
//! | [`event`] | `Event`, the unit of the run stream |
//! | [`llm`] | The `LlmProvider` port |
//! | [`errors`] | `BatonError`, `InvocationError`, `RetryPolicy` |

pub mod definition;
pub mod errors;
pub mod event;
pub mod identifiers;
pub mod llm;
pub mod session;
pub mod step;
pub mod template;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use definition::{Pipeline, PipelineBuilder};
pub use errors::{BatonError, InvocationError, RetryPolicy};
pub use event::Event;
pub use identifiers::{Namespace, OutputKey, OwnerId, PipelineName, RunId, SessionId, StepName};
pub use llm::{Completion, CompletionRequest, LlmError, LlmProvider, TokenUsage};
pub use session::{RunStatus, Session};
pub use step::{StepCapability, StepDescriptor, StepInput};
pub use template::{MissingStateKey, Template};
pub use types::{value_as_text, Message, Part, Role, SessionState, StateValue, Timestamp};
