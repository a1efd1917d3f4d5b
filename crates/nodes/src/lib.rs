//! Baton pipeline runner and step implementations.
//!
//! This crate drives pipelines defined in the [`pipeline`] crate: it owns the
//! session registry, executes steps in order, and streams one event per
//! completed step to the caller.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The runner sequences calls to step capabilities
//! and merges their outputs; it contains no domain rules of its own and knows
//! nothing about what a capability does.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`runner`] | `Runner`, `RunOptions`, `EventStream` |
//! | [`registry`] | `SessionRegistry`, `SessionHandle` |
//! | [`llm_step`] | `LlmStep`: template-rendering LLM capability |
//! | [`fn_step`] | `FnStep`: closure capability |
//! | [`consumer`] | `collect` / `consume` helpers for event streams |

pub mod consumer;
pub mod fn_step;
pub mod llm_step;
pub mod registry;
pub mod runner;

pub use consumer::{collect, consume, RunReport};
pub use fn_step::FnStep;
pub use llm_step::LlmStep;
pub use registry::{RunLease, SessionHandle, SessionRegistry};
pub use runner::{EventStream, RunOptions, Runner, RunnerConfig, Submission};
