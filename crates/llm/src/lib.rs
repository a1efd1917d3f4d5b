//! Baton LLM provider infrastructure adapter.
//!
//! Implements the [`pipeline::LlmProvider`] trait for Google's Gemini API.
//! Additional providers are added as new modules in this crate without any
//! changes to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing
//! and error classification live here. The [`pipeline`] crate sees only
//! [`pipeline::LlmProvider`].

pub mod gemini;
mod types;

pub use gemini::{GeminiConfig, GeminiProvider, DEFAULT_BASE_URL, DEFAULT_MODEL};
