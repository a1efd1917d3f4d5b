//! Layered configuration.
//!
//! Sources, lowest priority first:
//! 1. Compiled defaults ([`Config::default`])
//! 2. `baton.toml` in the working directory, or the file given with `--config`
//! 3. `BATON_*` environment variables, `__` separating nested keys
//!    (`BATON_RUNNER__MAX_SESSIONS=64`)
//!
//! The LLM API key additionally falls back to `GOOGLE_API_KEY` and then
//! `GEMINI_API_KEY` when no layer sets it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "baton.toml";

/// Environment variables consulted, in order, when `llm.api_key` is unset.
pub const API_KEY_FALLBACKS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A path passed with `--config` does not exist.
    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// A layer could not be read or does not match the schema.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fully merged configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `[llm]`: provider connection.
    pub llm: LlmSettings,
    /// `[runner]`: session capacity, deadlines and shutdown.
    pub runner: RunnerSettings,
    /// `[telemetry]`: log format and trace export.
    pub telemetry: TelemetrySettings,
    /// Pipelines to offer. Empty means the built-in catalogue.
    pub pipelines: Vec<PipelineSpec>,
}

/// Gemini connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// API key. Falls back to `GOOGLE_API_KEY` / `GEMINI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Endpoint root, overridable for proxies and tests.
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: llm::DEFAULT_MODEL.to_owned(),
            base_url: llm::DEFAULT_BASE_URL.to_owned(),
            request_timeout_secs: 60,
        }
    }
}

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Default overall deadline per run; unset means none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    /// How long shutdown waits for runs, before and after cancelling them.
    pub shutdown_grace_secs: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            run_timeout_secs: None,
            shutdown_grace_secs: 5,
        }
    }
}

impl RunnerSettings {
    /// [`RunnerSettings::run_timeout_secs`] as a duration.
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// [`RunnerSettings::shutdown_grace_secs`] as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Observability settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Emit JSON log lines instead of human-readable output.
    pub json_logs: bool,
    /// OTLP gRPC endpoint. Traces are exported only when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
    /// `service.name` resource attribute and tracer name.
    pub service_name: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            json_logs: false,
            otlp_endpoint: None,
            service_name: "baton".to_owned(),
        }
    }
}

/// A pipeline declared in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Name used on the command line; also the session namespace.
    pub name: String,
    /// One-line summary shown by `baton list`.
    #[serde(default)]
    pub description: String,
    /// Steps, in execution order.
    pub steps: Vec<StepSpec>,
}

/// One LLM step of a configured pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name, unique within the pipeline.
    pub name: String,
    /// What the step does.
    #[serde(default)]
    pub description: String,
    /// Instruction template; `{key}` placeholders read earlier outputs.
    pub instruction: String,
    /// State key the step's output is stored under.
    pub output_key: String,
    /// Sampling temperature; the model default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Config {
    /// Loads configuration from every layer and validates it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingFile`] if an explicit `path` does not exist,
    /// [`ConfigError::Load`] on a malformed layer and [`ConfigError::Invalid`]
    /// when values are out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::MissingFile(path.into())),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed("BATON_").split("__"))
            .extract()
            .map_err(Box::new)?;

        if config.llm.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            config.llm.api_key = API_KEY_FALLBACKS
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".into()));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm.request_timeout_secs must be positive".into(),
            ));
        }
        if self.runner.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "runner.max_sessions must be positive".into(),
            ));
        }
        if self.runner.run_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "runner.run_timeout_secs must be positive when set".into(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for pipeline in &self.pipelines {
            if !seen.insert(pipeline.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "pipeline '{}' is defined twice",
                    pipeline.name
                )));
            }
        }
        Ok(())
    }

    /// Gemini connection settings; the key may still be empty here.
    pub fn gemini(&self) -> llm::GeminiConfig {
        llm::GeminiConfig {
            api_key: self.llm.api_key.clone().unwrap_or_default(),
            model: self.llm.model.clone(),
            base_url: self.llm.base_url.clone(),
            request_timeout: Duration::from_secs(self.llm.request_timeout_secs),
        }
    }
}
