//! LLM-backed step: renders an instruction template against the session
//! state and asks an [`LlmProvider`] for a completion.
//!
//! The step's declared dependencies are the template's `{key}` placeholders,
//! so a pipeline that references an output no earlier step produces fails at
//! construction.

use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    BatonError, CompletionRequest, InvocationError, LlmProvider, OutputKey, StateValue,
    StepCapability, StepDescriptor, StepInput, StepName, Template,
};
use tracing::debug;

/// A step whose capability is one LLM completion.
pub struct LlmStep {
    provider: Arc<dyn LlmProvider>,
    instruction: Template,
    temperature: Option<f32>,
}

impl LlmStep {
    /// Creates a step that sends `instruction` (a [`Template`]) as the system
    /// instruction and the run's message as the user turn.
    ///
    /// # Errors
    ///
    /// [`BatonError::ConfigurationError`] if `instruction` is not a valid template.
    pub fn new(provider: Arc<dyn LlmProvider>, instruction: &str) -> Result<Self, BatonError> {
        Ok(Self {
            provider,
            instruction: Template::parse(instruction)?,
            temperature: None,
        })
    }

    /// Overrides the provider's default sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// The parsed instruction.
    pub fn instruction(&self) -> &Template {
        &self.instruction
    }

    /// Wraps this step in a descriptor whose dependencies are the template's
    /// required keys.
    pub fn into_descriptor(
        self,
        name: StepName,
        description: impl Into<String>,
        output_key: OutputKey,
    ) -> StepDescriptor {
        let requires = self.instruction.required_keys();
        StepDescriptor::new(name, description, output_key, Arc::new(self)).requires(requires)
    }
}

#[async_trait]
impl StepCapability for LlmStep {
    async fn invoke(&self, input: &StepInput) -> Result<StateValue, InvocationError> {
        let instruction = self
            .instruction
            .render(input.state())
            .map_err(|e| InvocationError::permanent(e.to_string()))?;

        let request = CompletionRequest {
            system_instruction: (!instruction.trim().is_empty()).then_some(instruction),
            contents: vec![input.message().clone()],
            temperature: self.temperature,
        };
        debug!(
            step = %input.step(),
            model = self.provider.model(),
            instruction_len = request.system_instruction.as_ref().map_or(0, String::len),
            "requesting completion"
        );

        let completion = self.provider.complete(&request).await?;
        if completion.text.trim().is_empty() {
            return Err(InvocationError::permanent(format!(
                "model returned no text (finish reason: {})",
                completion.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        debug!(
            step = %input.step(),
            output_len = completion.text.len(),
            usage = ?completion.usage,
            "completion received"
        );
        Ok(StateValue::String(completion.text))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;
    use pipeline::{Completion, LlmError, Message, SessionState};
    use serde_json::json;

    use super::*;

    /// Records requests and answers from a fixed script.
    struct ScriptedProvider {
        reply: Result<Completion, LlmError>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(Completion {
                    text: text.into(),
                    usage: None,
                    finish_reason: Some("STOP".into()),
                }),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.seen.lock().push(request.clone());
            self.reply.clone()
        }
    }

    fn input(state: SessionState) -> StepInput {
        StepInput::new(
            StepName::new("explanation").unwrap(),
            2,
            state,
            Arc::new(Message::user_text("top products")),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn renders_instruction_from_state() {
        let provider = ScriptedProvider::replying("Bikes lead revenue.");
        let step = LlmStep::new(provider.clone(), "Explain the chart:\n{chart_spec}").unwrap();

        let state: SessionState = [(OutputKey::new("chart_spec").unwrap(), json!("bar chart"))]
            .into_iter()
            .collect();
        let value = step.invoke(&input(state)).await.unwrap();

        assert_eq!(value, json!("Bikes lead revenue."));
        let seen = provider.seen.lock();
        assert_eq!(
            seen[0].system_instruction.as_deref(),
            Some("Explain the chart:\nbar chart")
        );
        assert_eq!(seen[0].contents[0].text(), "top products");
    }

    #[tokio::test]
    async fn empty_completion_is_a_permanent_failure() {
        let provider = ScriptedProvider::replying("   ");
        let step = LlmStep::new(provider, "Say something").unwrap();

        let err = step.invoke(&input(SessionState::new())).await.unwrap_err();
        assert!(!err.retry.is_retryable());
        assert!(err.message.contains("STOP"));
    }

    #[tokio::test]
    async fn provider_errors_keep_their_retry_policy() {
        let provider = Arc::new(ScriptedProvider {
            reply: Err(LlmError::Api {
                status: 502,
                message: "bad gateway".into(),
            }),
            seen: Mutex::new(Vec::new()),
        });
        let step = LlmStep::new(provider, "x").unwrap();

        let err = step.invoke(&input(SessionState::new())).await.unwrap_err();
        assert!(err.retry.is_retryable());
    }

    #[test]
    fn descriptor_requires_template_keys() {
        let step = LlmStep::new(
            ScriptedProvider::replying("x"),
            "Refactor {generated_code} using {review_comments} and {style_notes?}",
        )
        .unwrap();
        let descriptor = step.into_descriptor(
            StepName::new("code_refactorer").unwrap(),
            "Refactors code",
            OutputKey::new("refactored_code").unwrap(),
        );
        let keys: Vec<_> = descriptor.required_keys().iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, ["generated_code", "review_comments"]);
    }
}
