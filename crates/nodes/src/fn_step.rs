//! Closure-backed steps, for local actions that need no adapter crate (a
//! query executor, a formatter, a test fake).

use std::future::Future;

use async_trait::async_trait;
use pipeline::{InvocationError, StateValue, StepCapability, StepInput};

/// Wraps an async closure as a [`StepCapability`].
///
/// ```ignore
/// let upper = FnStep::new(|input: StepInput| async move {
///     Ok(json!(input.message().text().to_uppercase()))
/// });
/// ```
pub struct FnStep<F> {
    f: F,
}

impl<F, Fut> FnStep<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateValue, InvocationError>> + Send,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StepCapability for FnStep<F>
where
    F: Fn(StepInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StateValue, InvocationError>> + Send,
{
    async fn invoke(&self, input: &StepInput) -> Result<StateValue, InvocationError> {
        (self.f)(input.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use pipeline::{Message, SessionState, StepName};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn closure_sees_message_and_state() {
        let step = FnStep::new(|input: StepInput| async move {
            let prior = input.state().get_text("sql_query").unwrap_or_default();
            Ok(json!(format!("{prior} -- {}", input.message().text())))
        });

        let state: SessionState = [(
            pipeline::OutputKey::new("sql_query").unwrap(),
            json!("SELECT 1"),
        )]
        .into_iter()
        .collect();
        let input = StepInput::new(
            StepName::new("annotate").unwrap(),
            0,
            state,
            Arc::new(Message::user_text("why")),
            BTreeMap::new(),
        );

        assert_eq!(step.invoke(&input).await.unwrap(), json!("SELECT 1 -- why"));
    }
}
