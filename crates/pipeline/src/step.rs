//! Step descriptors and the capability port each step delegates to.
//!
//! A [`StepDescriptor`] is immutable configuration: a name, a description, the
//! [`OutputKey`] its result is written under, the keys it reads, and the
//! [`StepCapability`] that computes the result. Steps never hold run state of
//! their own; everything they see arrives through [`StepInput`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{InvocationError, Message, OutputKey, SessionState, StateValue, StepName};

// ---------------------------------------------------------------------------
// Capability port
// ---------------------------------------------------------------------------

/// The external action behind a step: an LLM call, a query executor, a
/// renderer.
///
/// Implementations must be safe to invoke again for the same input. The
/// runner never retries on its own, but callers may re-submit a run, and
/// external retry wrappers may call `invoke` more than once.
///
/// Per-call timeouts belong to the implementation; the runner only enforces
/// an optional overall run deadline.
#[async_trait]
pub trait StepCapability: Send + Sync {
    /// Computes this step's output from the state accumulated so far.
    async fn invoke(&self, input: &StepInput) -> Result<StateValue, InvocationError>;
}

// ---------------------------------------------------------------------------
// Step input view
// ---------------------------------------------------------------------------

/// Read-only view handed to a capability: a snapshot of the session state
/// plus the message that started the run.
///
/// The snapshot is taken after the previous step's output was merged, so it
/// contains every output produced earlier in the run.
#[derive(Debug, Clone)]
pub struct StepInput {
    step: StepName,
    index: usize,
    state: SessionState,
    message: Arc<Message>,
    resolved: BTreeMap<OutputKey, StateValue>,
}

impl StepInput {
    /// Assembles an input view. `resolved` holds the step's declared
    /// dependencies, already looked up in `state`.
    pub fn new(
        step: StepName,
        index: usize,
        state: SessionState,
        message: Arc<Message>,
        resolved: BTreeMap<OutputKey, StateValue>,
    ) -> Self {
        Self {
            step,
            index,
            state,
            message,
            resolved,
        }
    }

    /// Name of the step being invoked.
    pub fn step(&self) -> &StepName {
        &self.step
    }

    /// Zero-based position of the step in its pipeline.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The full session state snapshot.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The message that started this run.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// A declared dependency's value. Always `Some` for keys listed in
    /// [`StepDescriptor::requires`].
    pub fn dependency(&self, key: &str) -> Option<&StateValue> {
        self.resolved.get(key)
    }

    /// All declared dependencies.
    pub fn dependencies(&self) -> &BTreeMap<OutputKey, StateValue> {
        &self.resolved
    }
}

// ---------------------------------------------------------------------------
// Step descriptor
// ---------------------------------------------------------------------------

/// One step of a pipeline.
#[derive(Clone)]
pub struct StepDescriptor {
    name: StepName,
    description: String,
    output_key: OutputKey,
    requires: Vec<OutputKey>,
    capability: Arc<dyn StepCapability>,
}

impl StepDescriptor {
    /// Creates a step with no declared dependencies.
    pub fn new(
        name: StepName,
        description: impl Into<String>,
        output_key: OutputKey,
        capability: Arc<dyn StepCapability>,
    ) -> Self {
        Self {
            name,
            description: description.into(),
            output_key,
            requires: Vec::new(),
            capability,
        }
    }

    /// Declares keys this step reads. Each must be produced by an earlier
    /// step; [`crate::PipelineBuilder::build`] enforces this.
    pub fn requires(mut self, keys: impl IntoIterator<Item = OutputKey>) -> Self {
        for key in keys {
            if !self.requires.contains(&key) {
                self.requires.push(key);
            }
        }
        self
    }

    /// The step's identifying name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The state key this step's result is written under.
    pub fn output_key(&self) -> &OutputKey {
        &self.output_key
    }

    /// Keys this step reads from earlier steps.
    pub fn required_keys(&self) -> &[OutputKey] {
        &self.requires
    }

    /// The capability that computes this step's output.
    pub fn capability(&self) -> &Arc<dyn StepCapability> {
        &self.capability
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("output_key", &self.output_key)
            .field("requires", &self.requires)
            .finish_non_exhaustive()
    }
}
