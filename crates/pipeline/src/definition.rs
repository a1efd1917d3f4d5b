//! Pipeline definitions: an ordered, immutable list of steps.
//!
//! A [`Pipeline`] only defines execution order. It holds no run state and can
//! be shared (behind an `Arc`) by any number of concurrent runs.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::{BatonError, OutputKey, PipelineName, StepDescriptor};

/// An ordered, validated sequence of steps executed start to end with no
/// branching, retries or skipping.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: PipelineName,
    description: String,
    steps: Arc<[StepDescriptor]>,
}

impl Pipeline {
    /// Starts building a pipeline called `name`.
    pub fn builder(name: PipelineName) -> PipelineBuilder {
        PipelineBuilder {
            name,
            description: String::new(),
            steps: Vec::new(),
            allow_empty: false,
        }
    }

    /// The pipeline's name.
    pub fn name(&self) -> &PipelineName {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` for a zero-step (no-op) pipeline.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every key some step writes, in step order, without duplicates.
    pub fn output_keys(&self) -> Vec<&OutputKey> {
        let mut keys: Vec<&OutputKey> = Vec::new();
        for step in self.steps.iter() {
            if !keys.contains(&step.output_key()) {
                keys.push(step.output_key());
            }
        }
        keys
    }
}

/// Builder for [`Pipeline`]; validation happens in [`PipelineBuilder::build`].
#[derive(Debug)]
pub struct PipelineBuilder {
    name: PipelineName,
    description: String,
    steps: Vec<StepDescriptor>,
    allow_empty: bool,
}

impl PipelineBuilder {
    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a step.
    pub fn step(mut self, step: StepDescriptor) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends several steps, in order.
    pub fn steps(mut self, steps: impl IntoIterator<Item = StepDescriptor>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Accepts a pipeline with no steps. Without this, an empty step list is
    /// treated as a configuration mistake.
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Validates and freezes the pipeline.
    ///
    /// # Errors
    ///
    /// [`BatonError::ConfigurationError`] when:
    /// - there are no steps and [`PipelineBuilder::allow_empty`] was not called;
    /// - two steps share a name;
    /// - a step requires a key that no earlier step writes.
    pub fn build(self) -> Result<Pipeline, BatonError> {
        if self.steps.is_empty() && !self.allow_empty {
            return Err(BatonError::configuration(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }

        let mut names = HashSet::new();
        let mut produced: HashSet<&OutputKey> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if !names.insert(step.name()) {
                return Err(BatonError::configuration(format!(
                    "pipeline '{}' has more than one step named '{}'",
                    self.name,
                    step.name()
                )));
            }
            for key in step.required_keys() {
                if !produced.contains(key) {
                    return Err(BatonError::configuration(format!(
                        "step '{}' (#{index}) of pipeline '{}' requires '{key}', \
                         which no earlier step produces",
                        step.name(),
                        self.name
                    )));
                }
            }
            produced.insert(step.output_key());
        }

        debug!(pipeline = %self.name, steps = self.steps.len(), "pipeline built");
        Ok(Pipeline {
            name: self.name,
            description: self.description,
            steps: self.steps.into(),
        })
    }
}
