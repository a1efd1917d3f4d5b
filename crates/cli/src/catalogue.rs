//! Pipeline catalogue: the pipelines this binary can run, and how to turn a
//! declared pipeline into a [`Runner`].

use std::sync::Arc;

use nodes::{LlmStep, Runner, RunnerConfig};
use pipeline::{BatonError, LlmProvider, OutputKey, Pipeline, PipelineName, StepName};

use crate::config::{Config, PipelineSpec, StepSpec};

/// Pipeline used by `baton refine`.
pub const EDITOR_PIPELINE: &str = "campaign_editor";

/// Declared pipelines, in listing order.
#[derive(Debug, Clone)]
pub struct Catalogue {
    pipelines: Vec<PipelineSpec>,
}

impl Catalogue {
    /// The configured pipelines, or the built-in set when none are configured.
    pub fn from_config(config: &Config) -> Self {
        let pipelines = if config.pipelines.is_empty() {
            builtin()
        } else {
            config.pipelines.clone()
        };
        Self { pipelines }
    }

    /// Every pipeline, in listing order.
    pub fn iter(&self) -> impl Iterator<Item = &PipelineSpec> {
        self.pipelines.iter()
    }

    /// The pipeline called `name`.
    pub fn get(&self, name: &str) -> Option<&PipelineSpec> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

/// Builds a validated pipeline of [`LlmStep`]s sharing `provider`.
///
/// # Errors
///
/// [`BatonError::ConfigurationError`] for blank names, bad templates, or a
/// step that reads an output no earlier step produces.
pub fn build_pipeline(
    spec: &PipelineSpec,
    provider: &Arc<dyn LlmProvider>,
) -> Result<Pipeline, BatonError> {
    let name = PipelineName::new(spec.name.as_str())
        .ok_or_else(|| BatonError::configuration("pipeline name must not be blank"))?;

    let steps = spec
        .steps
        .iter()
        .map(|step| build_step(step, provider))
        .collect::<Result<Vec<_>, _>>()?;

    Pipeline::builder(name)
        .description(spec.description.clone())
        .steps(steps)
        .build()
}

fn build_step(
    spec: &StepSpec,
    provider: &Arc<dyn LlmProvider>,
) -> Result<pipeline::StepDescriptor, BatonError> {
    let name = StepName::new(spec.name.as_str())
        .ok_or_else(|| BatonError::configuration("step name must not be blank"))?;
    let output_key = OutputKey::new(spec.output_key.as_str()).ok_or_else(|| {
        BatonError::configuration(format!("step '{}' has a blank output key", spec.name))
    })?;

    let mut step = LlmStep::new(Arc::clone(provider), &spec.instruction)?;
    if let Some(temperature) = spec.temperature {
        step = step.with_temperature(temperature);
    }
    Ok(step.into_descriptor(name, spec.description.clone(), output_key))
}

/// Builds the runner for `spec` with the configured runner settings.
///
/// # Errors
///
/// See [`build_pipeline`].
pub fn build_runner(
    spec: &PipelineSpec,
    provider: &Arc<dyn LlmProvider>,
    config: &Config,
) -> Result<Runner, BatonError> {
    let pipeline = build_pipeline(spec, provider)?;
    Ok(Runner::new(
        pipeline,
        RunnerConfig {
            namespace: None,
            max_sessions: config.runner.max_sessions,
            run_timeout: config.runner.run_timeout(),
        },
    ))
}

/// The message the editor pipeline expects.
pub fn refine_message(current: &str, instruction: &str) -> String {
    format!("CURRENT OUTPUT:\n{current}\n\nREFINE INSTRUCTION:\n{instruction}")
}

fn step(name: &str, description: &str, output_key: &str, instruction: &str) -> StepSpec {
    StepSpec {
        name: name.to_owned(),
        description: description.to_owned(),
        instruction: instruction.to_owned(),
        output_key: output_key.to_owned(),
        temperature: None,
    }
}

/// Built-in pipelines.
pub fn builtin() -> Vec<PipelineSpec> {
    vec![
        PipelineSpec {
            name: "insights".into(),
            description: "Question to SQL, chart specification and a plain-language explanation"
                .into(),
            steps: vec![
                step(
                    "text_to_sql",
                    "Translates a business question into SQL",
                    "sql_query",
                    "Translate the user's question into a single read-only SQL query. \
                     Return only the SQL.",
                ),
                step(
                    "visualization",
                    "Suggests a chart for the query result",
                    "chart_spec",
                    "Given this SQL query:\n{sql_query}\n\nPropose a chart as JSON with \
                     fields `type`, `x` and `y`. Return only the JSON.",
                ),
                step(
                    "explanation",
                    "Explains what the result means",
                    "explanation_text",
                    "Explain in two or three sentences what the query below answers and \
                     how to read the chart.\n\nSQL:\n{sql_query}\n\nChart:\n{chart_spec}",
                ),
            ],
        },
        PipelineSpec {
            name: "code".into(),
            description: "Write, review and refactor a piece of code".into(),
            steps: vec![
                step(
                    "code_writer",
                    "Writes code for the request",
                    "generated_code",
                    "Write code that fulfils the user's request. Return only the code.",
                ),
                step(
                    "code_reviewer",
                    "Reviews the generated code",
                    "review_comments",
                    "Review this code and list concrete problems:\n{generated_code}",
                ),
                step(
                    "code_refactorer",
                    "Applies the review",
                    "refactored_code",
                    "Rewrite the code to address the review. Return only the code.\n\n\
                     Code:\n{generated_code}\n\nReview:\n{review_comments}",
                ),
            ],
        },
        PipelineSpec {
            name: "campaign".into(),
            description: "Marketing campaign: strategist direction, then copywriter posts".into(),
            steps: vec![
                step(
                    "strategist",
                    "Sets the campaign direction",
                    "strategy_text",
                    "Define audience, key message and tone for the campaign the user \
                     describes. Be brief.",
                ),
                step(
                    "copywriter",
                    "Writes the campaign posts",
                    "campaign_text",
                    "Write the campaign posts following this strategy:\n{strategy_text}",
                ),
            ],
        },
        PipelineSpec {
            name: EDITOR_PIPELINE.into(),
            description: "Refines an existing campaign text according to an instruction".into(),
            steps: vec![step(
                "editor",
                "Applies the refinement instruction",
                "refined_text",
                "You receive the current output and a refinement instruction. Apply the \
                 instruction, keep the structure and headings, and return only the \
                 improved text.",
            )],
        },
    ]
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pipeline::{Completion, CompletionRequest, LlmError};

    use super::*;

    struct Silent;

    #[async_trait]
    impl LlmProvider for Silent {
        fn model(&self) -> &str {
            "silent"
        }

        async fn complete(&self, _: &CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::EmptyResponse {
                reason: "silent".into(),
            })
        }
    }

    fn provider() -> Arc<dyn LlmProvider> {
        Arc::new(Silent)
    }

    #[test]
    fn every_builtin_pipeline_builds() {
        for spec in builtin() {
            let pipeline = build_pipeline(&spec, &provider())
                .unwrap_or_else(|e| panic!("{}: {e}", spec.name));
            assert_eq!(pipeline.len(), spec.steps.len());
        }
    }

    #[test]
    fn builtin_dependencies_follow_step_order() {
        let code = builtin().into_iter().find(|p| p.name == "code").unwrap();
        let pipeline = build_pipeline(&code, &provider()).unwrap();
        let refactorer = &pipeline.steps()[2];
        let required: Vec<&str> = refactorer.required_keys().iter().map(|k| k.as_str()).collect();
        assert_eq!(required, ["generated_code", "review_comments"]);
    }

    #[test]
    fn configured_pipelines_replace_builtins() {
        let mut config = Config::default();
        assert!(Catalogue::from_config(&config).get("insights").is_some());

        config.pipelines = vec![PipelineSpec {
            name: "solo".into(),
            description: String::new(),
            steps: vec![step("only", "", "answer", "Answer.")],
        }];
        let catalogue = Catalogue::from_config(&config);
        assert!(catalogue.get("insights").is_none());
        assert_eq!(catalogue.iter().count(), 1);
    }

    #[test]
    fn step_reading_a_later_output_is_rejected() {
        let spec = PipelineSpec {
            name: "backwards".into(),
            description: String::new(),
            steps: vec![
                step("first", "", "a", "Use {b}."),
                step("second", "", "b", "Produce b."),
            ],
        };
        let err = build_pipeline(&spec, &provider()).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn refine_message_has_both_sections() {
        assert_eq!(
            refine_message("Old text", "Shorter"),
            "CURRENT OUTPUT:\nOld text\n\nREFINE INSTRUCTION:\nShorter"
        );
    }
}
