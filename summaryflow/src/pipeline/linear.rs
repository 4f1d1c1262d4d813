//! Sequential pipeline execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::PipelineBuilder;
use crate::context::{RunContext, StateKey, StateValue};
use crate::core::{StageOutput, StageStatus};
use crate::errors::{FailureKind, GenerationError, StageFailure, SummaryflowError};
use crate::observability::SpanTimer;
use crate::stages::Stage;

/// How a pipeline reacts to a failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop on the first failed stage (default).
    #[default]
    FailFast,
    /// Continue past recoverable failures; still stop on fatal ones.
    ContinueOnRecoverable,
}

/// What a completed pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// The pipeline name.
    pub pipeline: String,
    /// The run that produced this report.
    pub run_id: Uuid,
    /// Per-stage outputs, in execution order.
    pub outputs: Vec<StageOutput>,
    /// Recoverable failures the run continued past.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<StageFailure>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
    /// The key written by the last stage.
    pub final_key: StateKey,
    /// The value under `final_key` when the run finished.
    pub final_value: Option<StateValue>,
}

impl PipelineReport {
    /// Returns the final value rendered as text.
    #[must_use]
    pub fn final_text(&self) -> Option<String> {
        self.final_value.as_ref().map(StateValue::as_prompt_text)
    }

    /// Returns the output of a named stage.
    #[must_use]
    pub fn output(&self, stage: &str) -> Option<&StageOutput> {
        self.outputs.iter().find(|o| o.stage == stage)
    }

    /// Returns true if any stage degraded or failed recoverably.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty() || self.outputs.iter().any(|o| o.status == StageStatus::Degraded)
    }

    /// Refinement iterations reported by the first loop stage, if any.
    #[must_use]
    pub fn refinement_iterations(&self) -> Option<u32> {
        self.outputs
            .iter()
            .find_map(|o| o.get("iterations"))
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// A validated, fixed sequence of stages.
///
/// Built through [`PipelineBuilder`], which guarantees that adjacent stages
/// chain and that every stage's inputs are available.
pub struct LinearPipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
    external_keys: Vec<StateKey>,
}

impl LinearPipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        stages: Vec<Arc<dyn Stage>>,
        external_keys: Vec<StateKey>,
    ) -> Self {
        Self {
            name,
            stages,
            external_keys,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; empty pipelines cannot be built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage in order against the context's state.
    ///
    /// Writes made before a halt stay in the caller's store.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::StageFailed` when a stage fails and the
    /// failure mode does not allow continuing, and
    /// `SummaryflowError::Cancelled` when the run is cancelled.
    pub async fn run(&self, ctx: &RunContext) -> Result<PipelineReport, SummaryflowError> {
        let timer = SpanTimer::start(&self.name);
        let mode = ctx.config().failure_mode;
        let run_id = ctx.identity().run_id;

        info!(
            pipeline = %self.name,
            run_id = %run_id,
            stages = self.stages.len(),
            "Starting pipeline run"
        );

        let mut outputs = Vec::with_capacity(self.stages.len());
        let mut failures = Vec::new();

        for stage in &self.stages {
            if ctx.is_cancelled() {
                let reason = ctx.cancellation().reason().unwrap_or_default();
                warn!(pipeline = %self.name, stage = stage.name(), reason = %reason, "Pipeline cancelled");
                return Err(SummaryflowError::Cancelled(reason));
            }

            let output = stage.execute(ctx).await;
            debug!(
                pipeline = %self.name,
                stage = stage.name(),
                status = %output.status,
                attempts = output.attempts,
                "Stage finished"
            );

            match output.status {
                StageStatus::Ok | StageStatus::Degraded => outputs.push(output),
                StageStatus::Cancel => {
                    let reason = output
                        .failure
                        .map(|f| f.message)
                        .unwrap_or_default();
                    warn!(pipeline = %self.name, stage = stage.name(), "Pipeline cancelled mid-stage");
                    return Err(SummaryflowError::Cancelled(reason));
                }
                StageStatus::Fail => {
                    let failure = output.failure.clone().unwrap_or_else(|| {
                        StageFailure::from_generation(
                            stage.name(),
                            &GenerationError::unknown("stage reported failure without details"),
                        )
                    });

                    if mode == FailureMode::ContinueOnRecoverable && failure.recoverable {
                        warn!(
                            pipeline = %self.name,
                            stage = %failure.stage,
                            kind = %failure.kind,
                            "Continuing past recoverable failure"
                        );
                        failures.push(failure);
                        outputs.push(output);
                        continue;
                    }

                    error!(
                        pipeline = %self.name,
                        stage = %failure.stage,
                        kind = %failure.kind,
                        message = %failure.message,
                        "Pipeline halted"
                    );
                    return Err(SummaryflowError::StageFailed(failure));
                }
            }
        }

        let final_key = self.output_key();
        let duration_ms = timer.finish();
        info!(pipeline = %self.name, run_id = %run_id, duration_ms, "Pipeline run completed");

        Ok(PipelineReport {
            pipeline: self.name.clone(),
            run_id,
            outputs,
            failures,
            duration_ms,
            final_key,
            final_value: ctx.state().get(final_key),
        })
    }
}

impl std::fmt::Debug for LinearPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearPipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[async_trait]
impl Stage for LinearPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_key(&self) -> StateKey {
        self.stages
            .first()
            .map_or(StateKey::InputText, |s| s.input_key())
    }

    fn output_key(&self) -> StateKey {
        self.stages
            .last()
            .map_or(StateKey::InputText, |s| s.output_key())
    }

    fn required_keys(&self) -> Vec<StateKey> {
        self.external_keys.clone()
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutput {
        match self.run(ctx).await {
            Ok(report) => {
                let value = report
                    .final_value
                    .clone()
                    .unwrap_or_else(|| StateValue::text(String::new()));
                let mut output = StageOutput::ok(&self.name, report.final_key, value);
                if report.is_degraded() {
                    output.status = StageStatus::Degraded;
                }
                output.add_metadata("stages", serde_json::json!(report.outputs.len()))
            }
            Err(SummaryflowError::StageFailed(failure)) => StageOutput::fail(failure),
            Err(SummaryflowError::Cancelled(reason)) => {
                StageOutput::cancel(StageFailure::cancelled(&self.name, reason))
            }
            Err(other) => StageOutput::fail(StageFailure {
                stage: self.name.clone(),
                kind: FailureKind::Generation(crate::errors::GenerationErrorKind::Unknown),
                message: other.to_string(),
                recoverable: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryflowConfig;
    use crate::context::SummaryPreferences;
    use crate::stages::{FnStage, GenerationStage, StageDescriptor};
    use crate::testing::{EchoGenerator, FailingGenerator};
    use crate::errors::GenerationErrorKind;

    fn upper(name: &str, input: StateKey, output: StateKey) -> FnStage<fn(&str) -> String> {
        FnStage::new(name, input, output, str::to_uppercase as fn(&str) -> String)
    }

    fn ctx_with(config: SummaryflowConfig) -> RunContext {
        RunContext::seeded("abc", &SummaryPreferences::default(), Arc::new(config))
    }

    #[tokio::test]
    async fn test_runs_in_order_and_reports() {
        let pipeline = LinearPipeline::builder("p")
            .stage(upper("one", StateKey::InputText, StateKey::Summary))
            .stage(FnStage::new("two", StateKey::Summary, StateKey::FormattedSummary, |s: &str| {
                format!("<{s}>")
            }))
            .build()
            .unwrap();

        let ctx = ctx_with(SummaryflowConfig::default());
        let report = pipeline.run(&ctx).await.unwrap();

        assert_eq!(pipeline.stage_names(), vec!["one", "two"]);
        assert_eq!(report.final_key, StateKey::FormattedSummary);
        assert_eq!(report.final_text().as_deref(), Some("<ABC>"));
        assert_eq!(report.outputs.len(), 2);
        assert!(!report.is_degraded());
    }

    #[tokio::test]
    async fn test_continue_on_recoverable_failure() {
        let failing = GenerationStage::new(
            StageDescriptor::new("flaky", StateKey::InputText, StateKey::Summary, "{input}"),
            Arc::new(FailingGenerator::new(GenerationErrorKind::Timeout)),
        )
        .with_retry(crate::pipeline::RetryConfig::no_retry());

        let pipeline = LinearPipeline::builder("p")
            .stage(failing)
            .stage(upper("shout", StateKey::Summary, StateKey::FormattedSummary))
            .build()
            .unwrap();

        let ctx = ctx_with(
            SummaryflowConfig::default().with_failure_mode(FailureMode::ContinueOnRecoverable),
        );
        let report = pipeline.run(&ctx).await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.is_degraded());
        assert_eq!(
            report.final_text().as_deref(),
            Some("[GENERATION FAILED IN STAGE 'FLAKY': TIMEOUT]")
        );
    }

    #[tokio::test]
    async fn test_fail_fast_halts_on_recoverable_failure() {
        let failing = GenerationStage::new(
            StageDescriptor::new("flaky", StateKey::InputText, StateKey::Summary, "{input}"),
            Arc::new(FailingGenerator::new(GenerationErrorKind::RateLimited)),
        )
        .with_retry(crate::pipeline::RetryConfig::no_retry());

        let pipeline = LinearPipeline::builder("p")
            .stage(failing)
            .stage(upper("shout", StateKey::Summary, StateKey::FormattedSummary))
            .build()
            .unwrap();

        let ctx = ctx_with(SummaryflowConfig::default());
        let err = pipeline.run(&ctx).await.unwrap_err();

        match err {
            SummaryflowError::StageFailed(failure) => assert_eq!(failure.stage, "flaky"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!ctx.state().contains(StateKey::FormattedSummary));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let pipeline = LinearPipeline::builder("p")
            .stage(GenerationStage::new(
                StageDescriptor::new("echo", StateKey::InputText, StateKey::Summary, "{input}"),
                Arc::new(EchoGenerator::new()),
            ))
            .build()
            .unwrap();

        let ctx = ctx_with(SummaryflowConfig::default());
        ctx.cancellation().cancel("shutdown");

        let err = pipeline.run(&ctx).await.unwrap_err();
        assert!(matches!(err, SummaryflowError::Cancelled(ref r) if r == "shutdown"));
        assert!(!ctx.state().contains(StateKey::Summary));
    }

    #[tokio::test]
    async fn test_nested_pipeline_as_stage() {
        let inner = LinearPipeline::builder("inner")
            .stage(upper("shout", StateKey::InputText, StateKey::Summary))
            .build()
            .unwrap();

        let outer = LinearPipeline::builder("outer")
            .stage(inner)
            .stage(FnStage::new("wrap", StateKey::Summary, StateKey::FormattedSummary, |s: &str| {
                format!("[{s}]")
            }))
            .build()
            .unwrap();

        let ctx = ctx_with(SummaryflowConfig::default());
        let report = outer.run(&ctx).await.unwrap();

        assert_eq!(report.final_text().as_deref(), Some("[ABC]"));
        assert_eq!(report.outputs[0].stage, "inner");
    }
}
