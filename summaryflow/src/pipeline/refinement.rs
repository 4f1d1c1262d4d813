//! Bounded refinement loop.
//!
//! The loop seeds its output with its input, then repeatedly runs an inner
//! stage that reads the latest text and writes a refinement record. It stops
//! when the record says no more refinement is needed, when the record is
//! unusable, or when the iteration cap is reached.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::{RunContext, StateKey, StateValue, ValueKind};
use crate::core::{StageOutput, StageStatus};
use crate::errors::{
    ContractErrorInfo, FailureKind, GenerationError, MalformedPipelineError, MissingInputError,
    RefinementParseError, StageFailure,
};
use crate::events::ActivityPhase;
use crate::stages::Stage;

/// Where the loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Waiting to run the inner stage.
    Pending,
    /// The inner stage is running.
    Evaluating,
    /// No further iterations will run.
    Done,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The inner stage reported no further refinement needed.
    Converged,
    /// The iteration cap was reached.
    CapReached,
    /// A record carried no usable text.
    ParseError,
    /// The cap was zero, so the inner stage never ran.
    CapZero,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::CapReached => write!(f, "cap_reached"),
            Self::ParseError => write!(f, "parse_error"),
            Self::CapZero => write!(f, "cap_zero"),
        }
    }
}

/// Result of a completed loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Inner stage invocations.
    pub iterations: u32,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
    /// The last known-good text, also stored under the loop's output key.
    pub text: String,
    /// The parse error that stopped the loop, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Re-runs an inner stage until it converges or the cap is reached.
pub struct RefinementLoop {
    name: String,
    input_key: StateKey,
    output_key: StateKey,
    inner: Arc<dyn Stage>,
    max_iterations: Option<u32>,
}

impl RefinementLoop {
    /// Creates a loop around `inner`.
    ///
    /// The inner stage must read `output_key` and write a refinement record.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedPipelineError` with code `CONTRACT-LOOP-WIRING`
    /// when the inner stage is wired differently.
    pub fn new(
        name: impl Into<String>,
        input_key: StateKey,
        output_key: StateKey,
        inner: Arc<dyn Stage>,
    ) -> Result<Self, MalformedPipelineError> {
        let name = name.into();

        if inner.input_key() != output_key {
            return Err(wiring_error(
                &name,
                inner.name(),
                format!(
                    "Inner stage '{}' must read the loop output '{}', not '{}'",
                    inner.name(),
                    output_key,
                    inner.input_key()
                ),
            ));
        }
        if inner.output_key().kind() != ValueKind::Refinement {
            return Err(wiring_error(
                &name,
                inner.name(),
                format!(
                    "Inner stage '{}' must write a refinement record, but '{}' holds {}",
                    inner.name(),
                    inner.output_key(),
                    inner.output_key().kind()
                ),
            ));
        }
        if output_key.kind() != ValueKind::Text {
            return Err(wiring_error(
                &name,
                inner.name(),
                format!("Loop output '{output_key}' must hold text"),
            ));
        }

        Ok(Self {
            name,
            input_key,
            output_key,
            inner,
            max_iterations: None,
        })
    }

    /// Overrides the configured iteration cap.
    #[must_use]
    pub fn with_max_iterations(mut self, cap: u32) -> Self {
        self.max_iterations = Some(cap);
        self
    }

    /// The cap in effect for a run.
    #[must_use]
    pub fn cap(&self, ctx: &RunContext) -> u32 {
        self.max_iterations
            .unwrap_or(ctx.config().max_refinement_iterations)
    }

    /// Runs the loop.
    ///
    /// # Errors
    ///
    /// Returns the failure of the inner stage, a missing seed input, or a
    /// cancellation. Parse errors are not failures; they stop the loop.
    pub async fn refine(&self, ctx: &RunContext) -> Result<LoopOutcome, StageFailure> {
        let Some(seed) = ctx.state().get(self.input_key) else {
            let err = MissingInputError::new(&self.name, self.input_key);
            warn!(stage = %self.name, key = %self.input_key, "Missing refinement seed");
            return Err(StageFailure::from_missing_input(&err));
        };

        let mut text = seed.as_prompt_text();
        ctx.emit(&self.name, ActivityPhase::Before, Some(&text));
        ctx.state().set(self.output_key, StateValue::Text(text.clone()));

        let cap = self.cap(ctx);
        let mut iterations = 0u32;
        let mut parse_error = None;
        let mut state = LoopState::Pending;

        let stop_reason = if cap == 0 {
            StopReason::CapZero
        } else {
            loop {
                if iterations >= cap {
                    break StopReason::CapReached;
                }
                if ctx.is_cancelled() {
                    let reason = ctx.cancellation().reason().unwrap_or_default();
                    return Err(StageFailure::cancelled(&self.name, reason));
                }

                state = transition(&self.name, state, LoopState::Evaluating);
                let output = self.inner.execute(ctx).await;
                iterations += 1;

                if output.is_failure() {
                    let failure = output.failure.unwrap_or_else(|| {
                        StageFailure::from_generation(
                            self.inner.name(),
                            &GenerationError::unknown("inner stage failed without details"),
                        )
                    });
                    warn!(
                        stage = %self.name,
                        iteration = iterations,
                        kind = %failure.kind,
                        "Refinement stage failed"
                    );
                    return Err(failure);
                }

                let record = ctx
                    .state()
                    .get(self.inner.output_key())
                    .and_then(|value| value.as_refinement().cloned());

                let Some(refined) = record.as_ref().and_then(|r| r.refined_summary.clone())
                else {
                    let err = RefinementParseError::new(
                        self.inner.name(),
                        "response carried no refined summary",
                    );
                    warn!(stage = %self.name, iteration = iterations, error = %err, "Keeping last refined text");
                    parse_error = Some(err.to_string());
                    break StopReason::ParseError;
                };

                text = refined;
                ctx.state().set(self.output_key, StateValue::Text(text.clone()));

                let should_continue = record.as_ref().is_some_and(|r| r.should_continue());
                debug!(stage = %self.name, iteration = iterations, should_continue, "Refinement pass complete");
                if !should_continue {
                    break StopReason::Converged;
                }
                state = transition(&self.name, state, LoopState::Pending);
            }
        };

        transition(&self.name, state, LoopState::Done);
        ctx.emit(&self.name, ActivityPhase::After, Some(&text));
        info!(stage = %self.name, iterations, stop_reason = %stop_reason, "Refinement loop finished");

        Ok(LoopOutcome {
            iterations,
            stop_reason,
            text,
            parse_error,
        })
    }
}

fn transition(name: &str, from: LoopState, to: LoopState) -> LoopState {
    debug!(stage = name, from = ?from, to = ?to, "Refinement loop transition");
    to
}

fn wiring_error(loop_name: &str, inner: &str, message: String) -> MalformedPipelineError {
    MalformedPipelineError::new(
        message,
        ContractErrorInfo::new("CONTRACT-LOOP-WIRING", "Refinement loop is miswired")
            .with_fix_hint(
                "The inner stage must read the loop's output key and write the refinement key.",
            ),
    )
    .with_stages([loop_name, inner])
}

impl fmt::Debug for RefinementLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefinementLoop")
            .field("name", &self.name)
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .field("inner", &self.inner.name())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[async_trait]
impl Stage for RefinementLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_key(&self) -> StateKey {
        self.input_key
    }

    fn output_key(&self) -> StateKey {
        self.output_key
    }

    fn required_keys(&self) -> Vec<StateKey> {
        let mut keys = vec![self.input_key];
        for key in self.inner.required_keys() {
            if key != self.output_key && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutput {
        match self.refine(ctx).await {
            Ok(outcome) => {
                let mut output =
                    StageOutput::ok(&self.name, self.output_key, StateValue::Text(outcome.text));
                if let Some(reason) = outcome.parse_error {
                    output.status = StageStatus::Degraded;
                    output = output.add_metadata("degraded_reason", serde_json::json!(reason));
                }
                output
                    .add_metadata("iterations", serde_json::json!(outcome.iterations))
                    .add_metadata("stop_reason", serde_json::json!(outcome.stop_reason))
            }
            Err(failure) if failure.kind == FailureKind::Cancelled => StageOutput::cancel(failure),
            Err(failure) => StageOutput::fail(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryflowConfig;
    use crate::context::SummaryPreferences;
    use crate::stages::{FnStage, GenerationStage, StageDescriptor};
    use crate::testing::{MarkerRefiner, ScriptedGenerator};

    fn refine_stage(generator: Arc<dyn crate::generation::TextGenerator>) -> Arc<dyn Stage> {
        Arc::new(GenerationStage::new(
            StageDescriptor::new("refine", StateKey::RefinedSummary, StateKey::Refinement, "{input}"),
            generator,
        ))
    }

    fn seeded_ctx() -> RunContext {
        let ctx = RunContext::seeded(
            "doc",
            &SummaryPreferences::default(),
            Arc::new(SummaryflowConfig::default()),
        );
        ctx.state().set(StateKey::Summary, StateValue::text("draft"));
        ctx
    }

    #[test]
    fn test_rejects_inner_reading_wrong_key() {
        let inner: Arc<dyn Stage> = Arc::new(GenerationStage::new(
            StageDescriptor::new("refine", StateKey::Summary, StateKey::Refinement, "{input}"),
            Arc::new(MarkerRefiner::new()),
        ));
        let err = RefinementLoop::new("loop", StateKey::Summary, StateKey::RefinedSummary, inner)
            .unwrap_err();
        assert_eq!(err.code(), "CONTRACT-LOOP-WIRING");
    }

    #[test]
    fn test_rejects_inner_writing_text() {
        let inner: Arc<dyn Stage> = Arc::new(FnStage::new(
            "refine",
            StateKey::RefinedSummary,
            StateKey::FormattedSummary,
            str::to_string as fn(&str) -> String,
        ));
        let err = RefinementLoop::new("loop", StateKey::Summary, StateKey::RefinedSummary, inner)
            .unwrap_err();
        assert_eq!(err.code(), "CONTRACT-LOOP-WIRING");
    }

    #[tokio::test]
    async fn test_converges_on_first_pass() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"refined_summary": "better", "needs_refinement": false}"#,
        ]));
        let lp = RefinementLoop::new(
            "loop",
            StateKey::Summary,
            StateKey::RefinedSummary,
            refine_stage(generator.clone()),
        )
        .unwrap()
        .with_max_iterations(5);
        let ctx = seeded_ctx();

        let outcome = lp.refine(&ctx).await.unwrap();

        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.stop_reason, StopReason::Converged);
        assert_eq!(generator.call_count(), 1);
        assert_eq!(ctx.state().get_text(StateKey::RefinedSummary).as_deref(), Some("better"));
    }

    #[tokio::test]
    async fn test_absent_signal_stops() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{"refined_summary": "ok"}"#]));
        let lp = RefinementLoop::new(
            "loop",
            StateKey::Summary,
            StateKey::RefinedSummary,
            refine_stage(generator),
        )
        .unwrap()
        .with_max_iterations(4);

        let outcome = lp.refine(&seeded_ctx()).await.unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.stop_reason, StopReason::Converged);
    }

    #[tokio::test]
    async fn test_parse_error_keeps_last_good_text() {
        let generator = Arc::new(ScriptedGenerator::new([
            r#"{"refined_summary": "first", "needs_refinement": "yes"}"#,
            "I could not produce JSON, sorry",
        ]));
        let lp = RefinementLoop::new(
            "loop",
            StateKey::Summary,
            StateKey::RefinedSummary,
            refine_stage(generator),
        )
        .unwrap()
        .with_max_iterations(5);
        let ctx = seeded_ctx();

        let output = lp.execute(&ctx).await;

        assert_eq!(output.status, StageStatus::Degraded);
        assert_eq!(output.get("iterations"), Some(&serde_json::json!(2)));
        assert_eq!(output.get("stop_reason"), Some(&serde_json::json!("parse_error")));
        assert_eq!(ctx.state().get_text(StateKey::RefinedSummary).as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_cap_zero_returns_seed() {
        let generator = Arc::new(MarkerRefiner::new());
        let lp = RefinementLoop::new(
            "loop",
            StateKey::Summary,
            StateKey::RefinedSummary,
            refine_stage(generator.clone()),
        )
        .unwrap()
        .with_max_iterations(0);
        let ctx = seeded_ctx();

        let outcome = lp.refine(&ctx).await.unwrap();

        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.stop_reason, StopReason::CapZero);
        assert_eq!(outcome.text, "draft");
        assert_eq!(generator.call_count(), 0);
        assert_eq!(ctx.state().get_text(StateKey::RefinedSummary).as_deref(), Some("draft"));
    }

    #[tokio::test]
    async fn test_missing_seed_fails() {
        let lp = RefinementLoop::new(
            "loop",
            StateKey::Summary,
            StateKey::RefinedSummary,
            refine_stage(Arc::new(MarkerRefiner::new())),
        )
        .unwrap();
        let ctx = RunContext::seeded(
            "doc",
            &SummaryPreferences::default(),
            Arc::new(SummaryflowConfig::default()),
        );

        let failure = lp.refine(&ctx).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::MissingInput);
    }

    #[tokio::test]
    async fn test_uses_configured_cap() {
        let generator = Arc::new(MarkerRefiner::new());
        let lp = RefinementLoop::new(
            "loop",
            StateKey::Summary,
            StateKey::RefinedSummary,
            refine_stage(generator.clone()),
        )
        .unwrap();
        let ctx = seeded_ctx();

        let outcome = lp.refine(&ctx).await.unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.stop_reason, StopReason::CapReached);
        assert_eq!(generator.call_count(), 2);
    }
}
