//! A stage that prompts a text generator and stores the response.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Stage, StageDescriptor};
use crate::context::{
    extract_json_object, RefinementRecord, RunContext, StateKey, StateValue, ValueKind,
};
use crate::core::StageOutput;
use crate::errors::{GenerationError, MissingInputError, StageFailure};
use crate::events::ActivityPhase;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::pipeline::{with_retry, Retried, RetryConfig};

/// Text written to a stage's output key when generation fails.
#[must_use]
pub fn failure_placeholder(stage: &str, err: &GenerationError) -> String {
    format!("[generation failed in stage '{stage}': {}]", err.kind)
}

/// Reads one key, prompts the generator, and writes one key.
pub struct GenerationStage {
    descriptor: StageDescriptor,
    generator: Arc<dyn TextGenerator>,
    retry: Option<RetryConfig>,
}

impl GenerationStage {
    /// Creates a stage using the run's retry policy.
    #[must_use]
    pub fn new(descriptor: StageDescriptor, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            descriptor,
            generator,
            retry: None,
        }
    }

    /// Overrides the retry policy for this stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn request(&self, ctx: &RunContext, prompt: String) -> GenerationRequest {
        let config = ctx.config();
        let mut request = GenerationRequest::new(prompt)
            .with_temperature(self.descriptor.temperature.unwrap_or(config.default_temperature))
            .with_max_output_tokens(
                self.descriptor
                    .max_output_tokens
                    .unwrap_or(config.default_max_output_tokens),
            );
        if let Some(instruction) = &self.descriptor.system_instruction {
            request = request.with_system_instruction(instruction.clone());
        }
        request
    }

    /// Calls the generator under the retry policy, bounded by one deadline
    /// covering every attempt and back-off.
    async fn generate(
        &self,
        request: &GenerationRequest,
        retry: &RetryConfig,
        deadline: Duration,
    ) -> Retried<String, GenerationError> {
        let attempts = AtomicUsize::new(0);
        let retried = with_retry(retry, &self.descriptor.name, GenerationError::is_retryable, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.generator.generate(request)
        });

        match tokio::time::timeout(deadline, retried).await {
            Ok(outcome) => outcome,
            Err(_) => Retried {
                result: Err(GenerationError::timeout(format!(
                    "stage exceeded its {} ms deadline",
                    deadline.as_millis()
                ))),
                attempts: attempts.load(Ordering::Relaxed).max(1),
            },
        }
    }

    /// Converts a raw response into the declared output kind.
    ///
    /// Returns the value and, when the response could not be parsed, the
    /// reason it was degraded.
    fn interpret(&self, text: String) -> (StateValue, Option<String>) {
        match self.descriptor.output_kind() {
            ValueKind::Text => (StateValue::Text(text), None),
            ValueKind::Record => match extract_json_object(&text) {
                Some(record) => (StateValue::Record(record), None),
                None => (
                    StateValue::Record(serde_json::json!({ "raw": text })),
                    Some("response is not a JSON object".to_string()),
                ),
            },
            ValueKind::Refinement => match RefinementRecord::parse(&text) {
                Some(record) => (StateValue::Refinement(record), None),
                None => (
                    StateValue::Refinement(RefinementRecord::unparsed(text)),
                    Some("response carries no refinement record".to_string()),
                ),
            },
        }
    }

    /// The failure placeholder, shaped to the output key's declared kind.
    fn failure_value(&self, err: &GenerationError) -> StateValue {
        let placeholder = failure_placeholder(&self.descriptor.name, err);
        match self.descriptor.output_kind() {
            ValueKind::Text => StateValue::Text(placeholder),
            ValueKind::Record => StateValue::Record(serde_json::json!({ "raw": placeholder })),
            ValueKind::Refinement => StateValue::Refinement(RefinementRecord::unparsed(placeholder)),
        }
    }

    fn degrade_malformed(&self, err: &GenerationError) -> (StateValue, String) {
        let value = match self.descriptor.output_kind() {
            ValueKind::Text => StateValue::Text(failure_placeholder(&self.descriptor.name, err)),
            ValueKind::Record => StateValue::Record(serde_json::json!({ "raw": err.message })),
            ValueKind::Refinement => {
                StateValue::Refinement(RefinementRecord::unparsed(err.message.clone()))
            }
        };
        (value, err.to_string())
    }

    fn write(&self, ctx: &RunContext, value: &StateValue) {
        ctx.state().set(self.descriptor.output_key, value.clone());
        ctx.emit(&self.descriptor.name, ActivityPhase::After, Some(&value.as_prompt_text()));
    }
}

impl std::fmt::Debug for GenerationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationStage")
            .field("name", &self.descriptor.name)
            .field("input_key", &self.descriptor.input_key)
            .field("output_key", &self.descriptor.output_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for GenerationStage {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn input_key(&self) -> StateKey {
        self.descriptor.input_key
    }

    fn output_key(&self) -> StateKey {
        self.descriptor.output_key
    }

    fn required_keys(&self) -> Vec<StateKey> {
        self.descriptor.required_keys()
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutput {
        let name = self.descriptor.name.as_str();
        let output_key = self.descriptor.output_key;

        if ctx.is_cancelled() {
            let reason = ctx.cancellation().reason().unwrap_or_default();
            return StageOutput::cancel(StageFailure::cancelled(name, reason));
        }

        let input = match ctx.state().get(self.descriptor.input_key) {
            Some(value) => value.as_prompt_text(),
            None => match &self.descriptor.default_input {
                Some(default) => default.clone(),
                None => {
                    let err = MissingInputError::new(name, self.descriptor.input_key);
                    warn!(stage = name, key = %self.descriptor.input_key, "Missing stage input");
                    return StageOutput::fail(StageFailure::from_missing_input(&err));
                }
            },
        };

        ctx.emit(name, ActivityPhase::Before, Some(&input));

        let prompt = self.descriptor.template.render(&input, ctx.state());
        let request = self.request(ctx, prompt);
        let retry = self.retry.as_ref().unwrap_or(&ctx.config().retry);
        let deadline = ctx.stage_timeout();
        let started = Instant::now();

        debug!(stage = name, prompt_chars = request.prompt.len(), "Invoking generator");

        let outcome = tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => {
                let reason = ctx.cancellation().reason().unwrap_or_default();
                return StageOutput::cancel(StageFailure::cancelled(name, reason));
            }
            outcome = self.generate(&request, retry, deadline) => outcome,
        };

        let attempts = outcome.attempts;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome.result {
            Ok(text) => {
                let (value, degraded) = self.interpret(text);
                self.write(ctx, &value);
                debug!(stage = name, attempts, elapsed_ms, "Stage completed");
                let output = match degraded {
                    None => StageOutput::ok(name, output_key, value),
                    Some(reason) => {
                        warn!(stage = name, reason = %reason, "Stage output degraded");
                        StageOutput::degraded(name, output_key, value, reason)
                    }
                };
                output.with_attempts(attempts)
            }
            Err(err) if err.kind.is_degradable() => {
                let (value, reason) = self.degrade_malformed(&err);
                self.write(ctx, &value);
                warn!(stage = name, error = %err, "Generator returned a malformed response");
                StageOutput::degraded(name, output_key, value, reason).with_attempts(attempts)
            }
            Err(err) => {
                let placeholder = self.failure_value(&err);
                self.write(ctx, &placeholder);
                warn!(stage = name, attempts, error = %err, "Stage failed");
                StageOutput::fail(StageFailure::from_generation(name, &err))
                    .with_written(output_key, placeholder)
                    .with_attempts(attempts)
            }
        }
    }
}
