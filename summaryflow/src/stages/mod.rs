//! Stage trait and implementations.
//!
//! A stage reads one key from the shared state, does its work and writes one
//! key. Stages never talk to each other directly.

mod descriptor;
mod generation;
mod template;

pub use descriptor::StageDescriptor;
pub use generation::{failure_placeholder, GenerationStage};
pub use template::{PromptTemplate, INPUT_PLACEHOLDER};

use crate::context::{RunContext, StateKey, StateValue};
use crate::core::StageOutput;
use crate::errors::{MissingInputError, StageFailure};
use crate::events::ActivityPhase;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// Pipelines validate `input_key`, `output_key` and `required_keys` at
/// construction, then call `execute` once per run.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// The key the stage reads.
    fn input_key(&self) -> StateKey;

    /// The key the stage writes.
    fn output_key(&self) -> StateKey;

    /// Keys that must be present before the stage runs.
    fn required_keys(&self) -> Vec<StateKey> {
        vec![self.input_key()]
    }

    /// Executes the stage.
    ///
    /// Failures are reported through the returned output, never by panicking.
    async fn execute(&self, ctx: &RunContext) -> StageOutput;
}

/// A deterministic text transform stage.
///
/// Useful for formatting steps that need no model call.
pub struct FnStage<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    name: String,
    input_key: StateKey,
    output_key: StateKey,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, input_key: StateKey, output_key: StateKey, func: F) -> Self {
        Self {
            name: name.into(),
            input_key,
            output_key,
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_key(&self) -> StateKey {
        self.input_key
    }

    fn output_key(&self) -> StateKey {
        self.output_key
    }

    async fn execute(&self, ctx: &RunContext) -> StageOutput {
        let Some(input) = ctx.state().get_text(self.input_key) else {
            let err = MissingInputError::new(&self.name, self.input_key);
            return StageOutput::fail(StageFailure::from_missing_input(&err));
        };

        ctx.emit(&self.name, ActivityPhase::Before, Some(&input));
        let value = StateValue::Text((self.func)(&input));
        ctx.state().set(self.output_key, value.clone());
        ctx.emit(&self.name, ActivityPhase::After, value.as_text());

        StageOutput::ok(&self.name, self.output_key, value)
    }
}
