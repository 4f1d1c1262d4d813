//! Pipeline builder with validation.

use super::LinearPipeline;
use crate::context::StateKey;
use crate::errors::{ContractErrorInfo, MalformedPipelineError};
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated linear pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The stages, in execution order.
    stages: Vec<Arc<dyn Stage>>,
    /// Keys present before the first stage runs.
    seed_keys: Vec<StateKey>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    ///
    /// The input text and preferences are assumed to be seeded.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            seed_keys: StateKey::SEED.to_vec(),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.stage_arc(Arc::new(stage))
    }

    /// Appends a shared stage.
    #[must_use]
    pub fn stage_arc(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replaces the keys assumed present before the first stage.
    #[must_use]
    pub fn with_seed_keys(mut self, keys: impl IntoIterator<Item = StateKey>) -> Self {
        self.seed_keys = keys.into_iter().collect();
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the wiring and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedPipelineError` if the pipeline is empty, repeats a
    /// stage name, has adjacent stages that do not chain, or has a stage
    /// reading a key nothing upstream provides.
    pub fn build(self) -> Result<LinearPipeline, MalformedPipelineError> {
        if self.stages.is_empty() {
            return Err(MalformedPipelineError::new(
                "Pipeline has no stages",
                ContractErrorInfo::new("CONTRACT-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one stage to the pipeline before building."),
            ));
        }

        self.check_unique_names()?;
        self.check_chaining()?;
        let external_keys = self.check_availability()?;

        Ok(LinearPipeline::from_parts(self.name, self.stages, external_keys))
    }

    fn check_unique_names(&self) -> Result<(), MalformedPipelineError> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(MalformedPipelineError::new(
                    format!("Stage name '{}' is used more than once", stage.name()),
                    ContractErrorInfo::new(
                        "CONTRACT-DUPLICATE-STAGE",
                        format!("Duplicate stage '{}'", stage.name()),
                    )
                    .with_fix_hint("Give every stage in a pipeline a unique name."),
                )
                .with_stages([stage.name()]));
            }
        }
        Ok(())
    }

    fn check_chaining(&self) -> Result<(), MalformedPipelineError> {
        for pair in self.stages.windows(2) {
            let (upstream, downstream) = (&pair[0], &pair[1]);
            if upstream.output_key() != downstream.input_key() {
                return Err(MalformedPipelineError::new(
                    format!(
                        "Stage '{}' writes '{}' but the next stage '{}' reads '{}'",
                        upstream.name(),
                        upstream.output_key(),
                        downstream.name(),
                        downstream.input_key()
                    ),
                    ContractErrorInfo::new(
                        "CONTRACT-CHAIN-BROKEN",
                        "Adjacent stages do not chain",
                    )
                    .with_fix_hint("Make each stage read the key the previous stage writes.")
                    .with_context_entry("upstream_output", upstream.output_key().as_str())
                    .with_context_entry("downstream_input", downstream.input_key().as_str()),
                )
                .with_stages([upstream.name(), downstream.name()]));
            }
        }
        Ok(())
    }

    /// Walks the stages in order, tracking which keys exist so far.
    ///
    /// Returns the keys the pipeline needs from outside.
    fn check_availability(&self) -> Result<Vec<StateKey>, MalformedPipelineError> {
        let mut available: Vec<StateKey> = self.seed_keys.clone();
        let mut external = Vec::new();
        let mut produced = Vec::new();

        for stage in &self.stages {
            for key in stage.required_keys() {
                if !available.contains(&key) {
                    return Err(MalformedPipelineError::new(
                        format!(
                            "Stage '{}' requires '{}', which no earlier stage writes",
                            stage.name(),
                            key
                        ),
                        ContractErrorInfo::new(
                            "CONTRACT-UNAVAILABLE-KEY",
                            format!("Key '{key}' is not available"),
                        )
                        .with_fix_hint("Seed the key or add a stage that writes it earlier.")
                        .with_context_entry("key", key.as_str()),
                    )
                    .with_stages([stage.name()]));
                }
                if !produced.contains(&key) && !external.contains(&key) {
                    external.push(key);
                }
            }
            produced.push(stage.output_key());
            if !available.contains(&stage.output_key()) {
                available.push(stage.output_key());
            }
        }

        Ok(external)
    }
}
