//! Declarative description of a generation stage.

use serde::{Deserialize, Serialize};

use super::PromptTemplate;
use crate::context::{StateKey, ValueKind};

/// What a generation stage reads, how it prompts, and what it writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Unique name within a pipeline.
    pub name: String,
    /// The key the stage reads.
    pub input_key: StateKey,
    /// The key the stage writes.
    pub output_key: StateKey,
    /// Prompt template.
    pub template: PromptTemplate,
    /// Sampling temperature; falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Token budget; falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Optional system instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Used when `input_key` is absent from the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_input: Option<String>,
}

impl StageDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input_key: StateKey,
        output_key: StateKey,
        template: impl Into<PromptTemplate>,
    ) -> Self {
        Self {
            name: name.into(),
            input_key,
            output_key,
            template: template.into(),
            temperature: None,
            max_output_tokens: None,
            system_instruction: None,
            default_input: None,
        }
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the token budget.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Sets the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Sets a fallback input.
    #[must_use]
    pub fn with_default_input(mut self, input: impl Into<String>) -> Self {
        self.default_input = Some(input.into());
        self
    }

    /// The kind of value the stage writes.
    #[must_use]
    pub fn output_kind(&self) -> ValueKind {
        self.output_key.kind()
    }

    /// Keys that must be present before the stage runs.
    #[must_use]
    pub fn required_keys(&self) -> Vec<StateKey> {
        let mut keys = Vec::new();
        if self.default_input.is_none() {
            keys.push(self.input_key);
        }
        for key in self.template.state_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_keys_include_template_keys() {
        let descriptor = StageDescriptor::new(
            "summarize",
            StateKey::KeyPoints,
            StateKey::Summary,
            "{input} using {analysis} and {key_points}",
        );
        assert_eq!(
            descriptor.required_keys(),
            vec![StateKey::KeyPoints, StateKey::Analysis]
        );
        assert_eq!(descriptor.output_kind(), ValueKind::Text);
    }

    #[test]
    fn test_default_input_drops_input_requirement() {
        let descriptor =
            StageDescriptor::new("analyze", StateKey::Summary, StateKey::Analysis, "{input}")
                .with_default_input("nothing yet");
        assert!(descriptor.required_keys().is_empty());
    }
}
