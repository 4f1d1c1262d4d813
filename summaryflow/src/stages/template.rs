//! Prompt templates with `{placeholder}` markers.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::context::{SharedState, StateKey};

/// Placeholder replaced with the value read from the stage's input key.
pub const INPUT_PLACEHOLDER: &str = "input";

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([a-z][a-z_]*)\}").expect("placeholder pattern is a valid regex")
    })
}

/// A prompt template.
///
/// `{input}` renders the stage input. Placeholders naming a [`StateKey`]
/// render that entry of the store, and `{length}`, `{style}`, `{format}` and
/// `{focus}` render the run's preferences. Anything else is left as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    /// Creates a template from its source text.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Returns the raw template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns placeholder names in first-appearance order, without duplicates.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for captures in placeholder_pattern().captures_iter(&self.source) {
            if let Some(name) = captures.get(1).map(|m| m.as_str()) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Returns the state keys the template reads besides `{input}`.
    #[must_use]
    pub fn state_keys(&self) -> Vec<StateKey> {
        self.placeholders()
            .into_iter()
            .filter_map(|name| name.parse::<StateKey>().ok())
            .collect()
    }

    /// Renders the template against a stage input and the run's store.
    #[must_use]
    pub fn render(&self, input: &str, state: &SharedState) -> String {
        let preferences = state.preferences();
        placeholder_pattern()
            .replace_all(&self.source, |captures: &Captures<'_>| {
                let name = &captures[1];
                if name == INPUT_PLACEHOLDER {
                    return input.to_string();
                }
                if let Ok(key) = name.parse::<StateKey>() {
                    if let Some(text) = state.get_text(key) {
                        return text;
                    }
                }
                preferences
                    .placeholder(name)
                    .unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for PromptTemplate {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}
