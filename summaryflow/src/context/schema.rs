//! Fixed schema for the shared state store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RefinementRecord;

/// The declared kind of value stored under a [`StateKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Free-form text.
    Text,
    /// A structured JSON record.
    Record,
    /// A refinement record with a continuation signal.
    Refinement,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Record => write!(f, "record"),
            Self::Refinement => write!(f, "refinement"),
        }
    }
}

/// Named fields of the shared state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    /// The document being summarized.
    InputText,
    /// Caller preferences (length, style, format).
    Preferences,
    /// Content analysis produced by the first stage.
    Analysis,
    /// Extracted key points.
    KeyPoints,
    /// The initial summary.
    Summary,
    /// The summary after refinement.
    RefinedSummary,
    /// The latest refinement record.
    Refinement,
    /// The final formatted summary.
    FormattedSummary,
}

impl StateKey {
    /// All keys, in pipeline order.
    pub const ALL: [Self; 8] = [
        Self::InputText,
        Self::Preferences,
        Self::Analysis,
        Self::KeyPoints,
        Self::Summary,
        Self::RefinedSummary,
        Self::Refinement,
        Self::FormattedSummary,
    ];

    /// Keys a pipeline run is seeded with.
    pub const SEED: [Self; 2] = [Self::InputText, Self::Preferences];

    /// Returns the snake_case name of the key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputText => "input_text",
            Self::Preferences => "preferences",
            Self::Analysis => "analysis",
            Self::KeyPoints => "key_points",
            Self::Summary => "summary",
            Self::RefinedSummary => "refined_summary",
            Self::Refinement => "refinement",
            Self::FormattedSummary => "formatted_summary",
        }
    }

    /// Returns the declared value kind.
    #[must_use]
    pub fn kind(self) -> ValueKind {
        match self {
            Self::Preferences | Self::Analysis => ValueKind::Record,
            Self::Refinement => ValueKind::Refinement,
            Self::InputText
            | Self::KeyPoints
            | Self::Summary
            | Self::RefinedSummary
            | Self::FormattedSummary => ValueKind::Text,
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("unknown state key '{s}'"))
    }
}

/// A value held in the shared state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StateValue {
    /// Free-form text.
    Text(String),
    /// A structured JSON record.
    Record(serde_json::Value),
    /// A refinement record.
    Refinement(RefinementRecord),
}

impl StateValue {
    /// Creates a text value.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Returns the kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Record(_) => ValueKind::Record,
            Self::Refinement(_) => ValueKind::Refinement,
        }
    }

    /// Returns the text if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the record if this is a refinement value.
    #[must_use]
    pub fn as_refinement(&self) -> Option<&RefinementRecord> {
        match self {
            Self::Refinement(record) => Some(record),
            _ => None,
        }
    }

    /// Renders the value for inclusion in a prompt.
    ///
    /// Records that only wrap a raw response render as that raw text.
    #[must_use]
    pub fn as_prompt_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Record(value) => match value.get("raw").and_then(|raw| raw.as_str()) {
                Some(raw) if value.as_object().is_some_and(|map| map.len() == 1) => raw.to_string(),
                _ => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            },
            Self::Refinement(record) => record
                .refined_summary
                .clone()
                .or_else(|| record.raw.clone())
                .unwrap_or_default(),
        }
    }
}

impl From<String> for StateValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for StateValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}
