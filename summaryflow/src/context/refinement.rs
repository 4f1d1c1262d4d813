//! Refinement records and their lenient parser.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Structured output of a refinement stage.
///
/// A record is usable only when it carries `refined_summary`. Responses that
/// cannot be parsed keep the raw text in `raw` and leave the other fields
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementRecord {
    /// The improved text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_summary: Option<String>,
    /// Whether another refinement pass is wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_refinement: Option<bool>,
    /// The unparsed response, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl RefinementRecord {
    /// Creates a parsed record.
    #[must_use]
    pub fn parsed(refined_summary: impl Into<String>, needs_refinement: Option<bool>) -> Self {
        Self {
            refined_summary: Some(refined_summary.into()),
            needs_refinement,
            raw: None,
        }
    }

    /// Creates the default shape for an unparseable response.
    #[must_use]
    pub fn unparsed(raw: impl Into<String>) -> Self {
        Self {
            refined_summary: None,
            needs_refinement: None,
            raw: Some(raw.into()),
        }
    }

    /// Returns true if the record carries refined text.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.refined_summary.is_some()
    }

    /// Returns the continuation signal. An absent signal means stop.
    #[must_use]
    pub fn should_continue(&self) -> bool {
        self.needs_refinement.unwrap_or(false)
    }

    /// Parses a model response into a record.
    ///
    /// Accepts a bare JSON object, one wrapped in a fenced code block, or one
    /// embedded in surrounding prose. Returns `None` when no object with a
    /// text field is found.
    #[must_use]
    pub fn parse(response: &str) -> Option<Self> {
        let object = extract_json_object(response)?;
        let map = object.as_object()?;

        let refined_summary = ["refined_summary", "summary", "refined_text"]
            .iter()
            .find_map(|field| map.get(*field).and_then(serde_json::Value::as_str))
            .map(str::to_string)?;

        let needs_refinement = map.get("needs_refinement").and_then(parse_flag);

        Some(Self::parsed(refined_summary, needs_refinement))
    }

    /// Parses a response, falling back to the unparsed shape.
    #[must_use]
    pub fn parse_or_unparsed(response: &str) -> Self {
        Self::parse(response).unwrap_or_else(|| Self::unparsed(response))
    }
}

/// Reads a boolean-like JSON value.
fn parse_flag(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(flag) => Some(*flag),
        serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```")
            .expect("fenced JSON pattern is a valid regex")
    })
}

/// Finds the first JSON object in a model response.
pub(crate) fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();

    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(value);
    }

    if let Some(captures) = fenced_block().captures(trimmed) {
        if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(&captures[1]) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        _ => None,
    }
}
