//! Caller preferences for a summary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target length of the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLength {
    /// Two or three sentences.
    Short,
    /// One paragraph.
    #[default]
    Medium,
    /// Several paragraphs.
    Long,
}

/// Register of the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    /// Plain, neutral tone.
    #[default]
    Neutral,
    /// Keeps terminology and detail.
    Technical,
    /// Conversational.
    Casual,
    /// Decision-oriented.
    Executive,
}

/// Layout of the final summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFormat {
    /// Prose paragraphs.
    #[default]
    Paragraph,
    /// A bulleted list.
    Bullets,
    /// Markdown with headings.
    Markdown,
}

macro_rules! display_snake {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($name),)+
                }
            }
        }
    };
}

display_snake!(SummaryLength { Short => "short", Medium => "medium", Long => "long" });
display_snake!(SummaryStyle {
    Neutral => "neutral",
    Technical => "technical",
    Casual => "casual",
    Executive => "executive",
});
display_snake!(SummaryFormat { Paragraph => "paragraph", Bullets => "bullets", Markdown => "markdown" });

/// Preferences seeded into every pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryPreferences {
    /// Target length.
    #[serde(default)]
    pub length: SummaryLength,
    /// Register.
    #[serde(default)]
    pub style: SummaryStyle,
    /// Layout.
    #[serde(default)]
    pub format: SummaryFormat,
    /// Optional topic to emphasise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

impl SummaryPreferences {
    /// Creates default preferences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the length.
    #[must_use]
    pub fn with_length(mut self, length: SummaryLength) -> Self {
        self.length = length;
        self
    }

    /// Sets the style.
    #[must_use]
    pub fn with_style(mut self, style: SummaryStyle) -> Self {
        self.style = style;
        self
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: SummaryFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the focus topic.
    #[must_use]
    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    /// Converts to the record stored under `preferences`.
    #[must_use]
    pub fn to_record(&self) -> serde_json::Value {
        serde_json::json!({
            "length": self.length.to_string(),
            "style": self.style.to_string(),
            "format": self.format.to_string(),
            "focus": self.focus,
        })
    }

    /// Looks up a preference by template placeholder name.
    #[must_use]
    pub fn placeholder(&self, name: &str) -> Option<String> {
        match name {
            "length" => Some(self.length.to_string()),
            "style" => Some(self.style.to_string()),
            "format" => Some(self.format.to_string()),
            "focus" => Some(self.focus.clone().unwrap_or_else(|| "the main points".to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let prefs = SummaryPreferences::new()
            .with_style(SummaryStyle::Executive)
            .with_focus("costs");
        let back: SummaryPreferences = serde_json::from_value(prefs.to_record()).unwrap();
        assert_eq!(back, prefs);
    }

    #[test]
    fn test_record_without_focus_deserializes() {
        let prefs = SummaryPreferences::default();
        let back: SummaryPreferences = serde_json::from_value(prefs.to_record()).unwrap();
        assert_eq!(back.focus, None);
    }

    #[test]
    fn test_placeholders() {
        let prefs = SummaryPreferences::new().with_format(SummaryFormat::Bullets);
        assert_eq!(prefs.placeholder("format").as_deref(), Some("bullets"));
        assert_eq!(prefs.placeholder("length").as_deref(), Some("medium"));
        assert_eq!(prefs.placeholder("focus").as_deref(), Some("the main points"));
        assert!(prefs.placeholder("colour").is_none());
    }
}
