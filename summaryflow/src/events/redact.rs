//! Secret redaction at the activity sink boundary.

use regex::Regex;
use std::sync::Arc;

use super::{ActivityEvent, ActivitySink};

/// Replacement text for masked secrets.
pub const REDACTED: &str = "[REDACTED]";

const DEFAULT_PATTERNS: &[&str] = &[
    r"sk-[A-Za-z0-9_\-]{16,}",
    r"AIza[0-9A-Za-z_\-]{35}",
    r"(?i)bearer\s+[A-Za-z0-9._~+/\-]+=*",
    r"(?i)\b(api[_-]?key|token|secret|password)\s*[:=]\s*\S+",
];

/// Masks secrets in event payloads before forwarding to an inner sink.
pub struct RedactingActivitySink {
    inner: Arc<dyn ActivitySink>,
    patterns: Vec<Regex>,
}

impl RedactingActivitySink {
    /// Wraps a sink with the default secret patterns.
    #[must_use]
    pub fn new(inner: Arc<dyn ActivitySink>) -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { inner, patterns }
    }

    /// Adds a custom pattern.
    ///
    /// # Errors
    ///
    /// Returns the regex error if the pattern does not compile.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Masks every match of every pattern.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, re| re.replace_all(&acc, REDACTED).into_owned())
    }
}

impl std::fmt::Debug for RedactingActivitySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedactingActivitySink")
            .field("patterns", &self.patterns.len())
            .finish_non_exhaustive()
    }
}

impl ActivitySink for RedactingActivitySink {
    fn try_emit(&self, event: &ActivityEvent) {
        let mut event = event.clone();
        event.payload_excerpt = event.payload_excerpt.map(|text| self.redact(&text));
        self.inner.try_emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ActivityPhase, CollectingActivitySink};

    #[test]
    fn test_redacts_known_key_shapes() {
        let sink = RedactingActivitySink::new(Arc::new(CollectingActivitySink::new()));

        let text = sink.redact("using sk-abcdefghijklmnopqrstuv and api_key=hunter2 now");
        assert!(!text.contains("sk-abcdef"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
        assert!(text.starts_with("using "));
    }

    #[test]
    fn test_bearer_token() {
        let sink = RedactingActivitySink::new(Arc::new(CollectingActivitySink::new()));
        assert_eq!(sink.redact("Authorization: Bearer abc.def"), "Authorization: [REDACTED]");
    }

    #[test]
    fn test_forwards_redacted_event() {
        let collector = Arc::new(CollectingActivitySink::new());
        let sink = RedactingActivitySink::new(collector.clone())
            .with_pattern(r"ACME-\d+")
            .unwrap();

        let event = ActivityEvent::new("summarize", ActivityPhase::After)
            .with_excerpt("ticket ACME-42 mentions password: swordfish", 200);
        sink.try_emit(&event);

        let forwarded = collector.events();
        let excerpt = forwarded[0].payload_excerpt.as_deref().unwrap();
        assert!(!excerpt.contains("ACME-42"));
        assert!(!excerpt.contains("swordfish"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let sink = RedactingActivitySink::new(Arc::new(CollectingActivitySink::new()));
        assert!(sink.with_pattern("(").is_err());
    }
}
