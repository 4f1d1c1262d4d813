//! Stage output type with factory methods.

use super::StageStatus;
use crate::context::{StateKey, StateValue};
use crate::errors::StageFailure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The result of one stage invocation.
///
/// The written value itself lives in the shared state; `value` is a copy for
/// reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// The stage that produced this output.
    pub stage: String,

    /// The status of the stage execution.
    pub status: StageStatus,

    /// The key the stage wrote, if it wrote anything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<StateKey>,

    /// The value the stage wrote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<StateValue>,

    /// Failure details for failed or cancelled stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,

    /// Generation attempts made, including retries.
    #[serde(default)]
    pub attempts: usize,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageOutput {
    fn with_status(stage: impl Into<String>, status: StageStatus) -> Self {
        Self {
            stage: stage.into(),
            status,
            key: None,
            value: None,
            failure: None,
            attempts: 0,
            metadata: HashMap::new(),
        }
    }

    /// Creates a successful output for a written value.
    #[must_use]
    pub fn ok(stage: impl Into<String>, key: StateKey, value: StateValue) -> Self {
        let mut output = Self::with_status(stage, StageStatus::Ok);
        output.key = Some(key);
        output.value = Some(value);
        output
    }

    /// Creates a degraded output for a fallback value.
    #[must_use]
    pub fn degraded(
        stage: impl Into<String>,
        key: StateKey,
        value: StateValue,
        reason: impl Into<String>,
    ) -> Self {
        let mut output = Self::with_status(stage, StageStatus::Degraded);
        output.key = Some(key);
        output.value = Some(value);
        output
            .metadata
            .insert("degraded_reason".to_string(), serde_json::json!(reason.into()));
        output
    }

    /// Creates a failure output.
    #[must_use]
    pub fn fail(failure: StageFailure) -> Self {
        let mut output = Self::with_status(failure.stage.clone(), StageStatus::Fail);
        output.failure = Some(failure);
        output
    }

    /// Creates a cancel output.
    #[must_use]
    pub fn cancel(failure: StageFailure) -> Self {
        let mut output = Self::with_status(failure.stage.clone(), StageStatus::Cancel);
        output.failure = Some(failure);
        output
    }

    /// Records the value written alongside a failure.
    #[must_use]
    pub fn with_written(mut self, key: StateKey, value: StateValue) -> Self {
        self.key = Some(key);
        self.value = Some(value);
        self
    }

    /// Sets the attempt count.
    #[must_use]
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the stage wrote a usable value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the output indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Returns true if a lenient failure mode may continue past this output.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.failure.as_ref().is_some_and(|f| f.recoverable)
    }

    /// Gets a metadata entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}
