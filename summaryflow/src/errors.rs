//! Error types for summaryflow.
//!
//! Construction-time problems (`MalformedPipelineError`) are separated from
//! run-time problems (`MissingInputError`, `GenerationError`) so callers can
//! tell a wiring bug from a flaky model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::context::StateKey;

/// The main error type for summaryflow operations.
#[derive(Debug, Error)]
pub enum SummaryflowError {
    /// A stage's required input was absent.
    #[error("{0}")]
    MissingInput(#[from] MissingInputError),

    /// The pipeline failed structural validation.
    #[error("{0}")]
    MalformedPipeline(#[from] MalformedPipelineError),

    /// The text generation capability failed.
    #[error("{0}")]
    Generation(#[from] GenerationError),

    /// The refinement loop could not read a continuation signal.
    #[error("{0}")]
    RefinementParse(#[from] RefinementParseError),

    /// A pipeline run halted on a failed stage.
    #[error("{0}")]
    StageFailed(#[from] StageFailure),

    /// The run was cancelled between stages.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SummaryflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for SummaryflowError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-CHAIN-BROKEN").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Raised at construction when stages do not chain or reference unavailable keys.
#[derive(Debug, Clone, Error)]
#[error("Malformed pipeline: {message}")]
pub struct MalformedPipelineError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Diagnostic info.
    pub error_info: ContractErrorInfo,
}

impl MalformedPipelineError {
    /// Creates a new malformed pipeline error.
    #[must_use]
    pub fn new(message: impl Into<String>, error_info: ContractErrorInfo) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stages = stages.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the diagnostic code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.error_info.code
    }
}

/// Raised when a stage's input key is absent and no default is configured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' is missing required input '{key}'")]
pub struct MissingInputError {
    /// The stage that attempted the read.
    pub stage: String,
    /// The absent key.
    pub key: StateKey,
}

impl MissingInputError {
    /// Creates a new missing input error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: StateKey) -> Self {
        Self {
            stage: stage.into(),
            key,
        }
    }
}

/// Failure categories reported by a text generation capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    /// The call exceeded its deadline.
    Timeout,
    /// Credentials were rejected.
    AuthFailure,
    /// The provider throttled the call.
    RateLimited,
    /// The response could not be interpreted.
    MalformedResponse,
    /// Anything else.
    Unknown,
}

impl GenerationErrorKind {
    /// Returns true if the retry policy may re-issue the call.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited)
    }

    /// Returns true if the stage can absorb the error by degrading its output.
    #[must_use]
    pub fn is_degradable(self) -> bool {
        matches!(self, Self::MalformedResponse)
    }

    /// Returns true if a pipeline must halt regardless of failure mode.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::AuthFailure | Self::Unknown)
    }
}

impl fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Error returned by a [`TextGenerator`](crate::generation::TextGenerator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Generation failed ({kind}): {message}")]
pub struct GenerationError {
    /// The failure category.
    pub kind: GenerationErrorKind,
    /// Provider-supplied detail.
    pub message: String,
}

impl GenerationError {
    /// Creates a new generation error.
    #[must_use]
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Timeout, message)
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::AuthFailure, message)
    }

    /// Creates a rate limit error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::RateLimited, message)
    }

    /// Creates a malformed response error.
    #[must_use]
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::MalformedResponse, message)
    }

    /// Creates an unknown error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Unknown, message)
    }

    /// Returns true if the error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Raised inside the refinement loop when a record carries no usable text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Refinement record from stage '{stage}' could not be used: {reason}")]
pub struct RefinementParseError {
    /// The inner stage name.
    pub stage: String,
    /// Why the record was rejected.
    pub reason: String,
}

impl RefinementParseError {
    /// Creates a new refinement parse error.
    #[must_use]
    pub fn new(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// What went wrong in a failed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "kind")]
pub enum FailureKind {
    /// The text generation capability failed.
    Generation(GenerationErrorKind),
    /// A required input key was absent.
    MissingInput,
    /// The run was cancelled.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation(kind) => write!(f, "generation:{kind}"),
            Self::MissingInput => write!(f, "missing_input"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Consolidated description of a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("Stage '{stage}' failed ({kind}): {message}")]
pub struct StageFailure {
    /// The failing stage.
    pub stage: String,
    /// The failure category.
    pub kind: FailureKind,
    /// Underlying detail.
    pub message: String,
    /// Whether a lenient failure mode may continue past it.
    pub recoverable: bool,
}

impl StageFailure {
    /// Builds a failure from a generation error.
    #[must_use]
    pub fn from_generation(stage: impl Into<String>, err: &GenerationError) -> Self {
        Self {
            stage: stage.into(),
            kind: FailureKind::Generation(err.kind),
            message: err.message.clone(),
            recoverable: !err.kind.is_fatal(),
        }
    }

    /// Builds a failure from a missing input.
    #[must_use]
    pub fn from_missing_input(err: &MissingInputError) -> Self {
        Self {
            stage: err.stage.clone(),
            kind: FailureKind::MissingInput,
            message: err.to_string(),
            recoverable: false,
        }
    }

    /// Builds a cancellation failure.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind: FailureKind::Cancelled,
            message: reason.into(),
            recoverable: false,
        }
    }
}
