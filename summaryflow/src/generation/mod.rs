//! The text generation capability.
//!
//! Stages depend only on [`TextGenerator`]. Adapters for hosted or local
//! models live outside this crate; `crate::testing` ships deterministic
//! doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

/// One prompt sent to a text generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The rendered prompt.
    pub prompt: String,
    /// Optional system instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Sampling temperature, always within `[0, 1]`.
    pub temperature: f32,
    /// Upper bound on generated tokens, always positive.
    pub max_output_tokens: u32,
}

impl GenerationRequest {
    /// Creates a request with the given prompt and default sampling.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_instruction: None,
            temperature: 0.3,
            max_output_tokens: 1024,
        }
    }

    /// Sets the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Sets the temperature, clamped to `[0, 1]`. NaN maps to 0.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = if temperature.is_nan() {
            0.0
        } else {
            temperature.clamp(0.0, 1.0)
        };
        self
    }

    /// Sets the token budget; zero is raised to one.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens.max(1);
        self
    }
}

/// Produces text for a prompt.
///
/// Implementations classify failures with
/// [`GenerationErrorKind`](crate::errors::GenerationErrorKind) so stages can
/// decide between retrying, degrading and halting.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates text for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationErrorKind;

    #[test]
    fn test_temperature_clamped() {
        assert!((GenerationRequest::new("p").with_temperature(1.7).temperature - 1.0).abs() < f32::EPSILON);
        assert!(GenerationRequest::new("p").with_temperature(-0.2).temperature.abs() < f32::EPSILON);
        assert!(GenerationRequest::new("p").with_temperature(f32::NAN).temperature.abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_tokens_raised() {
        assert_eq!(GenerationRequest::new("p").with_max_output_tokens(0).max_output_tokens, 1);
    }

    #[tokio::test]
    async fn test_mock_generator() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate()
            .withf(|req| req.prompt == "hello")
            .times(1)
            .returning(|_| Err(GenerationError::rate_limited("slow down")));

        let err = mock.generate(&GenerationRequest::new("hello")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::RateLimited);
    }
}
