//! Configuration for pipelines and the summarizer.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SUMMARYFLOW_*` environment variables. Nested tables use a double
//! underscore in environment keys (`SUMMARYFLOW_RETRY__MAX_ATTEMPTS`).

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chunking::ChunkingConfig;
use crate::errors::SummaryflowError;
use crate::pipeline::{FailureMode, RetryConfig};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SUMMARYFLOW_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryflowConfig {
    /// Upper bound on refinement passes. Zero disables refinement.
    #[serde(default = "default_max_refinement_iterations")]
    pub max_refinement_iterations: u32,
    /// Deadline for one generation call, in milliseconds.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
    /// Temperature used when a stage does not set one.
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    /// Token budget used when a stage does not set one.
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: u32,
    /// Retry policy for retryable generation failures.
    #[serde(default)]
    pub retry: RetryConfig,
    /// What the pipeline does after a failed stage.
    #[serde(default)]
    pub failure_mode: FailureMode,
    /// Chunking of long documents.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Concurrent pipeline runs when summarizing many documents or chunks.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Whether the summarizer caches results by content fingerprint.
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    /// Seconds a cached summary stays valid. Zero keeps entries until evicted.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum cached summaries; the oldest are evicted beyond this.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Characters of payload attached to activity events.
    #[serde(default = "default_activity_excerpt_chars")]
    pub activity_excerpt_chars: usize,
}

fn default_max_refinement_iterations() -> u32 {
    2
}

fn default_stage_timeout_ms() -> u64 {
    60_000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    256
}

fn default_activity_excerpt_chars() -> usize {
    120
}

impl Default for SummaryflowConfig {
    fn default() -> Self {
        Self {
            max_refinement_iterations: default_max_refinement_iterations(),
            stage_timeout_ms: default_stage_timeout_ms(),
            default_temperature: default_temperature(),
            default_max_output_tokens: default_max_output_tokens(),
            retry: RetryConfig::default(),
            failure_mode: FailureMode::default(),
            chunking: ChunkingConfig::default(),
            max_concurrent_runs: default_max_concurrent_runs(),
            cache_enabled: default_cache_enabled(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            activity_excerpt_chars: default_activity_excerpt_chars(),
        }
    }
}

impl SummaryflowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults overridden by `SUMMARYFLOW_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Config` if a value fails to parse or validate.
    pub fn from_env() -> Result<Self, SummaryflowError> {
        Self::extract(Self::figment())
    }

    /// Loads defaults, then a TOML file, then environment variables.
    ///
    /// A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Config` if a value fails to parse or validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SummaryflowError> {
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Parses a TOML string over the defaults, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Config` if a value fails to parse or validate.
    pub fn from_toml_str(toml: &str) -> Result<Self, SummaryflowError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self, SummaryflowError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `SummaryflowError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), SummaryflowError> {
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(SummaryflowError::Config(format!(
                "default_temperature must be within [0, 1], got {}",
                self.default_temperature
            )));
        }
        if self.stage_timeout_ms == 0 {
            return Err(SummaryflowError::Config("stage_timeout_ms must be positive".into()));
        }
        if self.default_max_output_tokens == 0 {
            return Err(SummaryflowError::Config(
                "default_max_output_tokens must be positive".into(),
            ));
        }
        if self.max_concurrent_runs == 0 {
            return Err(SummaryflowError::Config("max_concurrent_runs must be positive".into()));
        }
        if self.cache_enabled && self.cache_max_entries == 0 {
            return Err(SummaryflowError::Config("cache_max_entries must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SummaryflowError::Config("retry.max_attempts must be at least 1".into()));
        }
        self.chunking.validate()
    }

    /// Sets the refinement cap.
    #[must_use]
    pub fn with_max_refinement_iterations(mut self, cap: u32) -> Self {
        self.max_refinement_iterations = cap;
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the default temperature.
    #[must_use]
    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the chunking configuration.
    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Enables or disables the result cache.
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Sets the cache time-to-live in seconds; zero disables expiry.
    #[must_use]
    pub fn with_cache_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.cache_ttl_secs = ttl_secs;
        self
    }

    /// Sets the cache size bound.
    #[must_use]
    pub fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = max_entries;
        self
    }
}
