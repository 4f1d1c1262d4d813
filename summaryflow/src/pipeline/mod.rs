//! Pipeline building and execution.
//!
//! This module provides:
//! - The pipeline builder with wiring validation
//! - Sequential execution with configurable failure handling
//! - The bounded refinement loop
//! - Retry policy for generation calls

mod builder;
mod linear;
mod refinement;
mod retry;

pub use builder::PipelineBuilder;
pub use linear::{FailureMode, LinearPipeline, PipelineReport};
pub use refinement::{LoopOutcome, LoopState, RefinementLoop, StopReason};
pub use retry::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision,
    RetryState, Retried,
};
