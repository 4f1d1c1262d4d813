//! # Summaryflow
//!
//! Multi-stage document summarization over a pluggable text generator.
//!
//! Summaryflow runs a fixed chain of generation stages over a typed state
//! store:
//!
//! - **Typed state**: every stage reads and writes keys from a closed schema
//! - **Build-time validation**: broken chains are rejected before any run
//! - **Bounded refinement**: a self-refinement loop with a hard iteration cap
//! - **Failure classification**: retryable, degradable and fatal generator errors
//! - **Activity log**: before/after events for every stage through an explicit sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use summaryflow::prelude::*;
//!
//! let summarizer = Summarizer::builder()
//!     .generator(Arc::new(MyModelClient::new()))
//!     .config(SummaryflowConfig::from_env()?)
//!     .build()?;
//!
//! let report = summarizer
//!     .summarize(&document, &SummaryPreferences::default())
//!     .await?;
//! println!("{}", report.text);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod chunking;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod generation;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod summarizer;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::SummaryflowConfig;
    pub use crate::context::{
        RunContext, RunIdentity, SharedState, StateKey, StateValue, SummaryFormat,
        SummaryLength, SummaryPreferences, SummaryStyle,
    };
    pub use crate::core::{StageOutput, StageStatus};
    pub use crate::errors::{
        GenerationError, GenerationErrorKind, MalformedPipelineError, StageFailure,
        SummaryflowError,
    };
    pub use crate::events::{
        ActivityEvent, ActivityPhase, ActivitySink, LoggingActivitySink, NoOpActivitySink,
        RedactingActivitySink,
    };
    pub use crate::generation::{GenerationRequest, TextGenerator};
    pub use crate::pipeline::{
        FailureMode, LinearPipeline, PipelineBuilder, PipelineReport, RefinementLoop,
        RetryConfig,
    };
    pub use crate::stages::{GenerationStage, PromptTemplate, Stage, StageDescriptor};
    pub use crate::summarizer::{PromptSet, Summarizer, SummaryReport};
}
