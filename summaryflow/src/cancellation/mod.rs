//! Cooperative cancellation for pipeline runs.
//!
//! Pipelines check the token before each stage and each refinement pass.
//! Generation stages also race the in-flight call against the token.

mod token;

pub use token::{CancelCallback, CancellationToken};
