//! Activity log for observability.
//!
//! Stages emit a `Before` and an `After` event around every invocation.
//! Sinks are passed explicitly through the run context; there is no global
//! sink.

mod redact;
mod sink;

pub use redact::{RedactingActivitySink, REDACTED};
pub use sink::{
    ActivityEvent, ActivityPhase, ActivitySink, CollectingActivitySink, LoggingActivitySink,
    NoOpActivitySink,
};
