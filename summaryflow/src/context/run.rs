//! Per-run execution context.

use std::sync::Arc;
use std::time::Duration;

use super::{RunIdentity, SharedState, SummaryPreferences};
use crate::cancellation::CancellationToken;
use crate::config::SummaryflowConfig;
use crate::events::{ActivityEvent, ActivityPhase, ActivitySink, NoOpActivitySink};

/// Everything a stage needs while a pipeline run is in flight.
///
/// One `RunContext` exists per run. Stages receive it by reference and never
/// hold on to it past their own execution.
#[derive(Clone)]
pub struct RunContext {
    identity: RunIdentity,
    state: Arc<SharedState>,
    config: Arc<SummaryflowConfig>,
    sink: Arc<dyn ActivitySink>,
    cancellation: Arc<CancellationToken>,
}

impl RunContext {
    /// Creates a context over an existing state store.
    #[must_use]
    pub fn new(state: Arc<SharedState>, config: Arc<SummaryflowConfig>) -> Self {
        Self {
            identity: RunIdentity::new(),
            state,
            config,
            sink: Arc::new(NoOpActivitySink),
            cancellation: Arc::new(CancellationToken::new()),
        }
    }

    /// Creates a context with a freshly seeded store.
    #[must_use]
    pub fn seeded(
        input_text: impl Into<String>,
        preferences: &SummaryPreferences,
        config: Arc<SummaryflowConfig>,
    ) -> Self {
        Self::new(Arc::new(SharedState::seeded(input_text, preferences)), config)
    }

    /// Sets the activity sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the run identity.
    #[must_use]
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the shared state store.
    #[must_use]
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SummaryflowConfig {
        &self.config
    }

    /// Returns the activity sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn ActivitySink> {
        &self.sink
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Checks whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the deadline for one generation call.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.config.stage_timeout_ms)
    }

    /// Emits an activity event for a stage. Never fails.
    pub fn emit(&self, stage_name: &str, phase: ActivityPhase, payload: Option<&str>) {
        let mut event = ActivityEvent::new(stage_name, phase).with_run_id(self.identity.run_id);
        if let Some(payload) = payload {
            event = event.with_excerpt(payload, self.config.activity_excerpt_chars);
        }
        self.sink.try_emit(&event);
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("identity", &self.identity)
            .field("keys", &self.state.keys())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateKey;
    use crate::events::CollectingActivitySink;

    #[test]
    fn test_seeded_context() {
        let ctx = RunContext::seeded(
            "hello",
            &SummaryPreferences::default(),
            Arc::new(SummaryflowConfig::default()),
        );

        assert_eq!(ctx.state().get_text(StateKey::InputText).as_deref(), Some("hello"));
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_emit_reaches_sink() {
        let sink = Arc::new(CollectingActivitySink::new());
        let ctx = RunContext::seeded(
            "hello",
            &SummaryPreferences::default(),
            Arc::new(SummaryflowConfig::default()),
        )
        .with_sink(sink.clone());

        ctx.emit("analyze", ActivityPhase::Before, Some("payload"));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage_name, "analyze");
        assert_eq!(events[0].run_id, Some(ctx.identity().run_id));
    }

    #[test]
    fn test_shared_cancellation_token() {
        let token = Arc::new(CancellationToken::new());
        let ctx = RunContext::new(
            Arc::new(SharedState::new()),
            Arc::new(SummaryflowConfig::default()),
        )
        .with_cancellation(token.clone());

        token.cancel("caller gave up");
        assert!(ctx.is_cancelled());
    }
}
