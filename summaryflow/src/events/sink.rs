//! Activity sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Level};
use uuid::Uuid;

/// Which side of a stage invocation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityPhase {
    /// Emitted right before the stage runs.
    Before,
    /// Emitted right after the stage wrote its output.
    After,
}

impl std::fmt::Display for ActivityPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// A structured activity log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// The stage the event belongs to.
    pub stage_name: String,
    /// Before or after.
    pub phase: ActivityPhase,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// The run the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// A truncated view of the stage's input or output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_excerpt: Option<String>,
}

impl ActivityEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(stage_name: impl Into<String>, phase: ActivityPhase) -> Self {
        Self {
            stage_name: stage_name.into(),
            phase,
            timestamp: Utc::now(),
            run_id: None,
            payload_excerpt: None,
        }
    }

    /// Sets the run ID.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Attaches the first `max_chars` characters of a payload.
    #[must_use]
    pub fn with_excerpt(mut self, payload: &str, max_chars: usize) -> Self {
        let mut excerpt: String = payload.chars().take(max_chars).collect();
        if payload.chars().count() > max_chars {
            excerpt.push('…');
        }
        self.payload_excerpt = Some(excerpt);
        self
    }
}

/// Receiver for activity events.
///
/// The pipeline emits but never interprets events. Implementations must not
/// panic and must not block for long.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Records an event without blocking.
    fn try_emit(&self, event: &ActivityEvent);

    /// Records an event asynchronously.
    async fn emit(&self, event: &ActivityEvent) {
        self.try_emit(event);
    }
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpActivitySink;

impl ActivitySink for NoOpActivitySink {
    fn try_emit(&self, _event: &ActivityEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingActivitySink {
    level: Level,
}

impl Default for LoggingActivitySink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingActivitySink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl ActivitySink for LoggingActivitySink {
    fn try_emit(&self, event: &ActivityEvent) {
        if self.level == Level::DEBUG {
            debug!(
                stage = %event.stage_name,
                phase = %event.phase,
                run_id = ?event.run_id,
                excerpt = ?event.payload_excerpt,
                "Stage activity"
            );
        } else {
            info!(
                stage = %event.stage_name,
                phase = %event.phase,
                run_id = ?event.run_id,
                excerpt = ?event.payload_excerpt,
                "Stage activity"
            );
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct CollectingActivitySink {
    events: parking_lot::RwLock<Vec<ActivityEvent>>,
}

impl CollectingActivitySink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events for one stage.
    #[must_use]
    pub fn events_for(&self, stage_name: &str) -> Vec<ActivityEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage_name == stage_name)
            .cloned()
            .collect()
    }

    /// Returns stage names in emission order for one phase.
    #[must_use]
    pub fn stages_in_order(&self, phase: ActivityPhase) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.phase == phase)
            .map(|e| e.stage_name.clone())
            .collect()
    }
}

impl ActivitySink for CollectingActivitySink {
    fn try_emit(&self, event: &ActivityEvent) {
        self.events.write().push(event.clone());
    }
}
