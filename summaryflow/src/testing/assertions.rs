//! Test assertions for stage outputs, state and activity.

use crate::context::{SharedState, StateKey};
use crate::core::{StageOutput, StageStatus};
use crate::events::{ActivityPhase, CollectingActivitySink};

/// Asserts that the output indicates success.
pub fn assert_output_succeeded(output: &StageOutput) {
    assert!(
        output.is_success(),
        "Expected success from '{}', got status: {:?} ({:?})",
        output.stage,
        output.status,
        output.failure
    );
}

/// Asserts that the output indicates failure.
pub fn assert_output_failed(output: &StageOutput) {
    assert!(
        output.is_failure(),
        "Expected failure from '{}', got status: {:?}",
        output.stage,
        output.status
    );
}

/// Asserts that the output has the expected status.
pub fn assert_output_status(output: &StageOutput, expected: StageStatus) {
    assert_eq!(
        output.status, expected,
        "Expected status {:?} from '{}', got {:?}",
        expected, output.stage, output.status
    );
}

/// Asserts that the output metadata contains a specific key.
pub fn assert_output_metadata(output: &StageOutput, key: &str) {
    assert!(
        output.metadata.contains_key(key),
        "Expected metadata of '{}' to contain key '{}', but it doesn't",
        output.stage,
        key
    );
}

/// Asserts that a key holds the expected text.
pub fn assert_state_text(state: &SharedState, key: StateKey, expected: &str) {
    let actual = state.get_text(key);
    assert_eq!(
        actual.as_deref(),
        Some(expected),
        "Expected '{}' to hold {:?}, got {:?}",
        key,
        expected,
        actual
    );
}

/// Asserts that stages started in the given order.
pub fn assert_stage_order(sink: &CollectingActivitySink, expected: &[&str]) {
    let actual = sink.stages_in_order(ActivityPhase::Before);
    assert_eq!(
        actual, expected,
        "Expected stages to start in order {expected:?}, got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{StateValue, SummaryPreferences};
    use crate::events::{ActivityEvent, ActivitySink};

    #[test]
    fn test_output_assertions() {
        let output = StageOutput::ok("s", StateKey::Summary, "x".into())
            .add_metadata("iterations", serde_json::json!(1));
        assert_output_succeeded(&output);
        assert_output_status(&output, StageStatus::Ok);
        assert_output_metadata(&output, "iterations");
    }

    #[test]
    #[should_panic(expected = "Expected failure")]
    fn test_assert_failed_panics_on_success() {
        assert_output_failed(&StageOutput::ok("s", StateKey::Summary, "x".into()));
    }

    #[test]
    fn test_state_and_order_assertions() {
        let state = SharedState::seeded("in", &SummaryPreferences::default());
        state.set(StateKey::Summary, StateValue::text("out"));
        assert_state_text(&state, StateKey::Summary, "out");

        let sink = CollectingActivitySink::new();
        sink.try_emit(&ActivityEvent::new("a", ActivityPhase::Before));
        sink.try_emit(&ActivityEvent::new("a", ActivityPhase::After));
        sink.try_emit(&ActivityEvent::new("b", ActivityPhase::Before));
        assert_stage_order(&sink, &["a", "b"]);
    }
}
