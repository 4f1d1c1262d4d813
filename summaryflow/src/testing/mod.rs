//! Testing utilities for summaryflow pipelines.
//!
//! This module provides:
//! - Deterministic text generators
//! - Assertions for stage outputs, state and activity

mod assertions;
mod mocks;

pub use assertions::{
    assert_output_failed, assert_output_metadata, assert_output_status, assert_output_succeeded,
    assert_stage_order, assert_state_text,
};
pub use mocks::{EchoGenerator, FailingGenerator, FnGenerator, MarkerRefiner, ScriptedGenerator};
