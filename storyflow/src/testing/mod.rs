//! Testing utilities for storyflow pipelines.
//!
//! This module provides:
//! - Mock collaborators
//! - Assertions on run outcomes and checkpoints
//! - Fixtures building executors and orchestrators

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_artifact, assert_error_at, assert_no_errors, assert_outcome_completed,
    assert_outcome_failed_at, assert_outcome_succeeded, assert_pointer,
};
pub use fixtures::{scenario_registry, scenario_script, TestFixture};
pub use mocks::{
    FailingCollaborator, GatedCollaborator, RecordedCall, RecordingCollaborator,
    ScriptedCollaborator, SlowCollaborator,
};
