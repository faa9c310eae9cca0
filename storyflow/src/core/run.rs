//! Run bookkeeping as seen by the UI.

use super::{PipelineKind, StepIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted error messages of one kind, keyed by the failing step.
pub type StepErrors = BTreeMap<StepIndex, String>;

/// Snapshot of a kind's run bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// The pipeline kind.
    pub kind: PipelineKind,
    /// The persisted step pointer.
    pub current_step: StepIndex,
    /// The completion sentinel for this kind.
    pub terminal: StepIndex,
    /// The pending error, if a step failed and has not been retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailureRecord>,
}

/// A persisted step failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailureRecord {
    /// The failing step.
    pub step: StepIndex,
    /// The recorded message.
    pub message: String,
}

impl RunStatus {
    /// Builds a status from the persisted pointer and error map.
    #[must_use]
    pub fn from_parts(
        kind: PipelineKind,
        current_step: StepIndex,
        terminal: StepIndex,
        errors: &StepErrors,
    ) -> Self {
        let error = errors
            .iter()
            .next()
            .map(|(step, message)| StepFailureRecord {
                step: *step,
                message: message.clone(),
            });

        Self {
            kind,
            current_step,
            terminal,
            error,
        }
    }

    /// Returns true once the pointer reached the completion sentinel.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.terminal
    }

    /// Returns true if the run has started but not completed.
    ///
    /// A run whose first step failed is in progress even though its pointer
    /// never moved.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        (!self.current_step.is_not_started() || self.has_error()) && !self.is_complete()
    }

    /// Returns true if a failure is waiting for a manual retry.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
