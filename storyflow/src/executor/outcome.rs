//! Results of executor entry points.

use crate::core::{PipelineKind, StepIndex};
use crate::errors::{LeadershipConflict, StaleSessionDrop, WriteRefused};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened when the executor was asked to run.
///
/// Entry points always return one of these; failures are values, never
/// errors or panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A step succeeded and the run is not complete yet.
    Advanced {
        /// The kind.
        kind: PipelineKind,
        /// The step that ran.
        step: StepIndex,
        /// The pointer after the step.
        pointer: StepIndex,
    },
    /// The pointer reached the terminal value.
    Completed {
        /// The kind.
        kind: PipelineKind,
    },
    /// A step failed; its error is recorded and waits for a manual retry.
    Failed {
        /// The kind.
        kind: PipelineKind,
        /// The failing step.
        step: StepIndex,
        /// The recorded message.
        message: String,
    },
    /// A persisted error blocks automatic resume.
    AwaitingRetry {
        /// The kind.
        kind: PipelineKind,
        /// The step holding the error.
        step: StepIndex,
    },
    /// The kind has nothing left to run.
    NothingToResume {
        /// The kind.
        kind: PipelineKind,
    },
    /// The step lies beyond the pointer and cannot run yet.
    OutOfOrder {
        /// The kind.
        kind: PipelineKind,
        /// The requested step.
        requested: StepIndex,
        /// The persisted pointer.
        pointer: StepIndex,
    },
    /// The kind declares no such step.
    UnknownStep {
        /// The kind.
        kind: PipelineKind,
        /// The requested step.
        step: StepIndex,
    },
    /// Another run is in flight.
    AlreadyRunning,
    /// The run's generation was superseded; its writes were dropped.
    Stale {
        /// The generation the run was dispatched under.
        issued: u64,
        /// The live generation.
        live: u64,
    },
    /// This tab does not hold leadership of the save.
    Blocked {
        /// The tab holding leadership, when known.
        holder: Option<String>,
    },
    /// The checkpoint store failed mid-commit; reload required.
    Fatal {
        /// Description of the failure.
        message: String,
    },
}

impl RunOutcome {
    /// Returns true if the requested work ran successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Advanced { .. } | Self::Completed { .. })
    }

    /// Returns true for a recorded step failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns true if nothing ran because the request was refused.
    #[must_use]
    pub fn is_refused(&self) -> bool {
        matches!(
            self,
            Self::AwaitingRetry { .. }
                | Self::NothingToResume { .. }
                | Self::OutOfOrder { .. }
                | Self::UnknownStep { .. }
                | Self::AlreadyRunning
                | Self::Blocked { .. }
        )
    }
}

impl From<StaleSessionDrop> for RunOutcome {
    fn from(drop: StaleSessionDrop) -> Self {
        Self::Stale {
            issued: drop.issued,
            live: drop.live,
        }
    }
}

impl From<LeadershipConflict> for RunOutcome {
    fn from(conflict: LeadershipConflict) -> Self {
        Self::Blocked {
            holder: Some(conflict.holder),
        }
    }
}

impl From<WriteRefused> for RunOutcome {
    fn from(refused: WriteRefused) -> Self {
        match refused {
            WriteRefused::Stale(drop) => drop.into(),
            WriteRefused::Blocked(conflict) => conflict.into(),
        }
    }
}

/// The last step failure, kept for "retry last".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStep {
    /// The kind.
    pub kind: PipelineKind,
    /// The failing step.
    pub step: StepIndex,
    /// The step name.
    pub step_name: String,
    /// The recorded message.
    pub message: String,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}
