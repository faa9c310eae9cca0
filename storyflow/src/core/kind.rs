//! Pipeline kinds and step indices.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The coarse flows the orchestrator drives.
///
/// Each kind is an independent state machine with its own step pointer and
/// error map. Only one run, of any kind, may be in flight at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Creation of a brand new game.
    NewGame,
    /// Transition between two segments of the same in-game day.
    SegmentTransition,
    /// Analysis run at the end of an in-game day.
    EndOfDay,
}

impl PipelineKind {
    /// All kinds, in the order they are inspected when picking a run to resume.
    pub const ALL: [Self; 3] = [Self::NewGame, Self::SegmentTransition, Self::EndOfDay];

    /// Stable snake_case label used in events and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewGame => "new_game",
            Self::SegmentTransition => "segment_transition",
            Self::EndOfDay => "end_of_day",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a kind's step pointer.
///
/// `0` means not started. The step with index `i` runs while the pointer is
/// `i`, and a successful run moves the pointer to `i + 1`. The pointer equal
/// to the number of steps of the kind is the completion sentinel.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepIndex(pub u32);

impl StepIndex {
    /// The pointer value before any step has run.
    pub const NOT_STARTED: Self = Self(0);

    /// Creates a step index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the index of the following step.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns true if this is the not-started sentinel.
    #[must_use]
    pub const fn is_not_started(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for StepIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(PipelineKind::NewGame.to_string(), "new_game");
        assert_eq!(PipelineKind::SegmentTransition.to_string(), "segment_transition");
        assert_eq!(PipelineKind::EndOfDay.to_string(), "end_of_day");
    }

    #[test]
    fn test_kind_serialize() {
        let json = serde_json::to_string(&PipelineKind::EndOfDay).unwrap();
        assert_eq!(json, r#""end_of_day""#);

        let kind: PipelineKind = serde_json::from_str(r#""segment_transition""#).unwrap();
        assert_eq!(kind, PipelineKind::SegmentTransition);
    }

    #[test]
    fn test_step_index_next() {
        assert!(StepIndex::NOT_STARTED.is_not_started());
        assert_eq!(StepIndex::new(2).next(), StepIndex::new(3));
        assert!(!StepIndex::new(1).is_not_started());
    }

    #[test]
    fn test_step_index_is_transparent() {
        let json = serde_json::to_string(&StepIndex::new(4)).unwrap();
        assert_eq!(json, "4");
    }
}
