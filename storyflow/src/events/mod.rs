//! Observability events.
//!
//! Every component reports what it does through an [`EventSink`]. Sinks are
//! passed explicitly to the orchestrator; a process-wide sink can also be
//! installed for code that runs outside of it.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::{PipelineKind, StepIndex};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;

/// A step began executing.
pub const STEP_STARTED: &str = "step.started";
/// A step persisted its artifacts and advanced the pointer.
pub const STEP_COMPLETED: &str = "step.completed";
/// A step failed and its error was recorded.
pub const STEP_FAILED: &str = "step.failed";
/// A missing input was resolved through a fallback and persisted.
pub const STEP_HYDRATED: &str = "step.hydrated";
/// A step's writes were dropped because its generation was superseded.
pub const STEP_STALE_DROPPED: &str = "step.stale_dropped";
/// The supervisory timeout of a step elapsed; the step keeps running.
pub const STEP_TIMEOUT_ELAPSED: &str = "step.timeout_elapsed";
/// A run reached the terminal step.
pub const RUN_COMPLETED: &str = "run.completed";
/// This tab conceded leadership of the save.
pub const LEADERSHIP_CONCEDED: &str = "leadership.conceded";

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Installs the process-wide event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Removes the process-wide event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Returns the process-wide event sink, or a [`NoOpEventSink`] if none is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

/// Builds the payload shared by all step events.
#[must_use]
pub fn step_data(kind: PipelineKind, step: StepIndex, name: &str) -> serde_json::Value {
    json!({
        "kind": kind,
        "step": step,
        "step_name": name,
    })
}
