//! Informational signals crossing the collaborator boundary.

use crate::core::PipelineKind;
use crate::events::{get_event_sink, EventSink};
use crate::retry::{BackoffPolicy, CountdownController};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Non-fatal notices a collaborator may raise while its call is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum CollaboratorSignal {
    /// The collaborator switched to another API key; the call continues.
    KeyRotated {
        /// Free-form detail for the UI.
        detail: String,
    },
    /// The collaborator is rate limited and waits before trying again.
    RateLimitWait {
        /// Recommended wait; `None` lets the backoff policy decide.
        seconds: Option<f64>,
    },
}

impl CollaboratorSignal {
    /// Event type used when forwarding the signal.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::KeyRotated { .. } => "collaborator.key_rotated",
            Self::RateLimitWait { .. } => "collaborator.rate_limited",
        }
    }
}

/// Handle through which a collaborator raises signals for its step.
///
/// Signals are forwarded untouched to the event sink; rate-limit waits also
/// drive the shared countdown.
#[derive(Clone)]
pub struct StepSignals {
    kind: PipelineKind,
    step_name: String,
    events: Arc<dyn EventSink>,
    countdown: Option<Arc<CountdownController>>,
}

impl std::fmt::Debug for StepSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSignals")
            .field("kind", &self.kind)
            .field("step_name", &self.step_name)
            .field("has_countdown", &self.countdown.is_some())
            .finish()
    }
}

impl StepSignals {
    /// Creates a signal handle wired to an event sink and countdown.
    #[must_use]
    pub fn new(
        kind: PipelineKind,
        step_name: impl Into<String>,
        events: Arc<dyn EventSink>,
        countdown: Option<Arc<CountdownController>>,
    ) -> Self {
        Self {
            kind,
            step_name: step_name.into(),
            events,
            countdown,
        }
    }

    /// Creates a handle that only logs, using the global event sink.
    #[must_use]
    pub fn detached(kind: PipelineKind, step_name: impl Into<String>) -> Self {
        Self::new(kind, step_name, get_event_sink(), None)
    }

    /// The countdown key of this step.
    #[must_use]
    pub fn countdown_key(&self) -> String {
        format!("{}:{}", self.kind, self.step_name)
    }

    /// Forwards a signal to the event sink.
    pub fn emit(&self, signal: &CollaboratorSignal) {
        let mut data = serde_json::to_value(signal).unwrap_or_default();
        if let Some(object) = data.as_object_mut() {
            object.insert("kind".to_string(), serde_json::json!(self.kind));
            object.insert("step".to_string(), serde_json::json!(self.step_name));
        }
        self.events.try_emit(signal.event_type(), Some(data));
    }

    /// Reports a key rotation. The pending call continues.
    pub fn key_rotated(&self, detail: impl Into<String>) {
        let detail = detail.into();
        info!(kind = %self.kind, step = %self.step_name, %detail, "Collaborator rotated key");
        self.emit(&CollaboratorSignal::KeyRotated { detail });
    }

    /// Reports a rate-limit wait and suspends until the shared countdown ends.
    ///
    /// Returns the wait that was announced.
    pub async fn rate_limited(&self, seconds: Option<f64>) -> Duration {
        self.emit(&CollaboratorSignal::RateLimitWait { seconds });

        match &self.countdown {
            Some(countdown) => {
                let wait = countdown.start_countdown(&self.countdown_key(), seconds, self.kind);
                countdown.await_countdown().await;
                wait
            }
            None => {
                let wait = BackoffPolicy::default().hinted_delay(seconds.unwrap_or(0.0));
                debug!(wait_ms = wait.as_millis() as u64, "Rate limited without countdown");
                tokio::time::sleep(wait).await;
                wait
            }
        }
    }
}
