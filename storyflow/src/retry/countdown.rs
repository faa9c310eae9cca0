//! The shared rate-limit countdown.
//!
//! There is one countdown per orchestrator, shown by the UI as a single
//! indicator. A notice whose wait ends later than the active countdown
//! extends it; a shorter one is absorbed.

use super::backoff::{BackoffPolicy, BackoffState};
use crate::core::PipelineKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound on any countdown, whatever the policy says.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// The countdown currently shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Countdown {
    /// The step key (`kind:step_name`) that raised the latest extending notice.
    pub key: String,
    /// The kind whose run is waiting.
    pub kind: PipelineKind,
    /// Total wait announced by the latest extending notice.
    pub total: Duration,
    /// Wall-clock end of the wait.
    pub ends_at: DateTime<Utc>,
}

impl Countdown {
    /// Time left, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.ends_at - Utc::now()).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct KeyBackoff {
    state: BackoffState,
    last_ends: Option<Instant>,
}

/// Drives the shared countdown and per-key backoff.
#[derive(Debug)]
pub struct CountdownController {
    policy: BackoffPolicy,
    keys: DashMap<String, KeyBackoff>,
    deadline: Mutex<Option<Instant>>,
    state: watch::Sender<Option<Countdown>>,
}

impl Default for CountdownController {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl CountdownController {
    /// Creates a controller using `policy` for unhinted notices.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            policy,
            keys: DashMap::new(),
            deadline: Mutex::new(None),
            state,
        }
    }

    /// Registers a rate-limit notice and returns the wait the caller observes.
    ///
    /// `seconds` is the collaborator's recommendation, capped at the policy's
    /// maximum delay; `None` or a non-finite value asks the backoff policy for
    /// the key. The returned wait is the time until the shared countdown
    /// ends, which may be longer than the notice's own wait.
    pub fn start_countdown(&self, key: &str, seconds: Option<f64>, kind: PipelineKind) -> Duration {
        let now = Instant::now();
        let wait = match seconds {
            Some(seconds) if seconds.is_finite() => self.policy.hinted_delay(seconds),
            _ => self.backoff_delay(key, now),
        }
        .min(MAX_WAIT);
        let Some(ends) = now.checked_add(wait) else {
            debug!(key, "Countdown end out of range, not waiting");
            return Duration::ZERO;
        };
        self.keys.entry(key.to_string()).or_default().last_ends = Some(ends);

        let mut deadline = self.deadline.lock();
        match *deadline {
            Some(active) if active >= ends => {
                debug!(key, wait_ms = wait.as_millis() as u64, "Notice absorbed by active countdown");
                active.saturating_duration_since(now)
            }
            _ => {
                *deadline = Some(ends);
                self.state.send_replace(Some(Countdown {
                    key: key.to_string(),
                    kind,
                    total: wait,
                    ends_at: Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default(),
                }));
                debug!(key, wait_ms = wait.as_millis() as u64, "Countdown started");
                wait
            }
        }
    }

    fn backoff_delay(&self, key: &str, now: Instant) -> Duration {
        let mut entry = self.keys.entry(key.to_string()).or_default();
        let reset_after = Duration::from_millis(self.policy.reset_after_ms);
        if entry
            .last_ends
            .is_some_and(|ends| now.saturating_duration_since(ends) > reset_after)
        {
            entry.state.reset();
        }
        entry.state.next_delay(&self.policy)
    }

    /// Waits until the shared countdown ends, following extensions.
    pub async fn await_countdown(&self) {
        loop {
            let deadline = *self.deadline.lock();
            let Some(deadline) = deadline else {
                return;
            };
            if Instant::now() >= deadline {
                self.finish(deadline);
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn finish(&self, expected: Instant) {
        let mut deadline = self.deadline.lock();
        if *deadline == Some(expected) {
            *deadline = None;
            self.state.send_replace(None);
        }
    }

    /// Returns the active countdown.
    #[must_use]
    pub fn current(&self) -> Option<Countdown> {
        self.state.borrow().clone()
    }

    /// Returns true while a countdown is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deadline.lock().is_some_and(|deadline| deadline > Instant::now())
    }

    /// Subscribes to countdown changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Countdown>> {
        self.state.subscribe()
    }

    /// Number of unhinted notices counted for `key` since its last reset.
    #[must_use]
    pub fn attempts(&self, key: &str) -> u32 {
        self.keys.get(key).map_or(0, |entry| entry.state.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::JitterStrategy;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
            .with_base_delay_ms(40)
            .with_max_delay_ms(1_000)
            .with_jitter(JitterStrategy::None)
    }

    #[tokio::test]
    async fn test_hinted_wait_is_used() {
        let controller = CountdownController::new(policy());

        let wait = controller.start_countdown("end_of_day:day_summary", Some(0.05), PipelineKind::EndOfDay);

        assert_eq!(wait, Duration::from_millis(50));
        let countdown = controller.current().unwrap();
        assert_eq!(countdown.key, "end_of_day:day_summary");
        assert_eq!(countdown.kind, PipelineKind::EndOfDay);
        assert!(controller.is_active());

        controller.await_countdown().await;
        assert!(controller.current().is_none());
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_longer_notice_extends_countdown() {
        let controller = CountdownController::new(policy());
        let mut updates = controller.subscribe();

        controller.start_countdown("a", Some(0.03), PipelineKind::NewGame);
        let extended = controller.start_countdown("b", Some(0.12), PipelineKind::NewGame);
        let absorbed = controller.start_countdown("c", Some(0.01), PipelineKind::NewGame);

        assert_eq!(extended, Duration::from_millis(120));
        assert!(absorbed > Duration::from_millis(10));
        assert_eq!(controller.current().unwrap().key, "b");
        assert!(updates.has_changed().unwrap());

        let started = std::time::Instant::now();
        controller.await_countdown().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(updates.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_unhinted_notices_back_off_per_key() {
        let controller = CountdownController::new(policy());

        let first = controller.start_countdown("k", None, PipelineKind::SegmentTransition);
        let second = controller.start_countdown("k", None, PipelineKind::SegmentTransition);
        let other = controller.start_countdown("other", None, PipelineKind::SegmentTransition);

        assert_eq!(first, Duration::from_millis(40));
        assert_eq!(second, Duration::from_millis(80));
        assert!(other >= Duration::from_millis(40));
        assert_eq!(controller.attempts("k"), 2);
        assert_eq!(controller.attempts("other"), 1);
    }

    #[tokio::test]
    async fn test_backoff_resets_after_quiet_window() {
        let controller = CountdownController::new(policy().with_reset_after_ms(10));

        controller.start_countdown("k", None, PipelineKind::EndOfDay);
        controller.await_countdown().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let wait = controller.start_countdown("k", None, PipelineKind::EndOfDay);
        assert_eq!(wait, Duration::from_millis(40));
        assert_eq!(controller.attempts("k"), 1);
    }

    #[tokio::test]
    async fn test_oversized_hints_are_capped() {
        let controller = CountdownController::new(policy());

        assert_eq!(
            controller.start_countdown("k", Some(1e20), PipelineKind::EndOfDay),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            controller.start_countdown("k", Some(f64::MAX), PipelineKind::EndOfDay),
            Duration::from_millis(1_000)
        );
        assert!(controller.start_countdown("k", Some(f64::INFINITY), PipelineKind::EndOfDay) <= Duration::from_millis(1_000));
        assert!(controller.start_countdown("k", Some(-5.0), PipelineKind::EndOfDay) <= Duration::from_millis(1_000));

        let unbounded = CountdownController::new(policy().with_max_delay_ms(u64::MAX));
        assert_eq!(unbounded.start_countdown("k", Some(1e20), PipelineKind::EndOfDay), MAX_WAIT);
    }

    #[tokio::test]
    async fn test_await_without_countdown_returns() {
        CountdownController::default().await_countdown().await;
    }
}
