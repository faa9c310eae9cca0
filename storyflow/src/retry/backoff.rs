//! Backoff policy for rate-limit notices that carry no recommended wait.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the wait grows with consecutive notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Randomization applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    #[default]
    Equal,
    /// min(max, random(base, prev * 3))
    Decorrelated,
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    120_000
}

fn default_reset_after_ms() -> u64 {
    60_000
}

/// Backoff configuration shared by every countdown key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// First wait in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any wait in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// A notice arriving later than this after the key's last countdown ended
    /// starts again from the base delay.
    #[serde(default = "default_reset_after_ms")]
    pub reset_after_ms: u64,
    /// Growth strategy.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            reset_after_ms: default_reset_after_ms(),
            strategy: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl BackoffPolicy {
    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the reset window.
    #[must_use]
    pub fn with_reset_after_ms(mut self, window: u64) -> Self {
        self.reset_after_ms = window;
        self
    }

    /// Sets the growth strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Converts a recommended wait in seconds, capped at the maximum.
    ///
    /// Negative and NaN hints wait nothing; hints too large for a
    /// [`Duration`] wait the maximum.
    #[must_use]
    pub fn hinted_delay(&self, seconds: f64) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        if seconds.is_nan() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(seconds).map_or(cap, |wait| wait.min(cap))
    }

    /// Un-jittered delay of an attempt, capped at the maximum.
    #[must_use]
    pub fn raw_delay_ms(&self, attempt: u32) -> u64 {
        let base = self.base_delay_ms;
        let delay = match self.strategy {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(attempt)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt) + 1),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_delay_ms)
    }
}

/// Consecutive-notice state of one countdown key.
#[derive(Debug, Clone, Default)]
pub struct BackoffState {
    /// Number of unhinted notices since the last reset.
    pub attempt: u32,
    previous_ms: Option<u64>,
}

impl BackoffState {
    /// Computes the next wait and advances the attempt counter.
    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        let delay = policy.raw_delay_ms(self.attempt);
        let base = policy.base_delay_ms.min(policy.max_delay_ms);

        let jittered = match policy.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay == 0 => 0,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
            JitterStrategy::Decorrelated => {
                let previous = self.previous_ms.unwrap_or(base);
                let upper = previous.saturating_mul(3).min(policy.max_delay_ms);
                if upper <= base {
                    base
                } else {
                    rand::thread_rng().gen_range(base..=upper)
                }
            }
        };

        self.previous_ms = Some(jittered);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered)
    }

    /// Starts again from the base delay.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
