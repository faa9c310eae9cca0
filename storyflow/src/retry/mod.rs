//! Manual retry and rate-limit countdown.
//!
//! The executor never retries on its own. A failed step waits for the user,
//! who retries it through the [`RetryController`]; rate-limit notices raised
//! while a call is pending drive the shared [`CountdownController`].

mod backoff;
mod countdown;

pub use backoff::{BackoffPolicy, BackoffState, BackoffStrategy, JitterStrategy};
pub use countdown::{Countdown, CountdownController};

use crate::core::{PipelineKind, StepIndex};
use crate::executor::{FailedStep, RetryScope, RunOutcome, StepExecutor};
use std::sync::Arc;
use tracing::debug;

/// Re-enters the executor at a failed step.
#[derive(Debug, Clone)]
pub struct RetryController {
    executor: Arc<StepExecutor>,
}

impl RetryController {
    /// Creates a controller over an executor.
    #[must_use]
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self { executor }
    }

    /// Clears the error of `index` and runs from it to the terminal.
    pub async fn retry_step(&self, kind: PipelineKind, index: StepIndex) -> RunOutcome {
        let generation = self.executor.session().current();
        self.executor
            .retry(kind, index, generation, RetryScope::ToTerminal)
            .await
    }

    /// Clears the error of `index` and runs that step only.
    pub async fn retry_only(&self, kind: PipelineKind, index: StepIndex) -> RunOutcome {
        let generation = self.executor.session().current();
        self.executor
            .retry(kind, index, generation, RetryScope::Single)
            .await
    }

    /// Retries the last failed step, continuing to the terminal.
    ///
    /// Returns `None` when no failure is remembered.
    pub async fn retry_last(&self) -> Option<RunOutcome> {
        let Some(failed) = self.last_failure() else {
            debug!("No failed step to retry");
            return None;
        };
        Some(self.retry_step(failed.kind, failed.step).await)
    }

    /// Returns the last failed step.
    #[must_use]
    pub fn last_failure(&self) -> Option<FailedStep> {
        self.executor.last_failure()
    }
}
