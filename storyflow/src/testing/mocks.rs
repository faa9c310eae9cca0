//! Mock collaborators for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::collaborators::{Collaborator, CollaboratorRequest, CollaboratorResponse};
use crate::core::{PipelineKind, StepIndex};
use crate::errors::CollaboratorError;

/// A collaborator that answers each step from a script.
///
/// Steps without a scripted payload produce `{"<step_name>": "<step_name>"}`,
/// which satisfies any step producing a key equal to its own name.
#[derive(Debug, Default)]
pub struct ScriptedCollaborator {
    payloads: Mutex<BTreeMap<String, Value>>,
    costs: (u64, u64),
    call_count: AtomicUsize,
}

impl ScriptedCollaborator {
    /// Creates a collaborator with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the payload returned for `step_name`.
    #[must_use]
    pub fn with_payload(self, step_name: impl Into<String>, payload: Value) -> Self {
        self.payloads.lock().insert(step_name.into(), payload);
        self
    }

    /// Reports the same input and output cost for every step.
    #[must_use]
    pub fn with_costs(mut self, input_cost: u64, output_cost: u64) -> Self {
        self.costs = (input_cost, output_cost);
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let payload = self.payloads.lock().get(&request.step_name).cloned();
        let payload = payload.unwrap_or_else(|| {
            let mut object = Map::new();
            object.insert(request.step_name.clone(), Value::String(request.step_name.clone()));
            Value::Object(object)
        });
        let (input_cost, output_cost) = self.costs;
        Ok(CollaboratorResponse::new(payload).with_costs(input_cost, output_cost))
    }
}

/// A collaborator that fails a number of times, then delegates.
#[derive(Debug)]
pub struct FailingCollaborator<C> {
    inner: C,
    remaining: AtomicUsize,
    error: String,
}

impl FailingCollaborator<ScriptedCollaborator> {
    /// Fails every call.
    #[must_use]
    pub fn always(error: impl Into<String>) -> Self {
        Self::times(usize::MAX, error, ScriptedCollaborator::new())
    }
}

impl<C> FailingCollaborator<C> {
    /// Fails the first `failures` calls, then delegates to `inner`.
    #[must_use]
    pub fn times(failures: usize, error: impl Into<String>, inner: C) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
            error: error.into(),
        }
    }

    /// Returns how many failures are left.
    #[must_use]
    pub fn remaining_failures(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<C: Collaborator> Collaborator for FailingCollaborator<C> {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::failed(self.error.clone()));
        }
        self.inner.invoke(request).await
    }
}

/// A recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The pipeline kind.
    pub kind: PipelineKind,
    /// The executed step.
    pub step: StepIndex,
    /// The step name.
    pub step_name: String,
    /// The resolved inputs.
    pub inputs: BTreeMap<String, Value>,
    /// The selected model.
    pub model: String,
    /// Whether a context handle for the selected model was offered.
    pub had_context: bool,
}

/// A collaborator that records every request before delegating.
#[derive(Debug)]
pub struct RecordingCollaborator<C> {
    inner: C,
    calls: Mutex<Vec<RecordedCall>>,
}

impl<C> RecordingCollaborator<C> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the step names in call order.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|call| call.step_name.clone()).collect()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Clears recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl<C: Collaborator> Collaborator for RecordingCollaborator<C> {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        self.calls.lock().push(RecordedCall {
            kind: request.kind,
            step: request.step,
            step_name: request.step_name.clone(),
            inputs: request.inputs.clone(),
            model: request.model.clone(),
            had_context: request.reusable_context().is_some(),
        });
        self.inner.invoke(request).await
    }
}

/// A collaborator that blocks until released.
///
/// Useful to keep a call pending while the test performs a destructive
/// operation.
#[derive(Debug)]
pub struct GatedCollaborator<C> {
    inner: C,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl<C> GatedCollaborator<C> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }

    /// Waits until a call is pending.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one pending call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl<C: Collaborator> Collaborator for GatedCollaborator<C> {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.invoke(request).await
    }
}

/// A collaborator that takes time to answer.
#[derive(Debug)]
pub struct SlowCollaborator<C> {
    inner: C,
    delay: Duration,
}

impl<C> SlowCollaborator<C> {
    /// Wraps `inner` with a delay.
    #[must_use]
    pub fn new(inner: C, delay: Duration) -> Self {
        Self { inner, delay }
    }

    /// Wraps `inner` with a delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(inner: C, ms: u64) -> Self {
        Self::new(inner, Duration::from_millis(ms))
    }
}

#[async_trait]
impl<C: Collaborator> Collaborator for SlowCollaborator<C> {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        tokio::time::sleep(self.delay).await;
        self.inner.invoke(request).await
    }
}
