//! Step executor.
//!
//! Drives one step, or a chain of steps, of a pipeline kind: hydrate the
//! consumed artifacts, invoke the step's collaborator, then persist the
//! produced artifacts, bucket fields and step pointer. Every write goes
//! through the session guard and is refused once the tab loses leadership.
//! Only one run may be in flight at a time.

mod hydration;
mod lock;
mod outcome;
mod snapshot;

pub use lock::{RunLock, RunPermit};
pub use outcome::{FailedStep, RunOutcome};
pub use snapshot::GameSnapshot;

use crate::bucket::BucketStore;
use crate::collaborators::{Collaborator, CollaboratorRegistry, CollaboratorRequest, CollaboratorResponse, StepSignals};
use crate::core::{PipelineKind, StepIndex};
use crate::errors::{CollaboratorError, HydrationError, LeadershipConflict, StaleSessionDrop, StoreError, WriteRefused};
use crate::events::{self, get_event_sink, EventSink};
use crate::leadership::LeadershipState;
use crate::registry::{PipelineRegistry, StepSpec};
use crate::retry::CountdownController;
use crate::session::{Generation, SessionGuard};
use crate::store::CheckpointStore;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Which steps a retry re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScope {
    /// Only the retried step.
    Single,
    /// The retried step, then every following step up to the terminal.
    ToTerminal,
}

/// Why a step stopped before advancing.
enum StepAbort {
    /// Recorded against the step; waits for a manual retry.
    Failure(String),
    /// The generation was superseded; nothing was written.
    Stale(StaleSessionDrop),
    /// Another tab took the save; nothing was written.
    Blocked(LeadershipConflict),
    /// The store failed.
    Fatal(StoreError),
}

impl From<StoreError> for StepAbort {
    fn from(err: StoreError) -> Self {
        Self::Fatal(err)
    }
}

impl From<WriteRefused> for StepAbort {
    fn from(refused: WriteRefused) -> Self {
        match refused {
            WriteRefused::Stale(drop) => Self::Stale(drop),
            WriteRefused::Blocked(conflict) => Self::Blocked(conflict),
        }
    }
}

impl From<CollaboratorError> for StepAbort {
    fn from(err: CollaboratorError) -> Self {
        Self::Failure(err.to_string())
    }
}

impl From<HydrationError> for StepAbort {
    fn from(err: HydrationError) -> Self {
        Self::Failure(err.to_string())
    }
}

/// Executes registry steps against a checkpoint store.
pub struct StepExecutor {
    registry: Arc<PipelineRegistry>,
    collaborators: Arc<CollaboratorRegistry>,
    store: Arc<dyn CheckpointStore>,
    buckets: BucketStore,
    session: Arc<SessionGuard>,
    snapshot: GameSnapshot,
    run_lock: RunLock,
    events: Arc<dyn EventSink>,
    countdown: Option<Arc<CountdownController>>,
    leadership: Option<watch::Receiver<LeadershipState>>,
    model: RwLock<String>,
    step_timeout: Option<Duration>,
    last_failure: Mutex<Option<FailedStep>>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("model", &*self.model.read())
            .field("step_timeout", &self.step_timeout)
            .field("in_flight", &self.run_lock.in_flight())
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        registry: Arc<PipelineRegistry>,
        collaborators: Arc<CollaboratorRegistry>,
        store: Arc<dyn CheckpointStore>,
        session: Arc<SessionGuard>,
    ) -> Self {
        Self {
            registry,
            collaborators,
            buckets: BucketStore::new(Arc::clone(&store)),
            store,
            session,
            snapshot: GameSnapshot::default(),
            run_lock: RunLock::new(),
            events: get_event_sink(),
            countdown: None,
            leadership: None,
            model: RwLock::new(String::new()),
            step_timeout: None,
            last_failure: Mutex::new(None),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the shared rate-limit countdown.
    #[must_use]
    pub fn with_countdown(mut self, countdown: Arc<CountdownController>) -> Self {
        self.countdown = Some(countdown);
        self
    }

    /// Refuses every run and write once `state` reports another holder.
    #[must_use]
    pub fn with_leadership(mut self, state: watch::Receiver<LeadershipState>) -> Self {
        self.leadership = Some(state);
        self
    }

    /// Sets the game snapshot fallbacks read from.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: GameSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Sets the selected model.
    #[must_use]
    pub fn with_model(self, model: impl Into<String>) -> Self {
        *self.model.write() = model.into();
        self
    }

    /// Sets the advisory step timeout.
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Returns the bucket store.
    #[must_use]
    pub fn buckets(&self) -> &BucketStore {
        &self.buckets
    }

    /// Returns the session guard.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionGuard> {
        &self.session
    }

    /// Returns the game snapshot handle.
    #[must_use]
    pub fn snapshot(&self) -> &GameSnapshot {
        &self.snapshot
    }

    /// Returns the selected model.
    #[must_use]
    pub fn model(&self) -> String {
        self.model.read().clone()
    }

    /// Changes the selected model for subsequent steps.
    pub fn set_model(&self, model: impl Into<String>) {
        *self.model.write() = model.into();
    }

    /// Returns true while a live run holds the permit.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_lock
            .in_flight()
            .is_some_and(|(_, generation)| self.session.is_current(generation))
    }

    /// Returns the last recorded step failure.
    #[must_use]
    pub fn last_failure(&self) -> Option<FailedStep> {
        self.last_failure.lock().clone()
    }

    /// Fails with the holder once another tab took the save.
    ///
    /// # Errors
    ///
    /// Returns [`LeadershipConflict`] when this tab is blocked.
    pub fn check_leader(&self) -> Result<(), LeadershipConflict> {
        match self.leadership.as_ref().map(|state| state.borrow().clone()) {
            Some(LeadershipState::Blocked { holder }) => Err(LeadershipConflict::new(holder)),
            _ => Ok(()),
        }
    }

    /// Runs `writes` only while `generation` is live and this tab leads.
    ///
    /// Both are checked under the session barrier, so neither can change
    /// between the check and the writes starting.
    ///
    /// # Errors
    ///
    /// Returns [`WriteRefused`] when the write must not apply.
    pub async fn commit<F, T>(&self, generation: Generation, writes: F) -> Result<T, WriteRefused>
    where
        F: Future<Output = T>,
    {
        let guarded = async {
            self.check_leader()?;
            Ok::<_, LeadershipConflict>(writes.await)
        };
        Ok(self.session.commit(generation, guarded).await??)
    }

    /// Overwrites the snapshot-sourced inputs of `kind` from `from` onwards
    /// with their current snapshot values. Inputs the snapshot lacks keep
    /// their stored value. Returns how many keys were written.
    ///
    /// Callers run this inside [`StepExecutor::commit`].
    pub async fn reseed_inputs(&self, kind: PipelineKind, from: StepIndex) -> Result<usize, StoreError> {
        let mut written = 0;
        for (key, pointer) in self.registry.snapshot_seeded_keys(kind, from) {
            if let Some(value) = self.snapshot.pointer(&pointer).filter(|value| !value.is_null()) {
                self.store.put(&key, Some(value)).await?;
                written += 1;
            }
        }
        debug!(kind = %kind, from = %from, written, "Re-seeded inputs from snapshot");
        Ok(written)
    }

    /// Runs exactly one step.
    ///
    /// The step must not lie beyond the persisted pointer. Re-running an
    /// earlier step overwrites its artifacts and never moves the pointer back.
    pub async fn run_step(&self, kind: PipelineKind, index: StepIndex, generation: Generation) -> RunOutcome {
        let Some(_permit) = self.run_lock.try_acquire(kind, generation, &self.session) else {
            return RunOutcome::AlreadyRunning;
        };
        match self.runnable(kind, index, generation).await {
            Ok(spec) => self.execute_step(kind, spec, generation).await,
            Err(outcome) => outcome,
        }
    }

    /// Runs steps from `start` to the terminal, stopping at the first failure.
    pub async fn run_from(&self, kind: PipelineKind, start: StepIndex, generation: Generation) -> RunOutcome {
        let Some(_permit) = self.run_lock.try_acquire(kind, generation, &self.session) else {
            return RunOutcome::AlreadyRunning;
        };
        self.drive(kind, start, generation).await
    }

    /// Starts a fresh run of a kind from the first step.
    ///
    /// The kind's pointer and errors are reset, its snapshot-sourced inputs
    /// are refreshed from the live snapshot and the bucket begins a new run.
    /// Other artifacts stay in place and are overwritten as the steps
    /// produce them.
    pub async fn start_fresh(&self, kind: PipelineKind, generation: Generation) -> RunOutcome {
        let Some(_permit) = self.run_lock.try_acquire(kind, generation, &self.session) else {
            return RunOutcome::AlreadyRunning;
        };

        let reset = self
            .commit(generation, async {
                self.store.put_errors(kind, Default::default()).await?;
                self.store.put_step(kind, StepIndex::NOT_STARTED).await?;
                self.reseed_inputs(kind, StepIndex::NOT_STARTED).await?;
                self.buckets.begin_run(kind).await
            })
            .await;
        match reset {
            Ok(Ok(bucket)) => {
                info!(kind = %kind, run_id = ?bucket.run_id, "Starting fresh run");
                self.drive(kind, StepIndex::NOT_STARTED, generation).await
            }
            Ok(Err(err)) => self.fatal(kind, &err),
            Err(refused) => refused.into(),
        }
    }

    /// Resumes a kind at its persisted pointer.
    ///
    /// Steps before the pointer never run. A persisted error blocks resume
    /// until it is retried manually.
    pub async fn resume(&self, kind: PipelineKind, generation: Generation) -> RunOutcome {
        let Some(_permit) = self.run_lock.try_acquire(kind, generation, &self.session) else {
            return RunOutcome::AlreadyRunning;
        };

        let state = async {
            Ok::<_, StoreError>((self.store.get_step(kind).await?, self.store.get_errors(kind).await?))
        };
        let (pointer, errors) = match state.await {
            Ok(state) => state,
            Err(err) => return self.fatal(kind, &err),
        };

        if let Some(step) = errors.keys().next() {
            debug!(kind = %kind, step = %step, "Resume blocked by pending error");
            return RunOutcome::AwaitingRetry { kind, step: *step };
        }
        if pointer >= self.registry.terminal(kind) {
            return RunOutcome::NothingToResume { kind };
        }

        info!(kind = %kind, pointer = %pointer, "Resuming run");
        self.drive(kind, pointer, generation).await
    }

    /// Clears the error recorded for `index` and re-runs it.
    pub async fn retry(
        &self,
        kind: PipelineKind,
        index: StepIndex,
        generation: Generation,
        scope: RetryScope,
    ) -> RunOutcome {
        let Some(_permit) = self.run_lock.try_acquire(kind, generation, &self.session) else {
            return RunOutcome::AlreadyRunning;
        };
        let spec = match self.runnable(kind, index, generation).await {
            Ok(spec) => spec,
            Err(outcome) => return outcome,
        };

        let cleared = self
            .commit(generation, async {
                let mut errors = self.store.get_errors(kind).await?;
                if errors.remove(&index).is_some() {
                    self.store.put_errors(kind, errors).await?;
                }
                Ok::<_, StoreError>(())
            })
            .await;
        match cleared {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return self.fatal(kind, &err),
            Err(refused) => return refused.into(),
        }

        info!(kind = %kind, step = %index, scope = ?scope, "Retrying step");
        match scope {
            RetryScope::Single => self.execute_step(kind, spec, generation).await,
            RetryScope::ToTerminal => self.drive(kind, index, generation).await,
        }
    }

    async fn drive(&self, kind: PipelineKind, start: StepIndex, generation: Generation) -> RunOutcome {
        if start >= self.registry.terminal(kind) {
            return RunOutcome::NothingToResume { kind };
        }

        let mut index = start;
        loop {
            let spec = match self.runnable(kind, index, generation).await {
                Ok(spec) => spec,
                Err(outcome) => return outcome,
            };
            match self.execute_step(kind, spec, generation).await {
                RunOutcome::Advanced { .. } => index = index.next(),
                outcome => return outcome,
            }
        }
    }

    async fn runnable(
        &self,
        kind: PipelineKind,
        index: StepIndex,
        generation: Generation,
    ) -> Result<&StepSpec, RunOutcome> {
        if let Err(conflict) = self.check_leader() {
            warn!(kind = %kind, holder = %conflict.holder, "Save taken by another tab, stopping run");
            return Err(conflict.into());
        }

        let live = self.session.current();
        if live != generation {
            return Err(RunOutcome::Stale {
                issued: generation,
                live,
            });
        }

        let spec = self
            .registry
            .step(kind, index)
            .ok_or(RunOutcome::UnknownStep { kind, step: index })?;

        let pointer = self
            .store
            .get_step(kind)
            .await
            .map_err(|err| self.fatal(kind, &err))?;
        if index > pointer {
            warn!(kind = %kind, requested = %index, pointer = %pointer, "Refusing to skip ahead");
            return Err(RunOutcome::OutOfOrder {
                kind,
                requested: index,
                pointer,
            });
        }
        Ok(spec)
    }

    async fn execute_step(&self, kind: PipelineKind, spec: &StepSpec, generation: Generation) -> RunOutcome {
        let span = info_span!(
            "step",
            kind = %kind,
            step = %spec.index,
            name = %spec.name,
            collaborator = %spec.collaborator,
            generation
        );

        async move {
            self.events.try_emit(
                events::STEP_STARTED,
                Some(events::step_data(kind, spec.index, &spec.name)),
            );
            let started = Instant::now();

            match self.attempt(kind, spec, generation).await {
                Ok(pointer) => self.advanced(kind, spec, pointer, started.elapsed()),
                Err(StepAbort::Failure(message)) => self.record_failure(kind, spec, generation, message).await,
                Err(StepAbort::Stale(drop)) => self.stale(kind, spec, drop),
                Err(StepAbort::Blocked(conflict)) => blocked(conflict),
                Err(StepAbort::Fatal(err)) => self.fatal(kind, &err),
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, kind: PipelineKind, spec: &StepSpec, generation: Generation) -> Result<StepIndex, StepAbort> {
        let inputs = self.hydrate(kind, spec, generation).await?;
        let model = self.model();
        let bucket = self
            .commit(generation, self.buckets.load_for_model(&model))
            .await??;

        let collaborator = self.collaborators.resolve(&spec.collaborator)?;
        let request = CollaboratorRequest {
            kind,
            step: spec.index,
            step_name: spec.name.clone(),
            inputs,
            bucket,
            model,
            signals: StepSignals::new(kind, spec.name.clone(), Arc::clone(&self.events), self.countdown.clone()),
        };

        let response = self.invoke_supervised(kind, spec, collaborator.as_ref(), request).await?;
        let artifacts = response.artifacts(&spec.collaborator, &spec.produces)?;
        let update = response.bucket_update();

        let pointer = self
            .commit(generation, async {
                for (key, value) in artifacts {
                    self.store.put(&key, Some(value)).await?;
                }
                self.buckets.save(spec.index, update).await?;

                let mut errors = self.store.get_errors(kind).await?;
                if errors.remove(&spec.index).is_some() {
                    self.store.put_errors(kind, errors).await?;
                }

                let pointer = self.store.get_step(kind).await?.max(spec.index.next());
                self.store.put_step(kind, pointer).await?;
                Ok::<_, StoreError>(pointer)
            })
            .await??;
        Ok(pointer)
    }

    async fn invoke_supervised(
        &self,
        kind: PipelineKind,
        spec: &StepSpec,
        collaborator: &dyn Collaborator,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        let call = collaborator.invoke(request);
        tokio::pin!(call);

        let Some(limit) = self.step_timeout else {
            return call.await;
        };
        tokio::select! {
            result = &mut call => return result,
            () = tokio::time::sleep(limit) => {}
        }

        warn!(timeout_ms = limit.as_millis() as u64, "Step exceeded its timeout, still awaiting");
        let mut data = events::step_data(kind, spec.index, &spec.name);
        data["timeout_ms"] = json!(limit.as_millis() as u64);
        self.events.try_emit(events::STEP_TIMEOUT_ELAPSED, Some(data));
        call.await
    }

    fn advanced(&self, kind: PipelineKind, spec: &StepSpec, pointer: StepIndex, elapsed: Duration) -> RunOutcome {
        {
            let mut last = self.last_failure.lock();
            if last.as_ref().is_some_and(|failed| failed.kind == kind && failed.step == spec.index) {
                *last = None;
            }
        }

        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        info!(pointer = %pointer, duration_ms, "Step completed");
        let mut data = events::step_data(kind, spec.index, &spec.name);
        data["pointer"] = json!(pointer);
        data["duration_ms"] = json!(duration_ms);
        self.events.try_emit(events::STEP_COMPLETED, Some(data));

        if pointer >= self.registry.terminal(kind) {
            info!(kind = %kind, "Run completed");
            self.events
                .try_emit(events::RUN_COMPLETED, Some(json!({ "kind": kind })));
            RunOutcome::Completed { kind }
        } else {
            RunOutcome::Advanced {
                kind,
                step: spec.index,
                pointer,
            }
        }
    }

    async fn record_failure(
        &self,
        kind: PipelineKind,
        spec: &StepSpec,
        generation: Generation,
        message: String,
    ) -> RunOutcome {
        warn!(error = %message, "Step failed");

        // Only the step at the pointer may hold an error. A failed re-run of
        // an earlier step leaves the bookkeeping untouched.
        let recorded = self
            .commit(generation, async {
                if spec.index < self.store.get_step(kind).await? {
                    return Ok::<_, StoreError>(false);
                }
                let mut errors = self.store.get_errors(kind).await?;
                errors.insert(spec.index, message.clone());
                self.store.put_errors(kind, errors).await?;
                Ok(true)
            })
            .await;

        match recorded {
            Ok(Ok(recorded)) => {
                if recorded {
                    *self.last_failure.lock() = Some(FailedStep {
                        kind,
                        step: spec.index,
                        step_name: spec.name.clone(),
                        message: message.clone(),
                        failed_at: Utc::now(),
                    });
                } else {
                    debug!("Re-run of a completed step failed, nothing recorded");
                }
                let mut data = events::step_data(kind, spec.index, &spec.name);
                data["error"] = json!(message);
                self.events.try_emit(events::STEP_FAILED, Some(data));
                RunOutcome::Failed {
                    kind,
                    step: spec.index,
                    message,
                }
            }
            Ok(Err(err)) => self.fatal(kind, &err),
            Err(WriteRefused::Stale(drop)) => self.stale(kind, spec, drop),
            Err(WriteRefused::Blocked(conflict)) => blocked(conflict),
        }
    }

    fn stale(&self, kind: PipelineKind, spec: &StepSpec, drop: StaleSessionDrop) -> RunOutcome {
        debug!(issued = drop.issued, live = drop.live, "Step result dropped, session superseded");
        let mut data = events::step_data(kind, spec.index, &spec.name);
        data["issued"] = json!(drop.issued);
        data["live"] = json!(drop.live);
        self.events.try_emit(events::STEP_STALE_DROPPED, Some(data));
        drop.into()
    }

    fn fatal(&self, kind: PipelineKind, err: &StoreError) -> RunOutcome {
        error!(kind = %kind, error = %err, "Checkpoint store failed");
        RunOutcome::Fatal {
            message: err.to_string(),
        }
    }
}

fn blocked(conflict: LeadershipConflict) -> RunOutcome {
    warn!(holder = %conflict.holder, "Step result dropped, save taken by another tab");
    conflict.into()
}
