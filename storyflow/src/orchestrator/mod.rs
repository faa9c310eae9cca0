//! UI-facing orchestrator.
//!
//! Wires the registry, store, bucket, session guard, leadership monitor,
//! countdown and executor together and exposes the operations the game UI
//! calls. Every state-mutating operation first checks tab leadership.

mod bundle;

pub use bundle::{checksum, ExportBundle, FORMAT_VERSION};

use crate::collaborators::CollaboratorRegistry;
use crate::config::{AutoResumePolicy, OrchestratorConfig};
use crate::core::{PipelineKind, RunStatus, StepIndex};
use crate::errors::{LeadershipConflict, StoryflowError};
use crate::events::{get_event_sink, EventSink};
use crate::executor::{FailedStep, GameSnapshot, RetryScope, RunOutcome, StepExecutor};
use crate::leadership::{BusHub, LeadershipMonitor, LeadershipState, TabBus};
use crate::registry::PipelineRegistry;
use crate::retry::{Countdown, CountdownController, RetryController};
use crate::session::{Generation, SessionGuard};
use crate::store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Builder for an [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: Option<PipelineRegistry>,
    collaborators: CollaboratorRegistry,
    store: Option<Arc<dyn CheckpointStore>>,
    events: Option<Arc<dyn EventSink>>,
    snapshot: Value,
    tab: Option<(TabBus, String)>,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Uses a custom registry instead of the standard flows.
    #[must_use]
    pub fn registry(mut self, registry: PipelineRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the collaborators steps resolve by name.
    #[must_use]
    pub fn collaborators(mut self, collaborators: CollaboratorRegistry) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Uses an existing checkpoint store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the initial game snapshot.
    #[must_use]
    pub fn snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Joins the leadership negotiation of `bus` as `tab_id`.
    #[must_use]
    pub fn tab(mut self, bus: TabBus, tab_id: impl Into<String>) -> Self {
        self.tab = Some((bus, tab_id.into()));
        self
    }

    /// Joins the bus `hub` keeps for the configured save id as `tab_id`.
    #[must_use]
    pub fn hub(self, hub: &BusHub, tab_id: impl Into<String>) -> Self {
        let bus = hub.bus(&self.config.save_id);
        self.tab(bus, tab_id)
    }

    /// Builds the orchestrator.
    ///
    /// Joining a leadership bus spawns a listener, so this must run inside a
    /// tokio runtime when [`OrchestratorBuilder::tab`] or
    /// [`OrchestratorBuilder::hub`] was used.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is invalid or the store cannot open.
    pub fn build(self) -> Result<Orchestrator, StoryflowError> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => PipelineRegistry::standard()?,
        };
        let store: Arc<dyn CheckpointStore> = match (self.store, &self.config.store_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileCheckpointStore::open(path.clone())?),
            (None, None) => Arc::new(MemoryCheckpointStore::new()),
        };
        let events = self.events.unwrap_or_else(get_event_sink);
        let countdown = Arc::new(CountdownController::new(self.config.backoff.clone()));
        let leadership = self
            .tab
            .map(|(bus, tab_id)| LeadershipMonitor::join(&bus, tab_id, Arc::clone(&events)));

        let mut executor = StepExecutor::new(
            Arc::new(registry),
            Arc::new(self.collaborators),
            store,
            SessionGuard::new(),
        )
        .with_events(Arc::clone(&events))
        .with_countdown(Arc::clone(&countdown))
        .with_snapshot(GameSnapshot::new(self.snapshot))
        .with_model(self.config.selected_model.clone());
        if let Some(timeout) = self.config.step_timeout() {
            executor = executor.with_step_timeout(timeout);
        }
        if let Some(monitor) = &leadership {
            executor = executor.with_leadership(monitor.subscribe());
        }
        let executor = Arc::new(executor);

        info!(save = %self.config.save_id, model = %self.config.selected_model, "Orchestrator ready");
        Ok(Orchestrator {
            retry: RetryController::new(Arc::clone(&executor)),
            config: self.config,
            executor,
            countdown,
            leadership,
            events,
        })
    }
}

/// The operations the game UI calls.
pub struct Orchestrator {
    config: OrchestratorConfig,
    executor: Arc<StepExecutor>,
    retry: RetryController,
    countdown: Arc<CountdownController>,
    leadership: Option<LeadershipMonitor>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .field("countdown", &self.countdown)
            .field("leadership", &self.leadership)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Starts building an orchestrator.
    #[must_use]
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            registry: None,
            collaborators: CollaboratorRegistry::new(),
            store: None,
            events: None,
            snapshot: Value::Null,
            tab: None,
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    /// The event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// The live session generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.executor.session().current()
    }

    /// The persisted bookkeeping of a kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn run_status(&self, kind: PipelineKind) -> Result<RunStatus, StoryflowError> {
        let store = self.executor.store();
        let pointer = store.get_step(kind).await?;
        let errors = store.get_errors(kind).await?;
        Ok(RunStatus::from_parts(
            kind,
            pointer,
            self.executor.registry().terminal(kind),
            &errors,
        ))
    }

    /// Starts a fresh run of `kind`.
    pub async fn start_new_run(&self, kind: PipelineKind) -> RunOutcome {
        if let Err(conflict) = self.ensure_leader() {
            return conflict.into();
        }
        self.executor.start_fresh(kind, self.generation()).await
    }

    /// Runs exactly one step at or before the pointer.
    pub async fn run_step(&self, kind: PipelineKind, index: StepIndex) -> RunOutcome {
        if let Err(conflict) = self.ensure_leader() {
            return conflict.into();
        }
        self.executor.run_step(kind, index, self.generation()).await
    }

    /// Resumes the in-progress kind after a load, if any.
    ///
    /// The first kind in progress, in declaration order, is resumed
    /// according to the automatic resume policy. A kind is in progress when
    /// `0 < pointer < terminal` or when it holds a pending error, so a failed
    /// first step is reported as [`RunOutcome::AwaitingRetry`]. Returns
    /// `None` when no kind is in progress.
    pub async fn resume_on_load(&self) -> Result<Option<RunOutcome>, StoryflowError> {
        if let Err(conflict) = self.ensure_leader() {
            return Ok(Some(conflict.into()));
        }
        let Some(status) = self.in_progress().await? else {
            debug!("Nothing in progress on load");
            return Ok(None);
        };
        Ok(Some(self.auto_resume(&status, self.generation()).await))
    }

    async fn auto_resume(&self, status: &RunStatus, generation: Generation) -> RunOutcome {
        match (&status.error, self.config.auto_resume) {
            (Some(error), AutoResumePolicy::Legacy) if status.kind != PipelineKind::NewGame => {
                info!(kind = %status.kind, step = %error.step, "Retrying failed step on load");
                self.executor
                    .retry(status.kind, error.step, generation, RetryScope::ToTerminal)
                    .await
            }
            _ => self.executor.resume(status.kind, generation).await,
        }
    }

    /// The bookkeeping of every kind, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn run_statuses(&self) -> Result<Vec<RunStatus>, StoryflowError> {
        try_join_all(PipelineKind::ALL.map(|kind| self.run_status(kind))).await
    }

    async fn in_progress(&self) -> Result<Option<RunStatus>, StoryflowError> {
        let statuses = self.run_statuses().await?;
        Ok(statuses.into_iter().find(RunStatus::is_in_progress))
    }

    /// Clears the error of `index` and runs from it to the terminal.
    pub async fn retry_step(&self, kind: PipelineKind, index: StepIndex) -> RunOutcome {
        if let Err(conflict) = self.ensure_leader() {
            return conflict.into();
        }
        self.retry.retry_step(kind, index).await
    }

    /// Clears the error of `index` and runs that step only.
    pub async fn retry_only(&self, kind: PipelineKind, index: StepIndex) -> RunOutcome {
        if let Err(conflict) = self.ensure_leader() {
            return conflict.into();
        }
        self.retry.retry_only(kind, index).await
    }

    /// Retries the last failed step, if any.
    pub async fn retry_last(&self) -> Option<RunOutcome> {
        if let Err(conflict) = self.ensure_leader() {
            return Some(conflict.into());
        }
        self.retry.retry_last().await
    }

    /// The last failed step.
    #[must_use]
    pub fn last_failure(&self) -> Option<FailedStep> {
        self.retry.last_failure()
    }

    /// Wipes every checkpoint and the game snapshot for a new game.
    ///
    /// In-flight runs are superseded; their late results are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if this tab is blocked or the store fails.
    pub async fn new_game(&self) -> Result<Generation, StoryflowError> {
        self.ensure_leader()?;
        let generation = self.executor.session().next_generation().await;
        self.executor.store().clear_all().await?;
        self.executor.snapshot().replace(Value::Null);
        info!(generation, "New game, checkpoints cleared");
        Ok(generation)
    }

    /// Clears every step pointer and error, keeping artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if this tab is blocked or the store fails.
    pub async fn reset_progress(&self) -> Result<Generation, StoryflowError> {
        self.ensure_leader()?;
        let generation = self.executor.session().next_generation().await;
        self.executor.store().clear_steps_and_errors_only().await?;
        info!(generation, "Run bookkeeping reset");
        Ok(generation)
    }

    /// Exports the checkpoint tables and game snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn export_save(&self) -> Result<ExportBundle, StoryflowError> {
        let tables = self.executor.store().tables().await?;
        Ok(ExportBundle::new(tables, self.executor.snapshot().get()))
    }

    /// Imports a save, superseding whatever is in flight.
    ///
    /// A bundle that does not verify is rejected before anything changes,
    /// so an in-flight run keeps its result.
    ///
    /// After the tables and snapshot are replaced, the in-progress kind has
    /// its snapshot-sourced inputs re-seeded from the imported snapshot and,
    /// unless an error is pending, is resumed once. Returns the outcome of
    /// that resume.
    ///
    /// # Errors
    ///
    /// Returns an error if this tab is blocked, the bundle does not verify,
    /// or the store fails.
    pub async fn import_save(&self, bundle: ExportBundle) -> Result<Option<RunOutcome>, StoryflowError> {
        self.ensure_leader()?;
        bundle.verify()?;
        let generation = self.executor.session().next_generation().await;

        self.executor.store().restore(bundle.tables).await?;
        self.executor.snapshot().replace(bundle.snapshot);
        self.executor.buckets().invalidate_context_handle().await?;
        info!(generation, exported_at = %bundle.exported_at, "Save imported");

        let Some(status) = self.in_progress().await? else {
            return Ok(None);
        };
        self.reseed(status.kind, status.current_step, generation).await?;

        if let Some(error) = &status.error {
            warn!(kind = %status.kind, step = %error.step, "Imported save has a pending error");
            return Ok(Some(RunOutcome::AwaitingRetry {
                kind: status.kind,
                step: error.step,
            }));
        }
        Ok(Some(self.executor.resume(status.kind, generation).await))
    }

    /// Imports a base64 save string.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::import_save`].
    pub async fn import_save_string(&self, encoded: &str) -> Result<Option<RunOutcome>, StoryflowError> {
        let bundle = ExportBundle::from_save_string(encoded)?;
        self.import_save(bundle).await
    }

    async fn reseed(&self, kind: PipelineKind, from: StepIndex, generation: Generation) -> Result<(), StoryflowError> {
        self.executor
            .commit(generation, self.executor.reseed_inputs(kind, from))
            .await??;
        Ok(())
    }

    /// Replaces the game snapshot if this tab holds the save.
    ///
    /// # Errors
    ///
    /// Returns [`LeadershipConflict`] when another tab holds the save.
    pub fn autosave(&self, snapshot: Value) -> Result<(), StoryflowError> {
        self.ensure_leader()?;
        self.executor.snapshot().replace(snapshot);
        debug!("Snapshot autosaved");
        Ok(())
    }

    /// Changes the selected model.
    pub fn select_model(&self, model: impl Into<String>) {
        self.executor.set_model(model);
    }

    /// Subscribes to the shared rate-limit countdown.
    #[must_use]
    pub fn countdown(&self) -> watch::Receiver<Option<Countdown>> {
        self.countdown.subscribe()
    }

    /// This tab's leadership state. Without a bus the tab always leads.
    #[must_use]
    pub fn leadership_state(&self) -> LeadershipState {
        self.leadership
            .as_ref()
            .map_or(LeadershipState::Leader, LeadershipMonitor::state)
    }

    /// The leadership monitor, when this tab joined a bus.
    #[must_use]
    pub fn leadership(&self) -> Option<&LeadershipMonitor> {
        self.leadership.as_ref()
    }

    fn ensure_leader(&self) -> Result<(), LeadershipConflict> {
        self.executor.check_leader()
    }
}
