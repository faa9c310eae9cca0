//! Test fixtures for orchestrator testing.

use serde_json::{json, Value};
use std::sync::Arc;

use super::mocks::ScriptedCollaborator;
use crate::collaborators::{Collaborator, CollaboratorRegistry};
use crate::config::OrchestratorConfig;
use crate::core::PipelineKind;
use crate::events::CollectingEventSink;
use crate::executor::{GameSnapshot, StepExecutor};
use crate::leadership::TabBus;
use crate::orchestrator::Orchestrator;
use crate::registry::{PipelineRegistry, StepSpec};
use crate::session::SessionGuard;
use crate::store::MemoryCheckpointStore;

/// An EndOfDay flow `a → b → c`.
///
/// `a` (collaborator `alpha`) produces `x`, `b` (`beta`) consumes `x` and
/// produces `y`, `c` (`gamma`) consumes `y` and produces nothing.
#[must_use]
pub fn scenario_registry() -> PipelineRegistry {
    let built = PipelineRegistry::builder()
        .flow(
            PipelineKind::EndOfDay,
            [
                StepSpec::new("a", "alpha").produces(["x"]),
                StepSpec::new("b", "beta").consumes("x").produces(["y"]),
                StepSpec::new("c", "gamma").consumes("y"),
            ],
        )
        .build();
    match built {
        Ok(registry) => registry,
        Err(err) => panic!("scenario registry is invalid: {err}"),
    }
}

/// A script answering every step of [`scenario_registry`].
#[must_use]
pub fn scenario_script() -> ScriptedCollaborator {
    ScriptedCollaborator::new()
        .with_payload("a", json!({"x": "x-value"}))
        .with_payload("b", json!({"y": "y-value"}))
        .with_payload("c", json!({}))
}

/// Builds executors and orchestrators over a shared in-memory store.
///
/// Clone [`TestFixture::store`] or [`TestFixture::events`] before consuming
/// the fixture to inspect them afterwards.
#[derive(Debug)]
pub struct TestFixture {
    /// The checkpoint store.
    pub store: MemoryCheckpointStore,
    /// Collected events.
    pub events: Arc<CollectingEventSink>,
    /// Registered collaborators.
    pub collaborators: CollaboratorRegistry,
    /// Orchestrator configuration.
    pub config: OrchestratorConfig,
    /// Initial game snapshot.
    pub snapshot: Value,
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixture {
    /// Creates a fixture with no collaborators and no step timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: MemoryCheckpointStore::new(),
            events: Arc::new(CollectingEventSink::new()),
            collaborators: CollaboratorRegistry::new(),
            config: OrchestratorConfig::new().without_step_timeout(),
            snapshot: Value::Null,
        }
    }

    /// Registers a collaborator.
    #[must_use]
    pub fn with_collaborator(self, name: impl Into<String>, collaborator: Arc<dyn Collaborator>) -> Self {
        self.collaborators.register(name, collaborator);
        self
    }

    /// Registers one collaborator under several names.
    #[must_use]
    pub fn with_shared_collaborator(self, names: &[&str], collaborator: Arc<dyn Collaborator>) -> Self {
        for name in names {
            self.collaborators.register(*name, Arc::clone(&collaborator));
        }
        self
    }

    /// Sets the initial game snapshot.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds an executor over `registry`.
    #[must_use]
    pub fn executor(self, registry: PipelineRegistry) -> StepExecutor {
        StepExecutor::new(
            Arc::new(registry),
            Arc::new(self.collaborators),
            Arc::new(self.store),
            SessionGuard::new(),
        )
        .with_events(self.events)
        .with_snapshot(GameSnapshot::new(self.snapshot))
        .with_model(self.config.selected_model)
    }

    /// Builds an orchestrator over `registry`.
    #[must_use]
    pub fn orchestrator(self, registry: PipelineRegistry) -> Orchestrator {
        self.build(registry, None)
    }

    /// Builds an orchestrator over `registry` that joins `bus` as `tab_id`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn tab(self, registry: PipelineRegistry, bus: &TabBus, tab_id: &str) -> Orchestrator {
        self.build(registry, Some((bus.clone(), tab_id.to_string())))
    }

    fn build(self, registry: PipelineRegistry, tab: Option<(TabBus, String)>) -> Orchestrator {
        let mut builder = Orchestrator::builder(self.config)
            .registry(registry)
            .collaborators(self.collaborators)
            .store(Arc::new(self.store))
            .events(self.events)
            .snapshot(self.snapshot);
        if let Some((bus, tab_id)) = tab {
            builder = builder.tab(bus, tab_id);
        }
        match builder.build() {
            Ok(orchestrator) => orchestrator,
            Err(err) => panic!("test orchestrator failed to build: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepIndex;
    use crate::executor::RunOutcome;
    use crate::store::CheckpointStore;

    #[tokio::test]
    async fn test_scenario_fixture_runs_to_completion() {
        let fixture = TestFixture::new().with_shared_collaborator(
            &["alpha", "beta", "gamma"],
            Arc::new(scenario_script()),
        );
        let store = fixture.store.clone();
        let executor = fixture.executor(scenario_registry());

        let outcome = executor.run_from(PipelineKind::EndOfDay, StepIndex(0), 0).await;

        assert_eq!(outcome, RunOutcome::Completed { kind: PipelineKind::EndOfDay });
        assert_eq!(store.get("x").await.unwrap(), Some(json!("x-value")));
        assert_eq!(store.get("y").await.unwrap(), Some(json!("y-value")));
    }

    #[tokio::test]
    async fn test_fixture_orchestrator_leads_without_bus() {
        let orchestrator = TestFixture::new().orchestrator(scenario_registry());
        assert!(orchestrator.leadership_state().is_leader());
    }
}
