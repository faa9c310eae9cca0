//! End-to-end behaviour of checkpointed runs.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use storyflow::prelude::*;
use storyflow::testing::{
    assert_artifact, assert_error_at, assert_no_errors, assert_outcome_completed,
    assert_outcome_failed_at, assert_pointer, scenario_registry, scenario_script,
    FailingCollaborator, RecordingCollaborator, ScriptedCollaborator, TestFixture,
};

const KIND: PipelineKind = PipelineKind::EndOfDay;

#[tokio::test]
async fn failed_step_waits_for_manual_retry_then_completes() {
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "gamma"], Arc::new(scenario_script()))
        .with_collaborator(
            "beta",
            Arc::new(FailingCollaborator::times(1, "network", scenario_script())),
        );
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.run_step(KIND, StepIndex(0)).await;
    assert_eq!(
        outcome,
        RunOutcome::Advanced {
            kind: KIND,
            step: StepIndex(0),
            pointer: StepIndex(1),
        }
    );
    assert_artifact(&store, "x", &json!("x-value")).await;
    assert_pointer(&store, KIND, StepIndex(1)).await;

    let outcome = orchestrator.run_step(KIND, StepIndex(1)).await;
    assert_outcome_failed_at(&outcome, StepIndex(1));
    assert_error_at(&store, KIND, StepIndex(1), "network").await;
    assert_pointer(&store, KIND, StepIndex(1)).await;

    let failure = orchestrator.last_failure().unwrap();
    assert_eq!((failure.kind, failure.step), (KIND, StepIndex(1)));

    let outcome = orchestrator.retry_only(KIND, StepIndex(1)).await;
    assert!(outcome.is_success());
    assert_no_errors(&store, KIND).await;
    assert_artifact(&store, "y", &json!("y-value")).await;
    assert_pointer(&store, KIND, StepIndex(2)).await;

    let outcome = orchestrator.run_step(KIND, StepIndex(2)).await;
    assert_outcome_completed(&outcome, KIND);
    assert_pointer(&store, KIND, StepIndex(3)).await;

    let status = orchestrator.run_status(KIND).await.unwrap();
    assert!(status.is_complete());
    assert!(!status.has_error());
}

#[tokio::test]
async fn retry_step_continues_to_terminal() {
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "gamma"], Arc::new(scenario_script()))
        .with_collaborator(
            "beta",
            Arc::new(FailingCollaborator::times(1, "timeout", scenario_script())),
        );
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.start_new_run(KIND).await;
    assert_outcome_failed_at(&outcome, StepIndex(1));

    let outcome = orchestrator.retry_last().await.unwrap();
    assert_outcome_completed(&outcome, KIND);
    assert_pointer(&store, KIND, StepIndex(3)).await;
    assert!(orchestrator.last_failure().is_none());
}

#[tokio::test]
async fn rerunning_a_completed_step_is_idempotent() {
    let script = Arc::new(RecordingCollaborator::new(scenario_script().with_costs(10, 4)));
    let fixture = TestFixture::new().with_shared_collaborator(&["alpha", "beta", "gamma"], script.clone());
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    orchestrator.run_step(KIND, StepIndex(0)).await;
    orchestrator.run_step(KIND, StepIndex(1)).await;
    let before = store.tables().await.unwrap();

    let outcome = orchestrator.run_step(KIND, StepIndex(0)).await;
    assert_eq!(
        outcome,
        RunOutcome::Advanced {
            kind: KIND,
            step: StepIndex(0),
            pointer: StepIndex(2),
        }
    );
    assert_pointer(&store, KIND, StepIndex(2)).await;
    assert_artifact(&store, "x", &json!("x-value")).await;
    assert_eq!(script.step_names(), vec!["a", "b", "a"]);
    assert_eq!(store.tables().await.unwrap(), before);
    let bucket = orchestrator.executor().buckets().load().await.unwrap();
    assert_eq!((bucket.input_cost, bucket.output_cost), (20, 8));
}

#[tokio::test]
async fn first_step_failure_is_reported_on_load() {
    let fixture = TestFixture::new()
        .with_collaborator("alpha", Arc::new(FailingCollaborator::always("network")));
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.start_new_run(KIND).await;
    assert_outcome_failed_at(&outcome, StepIndex(0));
    assert_error_at(&store, KIND, StepIndex(0), "network").await;
    assert_pointer(&store, KIND, StepIndex::NOT_STARTED).await;

    assert_eq!(
        orchestrator.resume_on_load().await.unwrap(),
        Some(RunOutcome::AwaitingRetry {
            kind: KIND,
            step: StepIndex(0),
        })
    );
    assert!(orchestrator.run_status(KIND).await.unwrap().is_in_progress());
}

#[tokio::test]
async fn steps_beyond_the_pointer_are_refused() {
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "beta", "gamma"], Arc::new(scenario_script()));
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.run_step(KIND, StepIndex(2)).await;
    assert_eq!(
        outcome,
        RunOutcome::OutOfOrder {
            kind: KIND,
            requested: StepIndex(2),
            pointer: StepIndex(0),
        }
    );

    let outcome = orchestrator.run_step(KIND, StepIndex(7)).await;
    assert_eq!(outcome, RunOutcome::UnknownStep { kind: KIND, step: StepIndex(7) });
}

#[tokio::test]
async fn resume_on_load_starts_at_the_pointer() {
    let script = Arc::new(RecordingCollaborator::new(scenario_script()));
    let fixture = TestFixture::new().with_shared_collaborator(&["alpha", "beta", "gamma"], script.clone());
    let store = fixture.store.clone();
    store.put("x", Some(json!("x-value"))).await.unwrap();
    store.put("y", Some(json!("y-value"))).await.unwrap();
    store.put_step(KIND, StepIndex(2)).await.unwrap();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.resume_on_load().await.unwrap();

    assert_eq!(outcome, Some(RunOutcome::Completed { kind: KIND }));
    assert_eq!(script.step_names(), vec!["c"]);
    assert_eq!(script.calls()[0].inputs.get("y"), Some(&json!("y-value")));
}

#[tokio::test]
async fn errors_are_isolated_per_kind() {
    let registry = PipelineRegistry::builder()
        .flow(PipelineKind::NewGame, [StepSpec::new("n", "narrator").produces(["n"])])
        .flow(
            KIND,
            [
                StepSpec::new("a", "alpha").produces(["x"]),
                StepSpec::new("b", "beta").consumes("x").produces(["y"]),
            ],
        )
        .build()
        .unwrap();
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "narrator"], Arc::new(scenario_script()))
        .with_collaborator("beta", Arc::new(FailingCollaborator::always("quota")));
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(registry);

    let outcome = orchestrator.start_new_run(KIND).await;
    assert_outcome_failed_at(&outcome, StepIndex(1));

    let outcome = orchestrator.start_new_run(PipelineKind::NewGame).await;
    assert_outcome_completed(&outcome, PipelineKind::NewGame);

    assert_no_errors(&store, PipelineKind::NewGame).await;
    assert_error_at(&store, KIND, StepIndex(1), "quota").await;
    assert_pointer(&store, KIND, StepIndex(1)).await;
}

#[tokio::test]
async fn malformed_payload_is_a_collaborator_failure() {
    let fixture = TestFixture::new()
        .with_collaborator("alpha", Arc::new(ScriptedCollaborator::new().with_payload("a", json!({"z": 1}))));
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.run_step(KIND, StepIndex(0)).await;

    assert_outcome_failed_at(&outcome, StepIndex(0));
    assert_error_at(&store, KIND, StepIndex(0), "missing 'x'").await;
    assert_eq!(store.get("z").await.unwrap(), None);
    assert_pointer(&store, KIND, StepIndex(0)).await;
}

#[tokio::test]
async fn hard_reset_clears_every_table() {
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "beta", "gamma"], Arc::new(scenario_script()));
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());
    orchestrator.start_new_run(KIND).await;

    orchestrator.new_game().await.unwrap();

    let tables = store.tables().await.unwrap();
    assert!(tables.artifacts.is_empty());
    assert!(tables.steps.is_empty());
    assert!(tables.errors.is_empty());
}

#[tokio::test]
async fn events_trace_the_run() {
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "beta", "gamma"], Arc::new(scenario_script()));
    let events = fixture.events.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    orchestrator.start_new_run(KIND).await;

    assert_eq!(events.count(storyflow::events::STEP_STARTED), 3);
    assert_eq!(events.count(storyflow::events::STEP_COMPLETED), 3);
    assert_eq!(events.count(storyflow::events::RUN_COMPLETED), 1);
    assert_eq!(events.count(storyflow::events::STEP_FAILED), 0);
}
