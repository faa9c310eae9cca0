//! Session generations, save import and context handle reuse.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use storyflow::prelude::*;
use storyflow::testing::{
    assert_artifact, assert_error_at, assert_outcome_completed, assert_pointer, scenario_registry,
    scenario_script, FailingCollaborator, GatedCollaborator, RecordingCollaborator, TestFixture,
};

const KIND: PipelineKind = PipelineKind::EndOfDay;

/// `a` reads the day transcript, which falls back to the game snapshot.
fn transcript_registry() -> PipelineRegistry {
    let transcript = || InputSpec::new("transcript").or(Fallback::snapshot("/dialogue/day"));
    PipelineRegistry::builder()
        .flow(
            KIND,
            [
                StepSpec::new("a", "alpha").consumes_input(transcript()).produces(["x"]),
                StepSpec::new("b", "beta")
                    .consumes("x")
                    .consumes_input(transcript())
                    .produces(["y"]),
                StepSpec::new("c", "gamma").consumes("y"),
            ],
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn late_result_after_hard_reset_is_dropped() {
    let gate = Arc::new(GatedCollaborator::new(scenario_script()));
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "gamma"], Arc::new(scenario_script()))
        .with_collaborator("beta", gate.clone());
    let store = fixture.store.clone();
    let events = fixture.events.clone();
    let orchestrator = Arc::new(fixture.orchestrator(scenario_registry()));
    let issued = orchestrator.generation();

    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.start_new_run(KIND).await }
    });
    gate.entered().await;

    let live = orchestrator.new_game().await.unwrap();
    gate.release();
    let outcome = run.await.unwrap();

    assert_eq!(outcome, RunOutcome::Stale { issued, live });
    assert_eq!(store.get("y").await.unwrap(), None);
    assert_eq!(store.get("x").await.unwrap(), None);
    assert_pointer(&store, KIND, StepIndex::NOT_STARTED).await;
    assert_eq!(events.count(storyflow::events::STEP_STALE_DROPPED), 1);
}

#[tokio::test]
async fn superseded_run_does_not_block_a_new_one() {
    let gate = Arc::new(GatedCollaborator::new(scenario_script()));
    let fixture = TestFixture::new().with_collaborator("alpha", gate.clone());
    let orchestrator = Arc::new(fixture.orchestrator(scenario_registry()));

    let run = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run_step(KIND, StepIndex(0)).await }
    });
    gate.entered().await;
    assert!(orchestrator.executor().is_running());
    assert_eq!(orchestrator.run_step(KIND, StepIndex(0)).await, RunOutcome::AlreadyRunning);

    orchestrator.reset_progress().await.unwrap();
    let second = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run_step(KIND, StepIndex(0)).await }
    });
    gate.entered().await;

    gate.release();
    gate.release();
    let first = run.await.unwrap();
    let second = second.await.unwrap();

    assert!(matches!(first, RunOutcome::Stale { .. }));
    assert!(second.is_success());
}

#[tokio::test]
async fn fresh_run_reads_the_latest_autosave() {
    let script = Arc::new(RecordingCollaborator::new(scenario_script()));
    let fixture = TestFixture::new()
        .with_snapshot(json!({"dialogue": {"day": "day-1 transcript"}}))
        .with_shared_collaborator(&["alpha", "beta", "gamma"], script.clone());
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(transcript_registry());

    assert_outcome_completed(&orchestrator.start_new_run(KIND).await, KIND);
    orchestrator
        .autosave(json!({"dialogue": {"day": "day-2 transcript"}}))
        .unwrap();
    assert_outcome_completed(&orchestrator.start_new_run(KIND).await, KIND);

    let seen: Vec<_> = script
        .calls()
        .iter()
        .filter(|call| call.step_name != "c")
        .map(|call| call.inputs.get("transcript").cloned())
        .collect();
    assert_eq!(
        seen,
        vec![
            Some(json!("day-1 transcript")),
            Some(json!("day-1 transcript")),
            Some(json!("day-2 transcript")),
            Some(json!("day-2 transcript")),
        ]
    );
    assert_artifact(&store, "transcript", &json!("day-2 transcript")).await;
}

#[tokio::test]
async fn import_reseeds_inputs_and_waits_on_pending_error() {
    let source = TestFixture::new()
        .with_snapshot(json!({"dialogue": {"day": "morning"}}))
        .with_shared_collaborator(&["alpha", "gamma"], Arc::new(scenario_script()))
        .with_collaborator("beta", Arc::new(FailingCollaborator::always("network")))
        .orchestrator(transcript_registry());
    source.start_new_run(KIND).await;
    source.autosave(json!({"dialogue": {"day": "evening"}})).unwrap();
    let bundle = source.export_save().await.unwrap();
    assert_eq!(bundle.tables.artifacts.get("transcript"), Some(&json!("morning")));

    let target = TestFixture::new()
        .with_shared_collaborator(&["alpha", "beta", "gamma"], Arc::new(scenario_script()));
    let store = target.store.clone();
    let target = target.orchestrator(transcript_registry());

    let outcome = target.import_save(bundle).await.unwrap();

    assert_eq!(
        outcome,
        Some(RunOutcome::AwaitingRetry {
            kind: KIND,
            step: StepIndex(1),
        })
    );
    assert_artifact(&store, "transcript", &json!("evening")).await;
    assert_error_at(&store, KIND, StepIndex(1), "network").await;
    assert_eq!(target.executor().snapshot().get(), json!({"dialogue": {"day": "evening"}}));

    let outcome = target.retry_step(KIND, StepIndex(1)).await;
    assert_outcome_completed(&outcome, KIND);
}

#[tokio::test]
async fn import_resumes_once_without_pending_error() {
    let source = TestFixture::new()
        .with_snapshot(json!({"dialogue": {"day": "noon"}}))
        .with_shared_collaborator(&["alpha", "beta", "gamma"], Arc::new(scenario_script()))
        .orchestrator(transcript_registry());
    source.run_step(KIND, StepIndex(0)).await;
    let save = source.export_save().await.unwrap().to_save_string().unwrap();

    let script = Arc::new(RecordingCollaborator::new(scenario_script()));
    let target = TestFixture::new().with_shared_collaborator(&["alpha", "beta", "gamma"], script.clone());
    let store = target.store.clone();
    let target = target.orchestrator(transcript_registry());

    let outcome = target.import_save_string(&save).await.unwrap();

    assert_eq!(outcome, Some(RunOutcome::Completed { kind: KIND }));
    assert_eq!(script.step_names(), vec!["b", "c"]);
    assert_eq!(script.calls()[0].inputs.get("transcript"), Some(&json!("noon")));
    assert_pointer(&store, KIND, StepIndex(3)).await;
}

#[tokio::test]
async fn tampered_save_is_rejected_without_touching_the_store() {
    let source = TestFixture::new()
        .with_shared_collaborator(&["alpha", "beta", "gamma"], Arc::new(scenario_script()))
        .orchestrator(scenario_registry());
    source.run_step(KIND, StepIndex(0)).await;
    let mut bundle = source.export_save().await.unwrap();
    bundle.snapshot = json!({"cheat": true});

    let target = TestFixture::new();
    let store = target.store.clone();
    store.put("keep", Some(json!(1))).await.unwrap();
    let target = target.orchestrator(scenario_registry());
    let before = target.generation();

    let err = target.import_save(bundle).await.unwrap_err();

    assert!(matches!(
        err,
        StoryflowError::Import(ImportError::ChecksumMismatch { .. })
    ));
    assert_eq!(target.generation(), before);
    assert_artifact(&store, "keep", &json!(1)).await;
    assert_eq!(store.get("x").await.unwrap(), None);
}

#[tokio::test]
async fn model_change_invalidates_context_handle() {
    let builder = FnCollaborator::new(|request: CollaboratorRequest| async move {
        let mut payload = serde_json::Map::new();
        payload.insert(request.step_name.clone(), json!(request.model));
        if request.step_name == "a" {
            payload.insert("x".to_string(), json!(1));
        } else if request.step_name == "b" {
            payload.insert("y".to_string(), json!(2));
        }
        let handle = ContextHandle::new(format!("ctx-{}", request.step_name), request.model.clone());
        Ok::<_, CollaboratorError>(
            CollaboratorResponse::new(serde_json::Value::Object(payload)).with_context_handle(handle),
        )
    });
    let script = Arc::new(RecordingCollaborator::new(builder));
    let fixture = TestFixture::new()
        .with_shared_collaborator(&["alpha", "beta", "gamma"], script.clone())
        .with_config(OrchestratorConfig::new().without_step_timeout().with_model("model-a"));
    let orchestrator = fixture.orchestrator(scenario_registry());

    orchestrator.run_step(KIND, StepIndex(0)).await;
    orchestrator.run_step(KIND, StepIndex(1)).await;
    orchestrator.select_model("model-b");
    orchestrator.run_step(KIND, StepIndex(2)).await;

    let calls = script.calls();
    assert_eq!(
        calls.iter().map(|call| call.had_context).collect::<Vec<_>>(),
        vec![false, true, false]
    );
    assert_eq!(calls[2].model, "model-b");

    let bucket = orchestrator.executor().buckets().load().await.unwrap();
    let handle = bucket.context_handle.unwrap();
    assert!(handle.is_valid_for("model-b"));
}
