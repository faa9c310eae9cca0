//! Collaborator contract, signals and durable checkpoints.

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::always;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use storyflow::prelude::*;
use storyflow::retry::JitterStrategy;
use storyflow::testing::{assert_outcome_completed, scenario_registry, scenario_script, TestFixture};

const KIND: PipelineKind = PipelineKind::EndOfDay;

mock! {
    pub Writer {}

    #[async_trait]
    impl Collaborator for Writer {
        async fn invoke(
            &self,
            request: CollaboratorRequest,
        ) -> Result<CollaboratorResponse, CollaboratorError>;
    }
}

#[tokio::test]
async fn collaborator_receives_resolved_inputs() {
    let mut alpha = MockWriter::new();
    alpha
        .expect_invoke()
        .with(always())
        .times(1)
        .returning(|_| Ok(CollaboratorResponse::new(json!({"x": {"mood": "tense"}})).with_costs(10, 4)));

    let mut beta = MockWriter::new();
    beta.expect_invoke()
        .withf(|request| request.step_name == "b" && request.input("x") == Some(&json!({"mood": "tense"})))
        .times(1)
        .returning(|request| {
            let costs = request.bucket.input_cost;
            Ok(CollaboratorResponse::new(json!({"y": costs})).with_costs(1, 1))
        });

    let mut gamma = MockWriter::new();
    gamma
        .expect_invoke()
        .times(1)
        .returning(|_| Ok(CollaboratorResponse::empty()));

    let fixture = TestFixture::new()
        .with_collaborator("alpha", Arc::new(alpha))
        .with_collaborator("beta", Arc::new(beta))
        .with_collaborator("gamma", Arc::new(gamma));
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.start_new_run(KIND).await;

    assert_outcome_completed(&outcome, KIND);
    assert_eq!(store.get("y").await.unwrap(), Some(json!(10)));
    let bucket = orchestrator.executor().buckets().load().await.unwrap();
    assert_eq!((bucket.input_cost, bucket.output_cost), (11, 5));
    assert_eq!(bucket.kind, Some(KIND));
}

#[tokio::test]
async fn missing_collaborator_is_recorded_as_failure() {
    let fixture = TestFixture::new().with_collaborator("alpha", Arc::new(scenario_script()));
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.start_new_run(KIND).await;

    assert!(outcome.is_failure());
    let errors = store.get_errors(KIND).await.unwrap();
    assert!(errors[&StepIndex(1)].contains("beta"));
}

#[tokio::test]
async fn rate_limit_signal_drives_shared_countdown() {
    let waiter = FnCollaborator::new(|request: CollaboratorRequest| async move {
        request.signals.key_rotated("switched to key 2");
        let waited = request.signals.rate_limited(None).await;
        let mut payload = serde_json::Map::new();
        payload.insert("x".to_string(), json!(waited.as_millis() as u64));
        Ok::<_, CollaboratorError>(CollaboratorResponse::new(serde_json::Value::Object(payload)))
    });
    let backoff = BackoffPolicy::default()
        .with_base_delay_ms(30)
        .with_jitter(JitterStrategy::None);
    let fixture = TestFixture::new()
        .with_collaborator("alpha", Arc::new(waiter))
        .with_config(OrchestratorConfig::new().without_step_timeout().with_backoff(backoff));
    let events = fixture.events.clone();
    let store = fixture.store.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());
    let mut countdown = orchestrator.countdown();

    let observed = tokio::spawn(async move {
        countdown.wait_for(Option::is_some).await.map(|c| c.clone()).ok().flatten()
    });
    let outcome = orchestrator.run_step(KIND, StepIndex(0)).await;

    assert!(outcome.is_success());
    let shown = observed.await.unwrap().unwrap();
    assert_eq!(shown.key, "end_of_day:a");
    assert_eq!(shown.total, Duration::from_millis(30));
    assert!(orchestrator.countdown().borrow().is_none());
    assert_eq!(store.get("x").await.unwrap(), Some(json!(30)));
    assert_eq!(events.count("collaborator.key_rotated"), 1);
    assert_eq!(events.count("collaborator.rate_limited"), 1);
}

#[tokio::test]
async fn slow_step_only_raises_an_advisory_timeout() {
    let slow = storyflow::testing::SlowCollaborator::with_delay_ms(scenario_script(), 60);
    let fixture = TestFixture::new()
        .with_collaborator("alpha", Arc::new(slow))
        .with_config(OrchestratorConfig::new().with_step_timeout(0.01));
    let events = fixture.events.clone();
    let orchestrator = fixture.orchestrator(scenario_registry());

    let outcome = orchestrator.run_step(KIND, StepIndex(0)).await;

    assert!(outcome.is_success());
    assert_eq!(events.count(storyflow::events::STEP_TIMEOUT_ELAPSED), 1);
}

#[tokio::test]
async fn file_store_survives_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("save.json");
    let config = OrchestratorConfig::new()
        .without_step_timeout()
        .with_store_path(&path);

    let collaborators = || {
        CollaboratorRegistry::new()
            .with("alpha", Arc::new(scenario_script()))
            .with("beta", Arc::new(storyflow::testing::FailingCollaborator::always("network")))
            .with("gamma", Arc::new(scenario_script()))
    };

    let first = Orchestrator::builder(config.clone())
        .registry(scenario_registry())
        .collaborators(collaborators())
        .build()
        .unwrap();
    let outcome = first.start_new_run(KIND).await;
    assert!(outcome.is_failure());
    drop(first);

    let reloaded = Orchestrator::builder(config)
        .registry(scenario_registry())
        .collaborators(collaborators())
        .build()
        .unwrap();
    let status = reloaded.run_status(KIND).await.unwrap();

    assert_eq!(status.current_step, StepIndex(1));
    assert_eq!(status.error.unwrap().message, "network");
    assert_eq!(
        reloaded.executor().store().get("x").await.unwrap(),
        Some(json!("x-value"))
    );
}
