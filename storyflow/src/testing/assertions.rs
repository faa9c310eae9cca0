//! Test assertions for run outcomes and checkpoints.

use crate::core::{PipelineKind, StepIndex};
use crate::executor::RunOutcome;
use crate::store::CheckpointStore;

/// Asserts that the outcome indicates success.
pub fn assert_outcome_succeeded(outcome: &RunOutcome) {
    assert!(outcome.is_success(), "Expected success, got: {outcome:?}");
}

/// Asserts that the outcome is a recorded step failure at `step`.
pub fn assert_outcome_failed_at(outcome: &RunOutcome, step: StepIndex) {
    match outcome {
        RunOutcome::Failed { step: failed, .. } => {
            assert_eq!(*failed, step, "Expected failure at step {step}, got step {failed}");
        }
        other => panic!("Expected failure at step {step}, got: {other:?}"),
    }
}

/// Asserts that the outcome completed `kind`.
pub fn assert_outcome_completed(outcome: &RunOutcome, kind: PipelineKind) {
    assert_eq!(
        outcome,
        &RunOutcome::Completed { kind },
        "Expected {kind} to complete, got: {outcome:?}"
    );
}

/// Asserts the persisted step pointer of `kind`.
pub async fn assert_pointer(store: &dyn CheckpointStore, kind: PipelineKind, expected: StepIndex) {
    let actual = store.get_step(kind).await.ok();
    assert_eq!(
        actual,
        Some(expected),
        "Expected {kind} pointer {expected}, got {actual:?}"
    );
}

/// Asserts that `kind` has exactly one persisted error, at `step`, whose
/// message contains `needle`.
pub async fn assert_error_at(store: &dyn CheckpointStore, kind: PipelineKind, step: StepIndex, needle: &str) {
    let errors = store.get_errors(kind).await.unwrap_or_default();
    assert_eq!(
        errors.keys().copied().collect::<Vec<_>>(),
        vec![step],
        "Expected a single {kind} error at step {step}, got {errors:?}"
    );
    let message = errors.get(&step).map(String::as_str).unwrap_or_default();
    assert!(
        message.contains(needle),
        "Expected error message to contain '{needle}', got '{message}'"
    );
}

/// Asserts that `kind` has no persisted error.
pub async fn assert_no_errors(store: &dyn CheckpointStore, kind: PipelineKind) {
    let errors = store.get_errors(kind).await.unwrap_or_default();
    assert!(errors.is_empty(), "Expected no {kind} errors, got {errors:?}");
}

/// Asserts that an artifact is stored with the expected value.
pub async fn assert_artifact(store: &dyn CheckpointStore, key: &str, expected: &serde_json::Value) {
    let actual = store.get(key).await.ok().flatten();
    assert_eq!(
        actual.as_ref(),
        Some(expected),
        "Expected artifact '{key}' to be {expected}, got {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCheckpointStore;
    use serde_json::json;

    #[test]
    fn test_assert_outcome_failed_at() {
        let outcome = RunOutcome::Failed {
            kind: PipelineKind::EndOfDay,
            step: StepIndex(1),
            message: "network".to_string(),
        };
        assert_outcome_failed_at(&outcome, StepIndex(1));
    }

    #[test]
    #[should_panic(expected = "Expected success")]
    fn test_assert_outcome_succeeded_panics_on_failure() {
        assert_outcome_succeeded(&RunOutcome::AlreadyRunning);
    }

    #[tokio::test]
    async fn test_store_assertions() {
        let store = MemoryCheckpointStore::new();
        store.put("x", Some(json!(1))).await.unwrap();
        store.put_step(PipelineKind::EndOfDay, StepIndex(2)).await.unwrap();
        let mut errors = crate::core::StepErrors::new();
        errors.insert(StepIndex(2), "network down".to_string());
        store.put_errors(PipelineKind::EndOfDay, errors).await.unwrap();

        assert_artifact(&store, "x", &json!(1)).await;
        assert_pointer(&store, PipelineKind::EndOfDay, StepIndex(2)).await;
        assert_error_at(&store, PipelineKind::EndOfDay, StepIndex(2), "network").await;
        assert_no_errors(&store, PipelineKind::NewGame).await;
    }
}
