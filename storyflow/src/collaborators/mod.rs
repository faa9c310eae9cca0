//! Collaborator contract.
//!
//! A collaborator is an external, usually AI-backed, call invoked by a step.
//! The orchestrator is agnostic to its payload schema: it only destructures
//! the payload through the step's declared artifact keys and adds up the
//! reported costs.

mod registry;
mod signals;

pub use registry::CollaboratorRegistry;
pub use signals::{CollaboratorSignal, StepSignals};

use crate::bucket::{BucketUpdate, ContextHandle, PipelineBucket};
use crate::core::{PipelineKind, StepIndex};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a collaborator receives for one step.
#[derive(Debug, Clone)]
pub struct CollaboratorRequest {
    /// The pipeline kind.
    pub kind: PipelineKind,
    /// The step being executed.
    pub step: StepIndex,
    /// The step name.
    pub step_name: String,
    /// Resolved inputs, keyed by artifact key.
    pub inputs: BTreeMap<String, serde_json::Value>,
    /// The run's handoff bucket as of the start of the step.
    pub bucket: PipelineBucket,
    /// The currently selected model.
    pub model: String,
    /// Channel for informational signals.
    pub signals: StepSignals,
}

impl CollaboratorRequest {
    /// Returns a resolved input.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&serde_json::Value> {
        self.inputs.get(key)
    }

    /// Returns the reusable context handle if it was built with the selected model.
    #[must_use]
    pub fn reusable_context(&self) -> Option<&ContextHandle> {
        self.bucket
            .context_handle
            .as_ref()
            .filter(|handle| handle.is_valid_for(&self.model))
    }
}

/// A successful collaborator result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorResponse {
    /// Payload object; declared artifacts are read from its top-level keys.
    pub payload: serde_json::Value,
    /// Input cost of the call.
    #[serde(default)]
    pub input_cost: u64,
    /// Output cost of the call.
    #[serde(default)]
    pub output_cost: u64,
    /// Handoff fields for later steps.
    #[serde(default)]
    pub handoff: BTreeMap<String, serde_json::Value>,
    /// A newly built context handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_handle: Option<ContextHandle>,
}

impl CollaboratorResponse {
    /// Creates a response with a payload and no costs.
    #[must_use]
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Creates a response that produces no artifacts.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Sets the costs.
    #[must_use]
    pub fn with_costs(mut self, input_cost: u64, output_cost: u64) -> Self {
        self.input_cost = input_cost;
        self.output_cost = output_cost;
        self
    }

    /// Adds a handoff field.
    #[must_use]
    pub fn with_handoff(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.handoff.insert(name.into(), value);
        self
    }

    /// Sets a newly built context handle.
    #[must_use]
    pub fn with_context_handle(mut self, handle: ContextHandle) -> Self {
        self.context_handle = Some(handle);
        self
    }

    /// Extracts the declared artifacts from the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not an object, or lacks a key.
    pub fn artifacts(
        &self,
        collaborator: &str,
        produces: &[String],
    ) -> Result<Vec<(String, serde_json::Value)>, CollaboratorError> {
        if produces.is_empty() {
            return Ok(Vec::new());
        }
        let object = self
            .payload
            .as_object()
            .ok_or_else(|| CollaboratorError::NotAnObject {
                collaborator: collaborator.to_string(),
            })?;

        produces
            .iter()
            .map(|key| {
                object
                    .get(key)
                    .cloned()
                    .map(|value| (key.clone(), value))
                    .ok_or_else(|| CollaboratorError::missing_artifact(collaborator, key))
            })
            .collect()
    }

    /// Converts the handoff, handle and costs into a bucket update.
    #[must_use]
    pub fn bucket_update(&self) -> BucketUpdate {
        BucketUpdate {
            handoff: self.handoff.clone(),
            context_handle: self.context_handle.clone(),
            input_cost: self.input_cost,
            output_cost: self.output_cost,
        }
    }
}

/// Trait for collaborators invoked by pipeline steps.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Invokes the collaborator.
    ///
    /// The call may suspend for seconds to minutes. Implementations report
    /// key rotations and rate-limit waits through `request.signals` and must
    /// not retry failed calls on their own.
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError>;
}

#[async_trait]
impl<T: Collaborator + ?Sized> Collaborator for std::sync::Arc<T> {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        (**self).invoke(request).await
    }
}

/// A collaborator backed by an async closure.
pub struct FnCollaborator<F> {
    func: F,
}

impl<F> FnCollaborator<F> {
    /// Creates a collaborator from a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> std::fmt::Debug for FnCollaborator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCollaborator").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Collaborator for FnCollaborator<F>
where
    F: Fn(CollaboratorRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<CollaboratorResponse, CollaboratorError>> + Send,
{
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        (self.func)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifacts_destructures_payload() {
        let response = CollaboratorResponse::new(json!({"x": 1, "y": [2], "extra": true}));
        let artifacts = response
            .artifacts("persona", &["x".to_string(), "y".to_string()])
            .unwrap();

        assert_eq!(artifacts, vec![("x".to_string(), json!(1)), ("y".to_string(), json!([2]))]);
    }

    #[test]
    fn test_artifacts_missing_key() {
        let response = CollaboratorResponse::new(json!({"x": 1}));
        let err = response.artifacts("persona", &["y".to_string()]).unwrap_err();
        assert!(matches!(err, CollaboratorError::MissingArtifact { ref key, .. } if key == "y"));
    }

    #[test]
    fn test_artifacts_not_object() {
        let response = CollaboratorResponse::new(json!("prose"));
        assert!(response.artifacts("persona", &["x".to_string()]).is_err());
        assert!(response.artifacts("persona", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_bucket_update_carries_costs() {
        let update = CollaboratorResponse::empty()
            .with_costs(120, 40)
            .with_handoff("notes", json!("remember the lighthouse"))
            .bucket_update();

        assert_eq!(update.input_cost, 120);
        assert_eq!(update.output_cost, 40);
        assert_eq!(update.handoff.get("notes"), Some(&json!("remember the lighthouse")));
    }

    #[tokio::test]
    async fn test_fn_collaborator() {
        let collaborator = FnCollaborator::new(|request: CollaboratorRequest| async move {
            let echo = request.input("x").cloned().unwrap_or_default();
            Ok(CollaboratorResponse::new(json!({ "y": echo })))
        });

        let mut inputs = BTreeMap::new();
        inputs.insert("x".to_string(), json!(7));
        let request = CollaboratorRequest {
            kind: PipelineKind::EndOfDay,
            step: StepIndex(1),
            step_name: "b".to_string(),
            inputs,
            bucket: PipelineBucket::default(),
            model: "model-a".to_string(),
            signals: StepSignals::detached(PipelineKind::EndOfDay, "b"),
        };

        let response = collaborator.invoke(request).await.unwrap();
        assert_eq!(response.payload, json!({"y": 7}));
    }
}
