//! The pipeline state bucket.
//!
//! The bucket is the single accumulating handoff record of one run. Each
//! step reads it, adds or overwrites only its own fields, and writes it
//! back. It also carries a reusable expensive-context handle (for example a
//! provider-side prompt cache) that survives between runs as long as the
//! model it was built with is still the selected one.

mod handle;

pub use handle::ContextHandle;

use crate::core::{PipelineKind, StepIndex};
use crate::errors::StoreError;
use crate::store::CheckpointStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Reserved artifact key the bucket is persisted under.
pub const BUCKET_KEY: &str = "pipeline_state_bucket";

/// Costs reported by one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCost {
    /// Input cost.
    pub input_cost: u64,
    /// Output cost.
    pub output_cost: u64,
}

impl StepCost {
    fn is_zero(self) -> bool {
        self.input_cost == 0 && self.output_cost == 0
    }
}

/// Versioned handoff record of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineBucket {
    /// Incremented on every merge that changes the bucket.
    #[serde(default)]
    pub version: u64,
    /// The run the bucket belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// The kind of the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PipelineKind>,
    /// Handoff fields written by collaborators, keyed by field name.
    #[serde(default)]
    pub handoff: BTreeMap<String, serde_json::Value>,
    /// Reusable expensive-context handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_handle: Option<ContextHandle>,
    /// Costs of the run, keyed by the step that reported them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_costs: BTreeMap<StepIndex, StepCost>,
    /// Total input cost of the run.
    #[serde(default)]
    pub input_cost: u64,
    /// Total output cost of the run.
    #[serde(default)]
    pub output_cost: u64,
    /// Time of the last merge that changed the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PipelineBucket {
    /// Returns a handoff field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.handoff.get(name)
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handoff.is_empty() && self.context_handle.is_none() && self.run_id.is_none()
    }

    /// Returns the bucket with the update of `step` merged in.
    ///
    /// Handoff fields present in the update overwrite existing ones, other
    /// fields are kept. The step's costs replace whatever it reported
    /// before, so merging the same update twice equals merging it once.
    #[must_use]
    pub fn merged(self, step: StepIndex, update: BucketUpdate) -> Self {
        let mut next = self.clone();
        next.handoff.extend(update.handoff);
        if let Some(handle) = update.context_handle {
            next.context_handle = Some(handle);
        }

        let cost = StepCost {
            input_cost: update.input_cost,
            output_cost: update.output_cost,
        };
        if cost.is_zero() {
            next.step_costs.remove(&step);
        } else {
            next.step_costs.insert(step, cost);
        }
        next.input_cost = next.step_costs.values().fold(0, |sum, c| sum.saturating_add(c.input_cost));
        next.output_cost = next.step_costs.values().fold(0, |sum, c| sum.saturating_add(c.output_cost));

        if next == self {
            return self;
        }
        next.version += 1;
        next.updated_at = Some(Utc::now());
        next
    }
}

/// Partial update produced by one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketUpdate {
    /// Handoff fields to add or overwrite.
    #[serde(default)]
    pub handoff: BTreeMap<String, serde_json::Value>,
    /// A freshly built context handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_handle: Option<ContextHandle>,
    /// Input cost of the step.
    #[serde(default)]
    pub input_cost: u64,
    /// Output cost of the step.
    #[serde(default)]
    pub output_cost: u64,
}

impl BucketUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handoff field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.handoff.insert(name.into(), value);
        self
    }

    /// Sets the context handle.
    #[must_use]
    pub fn with_context_handle(mut self, handle: ContextHandle) -> Self {
        self.context_handle = Some(handle);
        self
    }

    /// Sets the costs.
    #[must_use]
    pub fn with_costs(mut self, input_cost: u64, output_cost: u64) -> Self {
        self.input_cost = input_cost;
        self.output_cost = output_cost;
        self
    }
}

/// Loads and saves the bucket through a checkpoint store.
#[derive(Clone)]
pub struct BucketStore {
    store: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore").finish_non_exhaustive()
    }
}

impl BucketStore {
    /// Creates a bucket store over a checkpoint store.
    #[must_use]
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Loads the bucket, or an empty one if none is persisted.
    ///
    /// A persisted value that no longer decodes is treated as empty.
    pub async fn load(&self) -> Result<PipelineBucket, StoreError> {
        let Some(value) = self.store.get(BUCKET_KEY).await? else {
            return Ok(PipelineBucket::default());
        };
        Ok(serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(error = %e, "Discarding undecodable pipeline bucket");
            PipelineBucket::default()
        }))
    }

    /// Loads the bucket, dropping a context handle built with another model.
    pub async fn load_for_model(&self, model: &str) -> Result<PipelineBucket, StoreError> {
        let mut bucket = self.load().await?;
        let stale = bucket
            .context_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_valid_for(model));

        if stale {
            info!(
                selected_model = model,
                built_with = ?bucket.context_handle.as_ref().map(|h| h.built_with_model.as_str()),
                "Context handle built with another model, forcing rebuild"
            );
            bucket.context_handle = None;
            self.write(&bucket).await?;
        }
        Ok(bucket)
    }

    /// Merges the update of `step` into the persisted bucket and returns the
    /// result. Nothing is written when the merge changes nothing.
    pub async fn save(&self, step: StepIndex, update: BucketUpdate) -> Result<PipelineBucket, StoreError> {
        let current = self.load().await?;
        let version = current.version;
        let bucket = current.merged(step, update);
        if bucket.version != version {
            self.write(&bucket).await?;
        }
        Ok(bucket)
    }

    /// Starts a new run: handoff and costs are reset, the context handle is kept.
    pub async fn begin_run(&self, kind: PipelineKind) -> Result<PipelineBucket, StoreError> {
        let previous = self.load().await?;
        let bucket = PipelineBucket {
            run_id: Some(Uuid::new_v4()),
            kind: Some(kind),
            context_handle: previous.context_handle,
            updated_at: Some(Utc::now()),
            ..PipelineBucket::default()
        };
        self.write(&bucket).await?;
        Ok(bucket)
    }

    /// Drops the context handle, keeping the rest of the bucket.
    pub async fn invalidate_context_handle(&self) -> Result<(), StoreError> {
        let mut bucket = self.load().await?;
        if bucket.context_handle.take().is_some() {
            self.write(&bucket).await?;
        }
        Ok(())
    }

    /// Deletes the bucket.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.put(BUCKET_KEY, None).await
    }

    async fn write(&self, bucket: &PipelineBucket) -> Result<(), StoreError> {
        let value = serde_json::to_value(bucket)
            .map_err(|e| StoreError::transaction("bucket.write", e))?;
        self.store.put(BUCKET_KEY, Some(value)).await
    }
}
