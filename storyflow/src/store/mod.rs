//! Durable checkpoint storage.
//!
//! A checkpoint store keeps three tables: named artifacts, the step pointer
//! of every pipeline kind, and the error map of every pipeline kind.
//! Single-artifact writes are independent last-write-wins operations, while
//! `clear_all` and `restore` replace every table in one transaction.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

use crate::core::{PipelineKind, StepErrors, StepIndex};
use crate::errors::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// All persisted checkpoint state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreTables {
    /// Artifacts by key.
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// Step pointer per kind. Absent means not started.
    #[serde(default)]
    pub steps: BTreeMap<PipelineKind, StepIndex>,
    /// Error map per kind. Absent means no pending error.
    #[serde(default)]
    pub errors: BTreeMap<PipelineKind, StepErrors>,
}

impl StoreTables {
    /// Returns the step pointer of a kind.
    #[must_use]
    pub fn step(&self, kind: PipelineKind) -> StepIndex {
        self.steps.get(&kind).copied().unwrap_or_default()
    }

    /// Returns the error map of a kind.
    #[must_use]
    pub fn errors(&self, kind: PipelineKind) -> StepErrors {
        self.errors.get(&kind).cloned().unwrap_or_default()
    }

    pub(crate) fn put(&mut self, key: &str, value: Option<serde_json::Value>) {
        match value {
            Some(value) => {
                self.artifacts.insert(key.to_string(), value);
            }
            None => {
                self.artifacts.remove(key);
            }
        }
    }

    pub(crate) fn put_step(&mut self, kind: PipelineKind, index: StepIndex) {
        if index.is_not_started() {
            self.steps.remove(&kind);
        } else {
            self.steps.insert(kind, index);
        }
    }

    pub(crate) fn put_errors(&mut self, kind: PipelineKind, errors: StepErrors) {
        if errors.is_empty() {
            self.errors.remove(&kind);
        } else {
            self.errors.insert(kind, errors);
        }
    }

    pub(crate) fn clear_steps_and_errors(&mut self) {
        self.steps.clear();
        self.errors.clear();
    }
}

/// Transactional local persistence used by the step executor.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Writes an artifact; `None` deletes it.
    async fn put(&self, key: &str, value: Option<serde_json::Value>) -> Result<(), StoreError>;

    /// Reads an artifact.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Writes the step pointer of a kind.
    async fn put_step(&self, kind: PipelineKind, index: StepIndex) -> Result<(), StoreError>;

    /// Reads the step pointer of a kind.
    async fn get_step(&self, kind: PipelineKind) -> Result<StepIndex, StoreError>;

    /// Replaces the error map of a kind.
    async fn put_errors(&self, kind: PipelineKind, errors: StepErrors) -> Result<(), StoreError>;

    /// Reads the error map of a kind.
    async fn get_errors(&self, kind: PipelineKind) -> Result<StepErrors, StoreError>;

    /// Atomically clears artifacts, step pointers and error maps.
    async fn clear_all(&self) -> Result<(), StoreError>;

    /// Atomically clears step pointers and error maps, keeping artifacts.
    async fn clear_steps_and_errors_only(&self) -> Result<(), StoreError>;

    /// Returns a consistent copy of every table.
    async fn tables(&self) -> Result<StoreTables, StoreError>;

    /// Atomically replaces every table.
    async fn restore(&self, tables: StoreTables) -> Result<(), StoreError>;
}
