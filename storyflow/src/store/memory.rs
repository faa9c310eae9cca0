//! In-memory checkpoint store.

use super::{CheckpointStore, StoreTables};
use crate::core::{PipelineKind, StepErrors, StepIndex};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Checkpoint store holding every table behind a single lock.
///
/// Multi-table operations take the write lock once, so readers never see a
/// half-cleared state.
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointStore {
    tables: Arc<RwLock<StoreTables>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with tables.
    #[must_use]
    pub fn with_tables(tables: StoreTables) -> Self {
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Returns the number of stored artifacts.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.tables.read().artifacts.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, key: &str, value: Option<serde_json::Value>) -> Result<(), StoreError> {
        self.tables.write().put(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.tables.read().artifacts.get(key).cloned())
    }

    async fn put_step(&self, kind: PipelineKind, index: StepIndex) -> Result<(), StoreError> {
        self.tables.write().put_step(kind, index);
        Ok(())
    }

    async fn get_step(&self, kind: PipelineKind) -> Result<StepIndex, StoreError> {
        Ok(self.tables.read().step(kind))
    }

    async fn put_errors(&self, kind: PipelineKind, errors: StepErrors) -> Result<(), StoreError> {
        self.tables.write().put_errors(kind, errors);
        Ok(())
    }

    async fn get_errors(&self, kind: PipelineKind) -> Result<StepErrors, StoreError> {
        Ok(self.tables.read().errors(kind))
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        *self.tables.write() = StoreTables::default();
        Ok(())
    }

    async fn clear_steps_and_errors_only(&self) -> Result<(), StoreError> {
        self.tables.write().clear_steps_and_errors();
        Ok(())
    }

    async fn tables(&self) -> Result<StoreTables, StoreError> {
        Ok(self.tables.read().clone())
    }

    async fn restore(&self, tables: StoreTables) -> Result<(), StoreError> {
        *self.tables.write() = tables;
        Ok(())
    }
}
