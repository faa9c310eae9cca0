//! File-backed checkpoint store.
//!
//! The whole checkpoint state is one JSON document. Every write serializes
//! the next state into a temporary file in the same directory and renames it
//! over the previous document, so a crash leaves either the old or the new
//! document on disk and never a mix of the two. The file work runs on the
//! blocking pool; writes are serialized so each one starts from the state
//! the previous one committed.

use super::{CheckpointStore, StoreTables};
use crate::core::{PipelineKind, StepErrors, StepIndex};
use crate::errors::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

/// Checkpoint store persisted to a JSON document on disk.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    tables: Mutex<StoreTables>,
    writer: tokio::sync::Mutex<()>,
    #[cfg(test)]
    interrupt_next_commit: AtomicBool,
}

impl FileCheckpointStore {
    /// Opens the store at `path`, loading the existing document if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tables = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreTables::default(),
            Err(e) => return Err(StoreError::transaction("open", e)),
        };

        debug!(
            path = %path.display(),
            artifacts = tables.artifacts.len(),
            "Opened checkpoint document"
        );

        Ok(Self {
            path,
            tables: Mutex::new(tables),
            writer: tokio::sync::Mutex::new(()),
            #[cfg(test)]
            interrupt_next_commit: AtomicBool::new(false),
        })
    }

    /// Returns the document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Makes the next commit fail after writing its temporary file but
    /// before the rename, as a crash at that point would.
    #[cfg(test)]
    pub(crate) fn interrupt_next_commit(&self) {
        self.interrupt_next_commit.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_interrupt(&self) -> bool {
        self.interrupt_next_commit.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(test))]
    #[allow(clippy::unused_self)]
    fn take_interrupt(&self) -> bool {
        false
    }

    async fn mutate<F>(&self, operation: &'static str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreTables) + Send,
    {
        let _writing = self.writer.lock().await;
        let mut next = self.tables.lock().clone();
        apply(&mut next);

        let path = self.path.clone();
        let interrupted = self.take_interrupt();
        let next = tokio::task::spawn_blocking(move || persist(&path, operation, next, interrupted))
            .await
            .map_err(|e| StoreError::transaction(operation, e))??;
        *self.tables.lock() = next;
        Ok(())
    }
}

fn persist(
    path: &Path,
    operation: &str,
    tables: StoreTables,
    interrupted: bool,
) -> Result<StoreTables, StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(dir).map_err(|e| StoreError::transaction(operation, e))?;
    serde_json::to_writer(&mut file, &tables).map_err(|e| StoreError::transaction(operation, e))?;
    file.flush()
        .and_then(|()| file.as_file().sync_all())
        .map_err(|e| StoreError::transaction(operation, e))?;

    if interrupted {
        return Err(StoreError::transaction(operation, "interrupted before rename"));
    }

    file.persist(path).map_err(|e| {
        warn!(operation, error = %e.error, "Checkpoint commit failed");
        StoreError::transaction(operation, e.error)
    })?;
    Ok(tables)
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, key: &str, value: Option<serde_json::Value>) -> Result<(), StoreError> {
        self.mutate("put", |t| t.put(key, value)).await
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.tables.lock().artifacts.get(key).cloned())
    }

    async fn put_step(&self, kind: PipelineKind, index: StepIndex) -> Result<(), StoreError> {
        self.mutate("put_step", |t| t.put_step(kind, index)).await
    }

    async fn get_step(&self, kind: PipelineKind) -> Result<StepIndex, StoreError> {
        Ok(self.tables.lock().step(kind))
    }

    async fn put_errors(&self, kind: PipelineKind, errors: StepErrors) -> Result<(), StoreError> {
        self.mutate("put_errors", |t| t.put_errors(kind, errors)).await
    }

    async fn get_errors(&self, kind: PipelineKind) -> Result<StepErrors, StoreError> {
        Ok(self.tables.lock().errors(kind))
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.mutate("clear_all", |t| *t = StoreTables::default()).await
    }

    async fn clear_steps_and_errors_only(&self) -> Result<(), StoreError> {
        self.mutate("clear_steps_and_errors_only", StoreTables::clear_steps_and_errors).await
    }

    async fn tables(&self) -> Result<StoreTables, StoreError> {
        Ok(self.tables.lock().clone())
    }

    async fn restore(&self, tables: StoreTables) -> Result<(), StoreError> {
        self.mutate("restore", |t| *t = tables).await
    }
}
