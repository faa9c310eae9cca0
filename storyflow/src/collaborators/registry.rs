//! Name-keyed collaborator registry.

use super::Collaborator;
use crate::errors::CollaboratorError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry resolving the collaborator names referenced by pipeline steps.
#[derive(Default)]
pub struct CollaboratorRegistry {
    collaborators: RwLock<HashMap<String, Arc<dyn Collaborator>>>,
}

impl CollaboratorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collaborator, replacing any previous one with the same name.
    pub fn register(&self, name: impl Into<String>, collaborator: Arc<dyn Collaborator>) {
        self.collaborators.write().insert(name.into(), collaborator);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(self, name: impl Into<String>, collaborator: Arc<dyn Collaborator>) -> Self {
        self.register(name, collaborator);
        self
    }

    /// Resolves a collaborator by name.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if no collaborator has that name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Collaborator>, CollaboratorError> {
        self.collaborators
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotRegistered(name.to_string()))
    }

    /// Returns true if a collaborator is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.collaborators.read().contains_key(name)
    }

    /// Lists registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collaborators.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorRegistry")
            .field("names", &self.names())
            .finish()
    }
}
