//! Reusable expensive-context handle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a context that is expensive to rebuild, such as a
/// provider-side prompt cache.
///
/// A handle is only valid against the backend session and model it was
/// built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextHandle {
    /// Opaque handle returned by the backend.
    pub handle: String,
    /// The model the context was built with.
    pub built_with_model: String,
    /// When the context was built.
    pub created_at: DateTime<Utc>,
}

impl ContextHandle {
    /// Creates a handle built now.
    #[must_use]
    pub fn new(handle: impl Into<String>, built_with_model: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            built_with_model: built_with_model.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns true if the handle can be reused with `model`.
    #[must_use]
    pub fn is_valid_for(&self, model: &str) -> bool {
        self.built_with_model == model
    }
}
