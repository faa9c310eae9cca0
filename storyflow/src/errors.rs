//! Error types for the storyflow orchestrator.
//!
//! Failures are grouped by how the orchestrator reacts to them: collaborator
//! and hydration failures are recorded against a step and wait for a manual
//! retry, stale-session drops are purely diagnostic, leadership conflicts
//! block the tab permanently, and transaction failures are fatal.

use crate::core::{PipelineKind, StepIndex};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for storyflow operations.
#[derive(Debug, Error)]
pub enum StoryflowError {
    /// A collaborator call errored or returned a malformed payload.
    #[error("{0}")]
    Collaborator(#[from] CollaboratorError),

    /// A consumed artifact could not be resolved, even through its fallback.
    #[error("{0}")]
    Hydration(#[from] HydrationError),

    /// A write was dispatched under a generation that has since been superseded.
    #[error("{0}")]
    StaleSession(#[from] StaleSessionDrop),

    /// Another tab holds leadership of this save.
    #[error("{0}")]
    LeadershipConflict(#[from] LeadershipConflict),

    /// The checkpoint store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A pipeline definition is invalid.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// An imported save could not be applied.
    #[error("{0}")]
    Import(#[from] ImportError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoryflowError {
    /// Returns the taxonomy name of the error.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Collaborator(_) => "CollaboratorFailure",
            Self::Hydration(_) => "HydrationFailure",
            Self::StaleSession(_) => "StaleSessionDrop",
            Self::LeadershipConflict(_) => "LeadershipConflict",
            Self::Store(StoreError::Transaction { .. }) => "TransactionFailure",
            Self::Store(_) => "StoreFailure",
            Self::Registry(_) => "RegistryInvalid",
            Self::Import(_) => "ImportFailure",
            Self::Serialization(_) => "SerializationFailure",
            Self::Io(_) => "IoFailure",
        }
    }

    /// Returns true if a manual retry of the failing step can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Collaborator(_) | Self::Hydration(_))
    }

    /// Returns true if the only recovery is reloading or closing the tab.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LeadershipConflict(_) | Self::Store(StoreError::Transaction { .. })
        )
    }

    /// Converts to a dictionary representation for the UI.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), json!(self.error_type()));
        map.insert("message".to_string(), json!(self.to_string()));
        map.insert("retryable".to_string(), json!(self.is_retryable()));
        map.insert("fatal".to_string(), json!(self.is_fatal()));
        map
    }
}

impl From<WriteRefused> for StoryflowError {
    fn from(refused: WriteRefused) -> Self {
        match refused {
            WriteRefused::Stale(drop) => Self::StaleSession(drop),
            WriteRefused::Blocked(conflict) => Self::LeadershipConflict(conflict),
        }
    }
}

impl From<serde_json::Error> for StoryflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors returned by collaborator calls.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The call itself failed (network, provider, quota...).
    #[error("{0}")]
    Failed(String),

    /// The payload did not contain an artifact the step declares.
    #[error("Malformed payload from '{collaborator}': missing '{key}'")]
    MissingArtifact {
        /// The collaborator name.
        collaborator: String,
        /// The missing artifact key.
        key: String,
    },

    /// The payload was not a JSON object.
    #[error("Malformed payload from '{collaborator}': expected an object")]
    NotAnObject {
        /// The collaborator name.
        collaborator: String,
    },

    /// No collaborator is registered under the name a step references.
    #[error("Collaborator not registered: {0}")]
    NotRegistered(String),

    /// An error raised by a collaborator implementation.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollaboratorError {
    /// Creates a call failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates a missing-artifact error.
    #[must_use]
    pub fn missing_artifact(collaborator: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingArtifact {
            collaborator: collaborator.into(),
            key: key.into(),
        }
    }
}

/// A consumed artifact that could not be resolved.
#[derive(Debug, Clone, Error)]
#[error("Missing input '{key}' for step '{step}' and no fallback produced it")]
pub struct HydrationError {
    /// The consuming step.
    pub step: String,
    /// The unresolved artifact key.
    pub key: String,
}

impl HydrationError {
    /// Creates a new hydration error.
    #[must_use]
    pub fn new(step: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            key: key.into(),
        }
    }
}

/// A guarded write that fired after its generation was superseded.
#[derive(Debug, Clone, Copy, Error)]
#[error("Dropped write from generation {issued} (live generation is {live})")]
pub struct StaleSessionDrop {
    /// The generation the write was dispatched under.
    pub issued: u64,
    /// The live generation when the write tried to apply.
    pub live: u64,
}

/// This tab lost leadership of the save to another tab.
#[derive(Debug, Clone, Error)]
#[error("Save is open in another tab ({holder}); close this tab to continue")]
pub struct LeadershipConflict {
    /// The tab that holds leadership.
    pub holder: String,
}

impl LeadershipConflict {
    /// Creates a new leadership conflict.
    #[must_use]
    pub fn new(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
        }
    }
}

/// Why a guarded write was not applied.
#[derive(Debug, Clone, Error)]
pub enum WriteRefused {
    /// The write's generation was superseded.
    #[error(transparent)]
    Stale(#[from] StaleSessionDrop),
    /// This tab no longer holds the save.
    #[error(transparent)]
    Blocked(#[from] LeadershipConflict),
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An atomic write failed; the previous durable state is kept.
    #[error("Transaction '{operation}' failed: {reason}")]
    Transaction {
        /// The store operation.
        operation: String,
        /// The underlying reason.
        reason: String,
    },

    /// The persisted document could not be decoded.
    #[error("Corrupt checkpoint document: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Creates a transaction failure.
    #[must_use]
    pub fn transaction(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transaction {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors found while validating pipeline definitions.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {kind}: {message}")]
pub struct RegistryError {
    /// Short error code.
    pub code: &'static str,
    /// The kind being validated.
    pub kind: PipelineKind,
    /// Description of the problem.
    pub message: String,
    /// The offending step, if any.
    pub step: Option<StepIndex>,
}

impl RegistryError {
    /// Creates a new registry error.
    #[must_use]
    pub fn new(code: &'static str, kind: PipelineKind, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
            step: None,
        }
    }

    /// Sets the offending step.
    #[must_use]
    pub fn at_step(mut self, step: StepIndex) -> Self {
        self.step = Some(step);
        self
    }

    /// Returns a fix hint for the error code.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self.code {
            "REGISTRY-EMPTY" => Some("Declare at least one step for every pipeline kind."),
            "REGISTRY-DUPLICATE" => Some("Step names must be unique within a pipeline kind."),
            "REGISTRY-KEY" => Some("Artifact keys are lowercase snake_case identifiers."),
            "REGISTRY-UNRESOLVED" => Some(
                "Produce the key in an earlier step of the same kind or declare a fallback source.",
            ),
            "REGISTRY-SELF" => Some("A step cannot consume an artifact it produces."),
            _ => None,
        }
    }
}

/// Errors raised while importing a save.
#[derive(Debug, Clone, Error)]
pub enum ImportError {
    /// The bundle could not be decoded.
    #[error("Could not decode save: {0}")]
    Decode(String),

    /// The bundle checksum does not match its content.
    #[error("Save checksum mismatch (expected {expected}, computed {computed})")]
    ChecksumMismatch {
        /// The checksum carried by the bundle.
        expected: String,
        /// The checksum computed from the content.
        computed: String,
    },

    /// The bundle was written by an unsupported format version.
    #[error("Unsupported save format version {0}")]
    UnsupportedVersion(u32),
}
