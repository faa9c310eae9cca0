//! Step specifications.

use crate::core::StepIndex;
use serde::{Deserialize, Serialize};

/// Where to find a consumed artifact that is missing from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Fallback {
    /// A JSON pointer into the primary game snapshot.
    Snapshot {
        /// RFC 6901 pointer, e.g. `/dialogue/current_segment`.
        pointer: String,
    },
    /// Another artifact, typically one written by an earlier session.
    Artifact {
        /// The artifact key to copy from.
        key: String,
    },
}

impl Fallback {
    /// Creates a snapshot fallback.
    #[must_use]
    pub fn snapshot(pointer: impl Into<String>) -> Self {
        Self::Snapshot {
            pointer: pointer.into(),
        }
    }

    /// Creates an artifact fallback.
    #[must_use]
    pub fn artifact(key: impl Into<String>) -> Self {
        Self::Artifact { key: key.into() }
    }
}

/// An artifact a step consumes, with the fallbacks tried in order on a miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// The artifact key.
    pub key: String,
    /// Fallback sources, tried in order.
    #[serde(default)]
    pub fallbacks: Vec<Fallback>,
}

impl InputSpec {
    /// Creates an input with no fallback.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Adds a fallback source.
    #[must_use]
    pub fn or(mut self, fallback: Fallback) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    /// Returns the snapshot pointer this input can be seeded from, if any.
    #[must_use]
    pub fn snapshot_pointer(&self) -> Option<&str> {
        self.fallbacks.iter().find_map(|fallback| match fallback {
            Fallback::Snapshot { pointer } => Some(pointer.as_str()),
            Fallback::Artifact { .. } => None,
        })
    }
}

/// Specification of one checkpointed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Position within the kind; assigned by the registry builder.
    pub index: StepIndex,
    /// Unique name within the kind.
    pub name: String,
    /// Name of the collaborator the step invokes.
    pub collaborator: String,
    /// Artifacts the step consumes.
    #[serde(default)]
    pub consumes: Vec<InputSpec>,
    /// Artifacts the step produces.
    #[serde(default)]
    pub produces: Vec<String>,
}

impl StepSpec {
    /// Creates a step invoking `collaborator`.
    #[must_use]
    pub fn new(name: impl Into<String>, collaborator: impl Into<String>) -> Self {
        Self {
            index: StepIndex::NOT_STARTED,
            name: name.into(),
            collaborator: collaborator.into(),
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    /// Adds a consumed artifact without fallback.
    #[must_use]
    pub fn consumes(mut self, key: impl Into<String>) -> Self {
        self.consumes.push(InputSpec::new(key));
        self
    }

    /// Adds a consumed artifact with its fallback chain.
    #[must_use]
    pub fn consumes_input(mut self, input: InputSpec) -> Self {
        self.consumes.push(input);
        self
    }

    /// Sets the produced artifacts.
    #[must_use]
    pub fn produces(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.produces = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the step only has side effects.
    #[must_use]
    pub fn is_side_effect_only(&self) -> bool {
        self.produces.is_empty()
    }

    /// Returns the consumed keys.
    pub fn consumed_keys(&self) -> impl Iterator<Item = &str> {
        self.consumes.iter().map(|input| input.key.as_str())
    }
}
