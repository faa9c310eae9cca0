//! Pipeline definition registry.
//!
//! The registry is the single source of truth for step ordering and artifact
//! dependencies. It is a pure lookup: building it validates the flows, and
//! nothing in it changes afterwards.

mod spec;
mod standard;

pub use spec::{Fallback, InputSpec, StepSpec};

use crate::core::{PipelineKind, StepIndex};
use crate::errors::RegistryError;
use std::collections::{BTreeMap, HashSet};

/// Validated step definitions for every pipeline kind.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    flows: BTreeMap<PipelineKind, Vec<StepSpec>>,
}

impl PipelineRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> PipelineRegistryBuilder {
        PipelineRegistryBuilder::default()
    }

    /// Returns the ordered steps of a kind. Undeclared kinds have no steps.
    #[must_use]
    pub fn steps_for(&self, kind: PipelineKind) -> &[StepSpec] {
        self.flows.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Returns one step.
    #[must_use]
    pub fn step(&self, kind: PipelineKind, index: StepIndex) -> Option<&StepSpec> {
        self.steps_for(kind).get(index.value() as usize)
    }

    /// Finds a step by name.
    #[must_use]
    pub fn step_named(&self, kind: PipelineKind, name: &str) -> Option<&StepSpec> {
        self.steps_for(kind).iter().find(|step| step.name == name)
    }

    /// Returns the completion sentinel of a kind.
    #[must_use]
    pub fn terminal(&self, kind: PipelineKind) -> StepIndex {
        StepIndex::new(u32::try_from(self.steps_for(kind).len()).unwrap_or(u32::MAX))
    }

    /// Returns the declared kinds.
    pub fn kinds(&self) -> impl Iterator<Item = PipelineKind> + '_ {
        self.flows.keys().copied()
    }

    /// Returns `(key, pointer)` for every input of the steps from `from`
    /// onwards that can be seeded from the game snapshot.
    ///
    /// Keys produced by an earlier step of the remaining range are skipped,
    /// since the run will produce them itself.
    #[must_use]
    pub fn snapshot_seeded_keys(&self, kind: PipelineKind, from: StepIndex) -> Vec<(String, String)> {
        let mut produced = HashSet::new();
        let mut seen = HashSet::new();
        let mut seeds = Vec::new();

        for step in self.steps_for(kind).iter().skip(from.value() as usize) {
            for input in &step.consumes {
                if produced.contains(input.key.as_str()) || !seen.insert(input.key.as_str()) {
                    continue;
                }
                if let Some(pointer) = input.snapshot_pointer() {
                    seeds.push((input.key.clone(), pointer.to_string()));
                }
            }
            produced.extend(step.produces.iter().map(String::as_str));
        }
        seeds
    }
}

/// Builder that assigns step indices and validates flows.
#[derive(Debug, Default)]
pub struct PipelineRegistryBuilder {
    flows: BTreeMap<PipelineKind, Vec<StepSpec>>,
}

impl PipelineRegistryBuilder {
    /// Declares the ordered steps of a kind, replacing any previous declaration.
    #[must_use]
    pub fn flow(mut self, kind: PipelineKind, steps: impl IntoIterator<Item = StepSpec>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(position, mut step)| {
                step.index = StepIndex::new(u32::try_from(position).unwrap_or(u32::MAX));
                step
            })
            .collect();
        self.flows.insert(kind, steps);
        self
    }

    /// Validates and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns the first problem found in any flow.
    pub fn build(self) -> Result<PipelineRegistry, RegistryError> {
        for (kind, steps) in &self.flows {
            validate_flow(*kind, steps)?;
        }
        Ok(PipelineRegistry { flows: self.flows })
    }
}

fn validate_flow(kind: PipelineKind, steps: &[StepSpec]) -> Result<(), RegistryError> {
    if steps.is_empty() {
        return Err(RegistryError::new("REGISTRY-EMPTY", kind, "flow declares no steps"));
    }

    let mut names = HashSet::new();
    let mut produced: HashSet<&str> = HashSet::new();

    for step in steps {
        if !names.insert(step.name.as_str()) {
            return Err(RegistryError::new(
                "REGISTRY-DUPLICATE",
                kind,
                format!("step name '{}' is declared twice", step.name),
            )
            .at_step(step.index));
        }

        let keys = step.consumed_keys().chain(step.produces.iter().map(String::as_str));
        for key in keys {
            if !is_valid_key(key) {
                return Err(RegistryError::new(
                    "REGISTRY-KEY",
                    kind,
                    format!("step '{}' uses malformed artifact key '{key}'", step.name),
                )
                .at_step(step.index));
            }
        }

        for input in &step.consumes {
            if step.produces.contains(&input.key) {
                return Err(RegistryError::new(
                    "REGISTRY-SELF",
                    kind,
                    format!("step '{}' consumes its own output '{}'", step.name, input.key),
                )
                .at_step(step.index));
            }
            if !produced.contains(input.key.as_str()) && input.fallbacks.is_empty() {
                return Err(RegistryError::new(
                    "REGISTRY-UNRESOLVED",
                    kind,
                    format!(
                        "step '{}' consumes '{}' which no earlier step produces",
                        step.name, input.key
                    ),
                )
                .at_step(step.index));
            }
        }

        produced.extend(step.produces.iter().map(String::as_str));
    }
    Ok(())
}

/// Artifact keys are lowercase snake_case identifiers.
fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
