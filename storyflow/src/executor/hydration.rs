//! Resolution of a step's consumed artifacts.

use super::{StepAbort, StepExecutor};
use crate::core::PipelineKind;
use crate::errors::{HydrationError, StoreError};
use crate::events;
use crate::registry::{Fallback, InputSpec, StepSpec};
use crate::session::Generation;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

impl StepExecutor {
    /// Reads every consumed artifact, hydrating misses through their fallbacks.
    ///
    /// A hydrated value is persisted under the consumed key before the step
    /// runs, so a retry finds it in the store.
    pub(super) async fn hydrate(
        &self,
        kind: PipelineKind,
        spec: &StepSpec,
        generation: Generation,
    ) -> Result<BTreeMap<String, Value>, StepAbort> {
        let mut inputs = BTreeMap::new();

        for input in &spec.consumes {
            let value = match self.store.get(&input.key).await? {
                Some(value) => value,
                None => {
                    let (value, source) = self
                        .resolve_fallback(input)
                        .await?
                        .ok_or_else(|| HydrationError::new(&spec.name, &input.key))?;

                    self.commit(generation, self.store.put(&input.key, Some(value.clone())))
                        .await??;

                    debug!(key = %input.key, source = ?source, "Hydrated missing input");
                    let mut data = events::step_data(kind, spec.index, &spec.name);
                    data["key"] = json!(input.key);
                    data["source"] = json!(source);
                    self.events.try_emit(events::STEP_HYDRATED, Some(data));
                    value
                }
            };
            inputs.insert(input.key.clone(), value);
        }
        Ok(inputs)
    }

    async fn resolve_fallback<'a>(
        &self,
        input: &'a InputSpec,
    ) -> Result<Option<(Value, &'a Fallback)>, StoreError> {
        for fallback in &input.fallbacks {
            let found = match fallback {
                Fallback::Snapshot { pointer } => self.snapshot.pointer(pointer),
                Fallback::Artifact { key } => self.store.get(key).await?,
            };
            if let Some(value) = found.filter(|value| !value.is_null()) {
                return Ok(Some((value, fallback)));
            }
        }
        Ok(None)
    }
}
