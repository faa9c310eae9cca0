//! Core domain model types for storyflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Pipeline kinds and step indices
//! - Run status and persisted step errors

mod kind;
mod run;

pub use kind::{PipelineKind, StepIndex};
pub use run::{RunStatus, StepErrors, StepFailureRecord};
