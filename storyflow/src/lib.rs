//! # Storyflow
//!
//! Resumable, checkpointed orchestration of collaborator pipelines for a
//! narrative simulation.
//!
//! A simulation advances through long-running multi-step pipelines (new
//! game setup, segment transitions, end of day). Each step calls an
//! external collaborator, usually an AI model, and persists what it
//! produces. Storyflow provides:
//!
//! - **Checkpointed steps**: every step persists its artifacts, then its
//!   step pointer, so an interrupted run resumes at a step boundary
//! - **Fallback hydration**: missing inputs are rebuilt from the game
//!   snapshot or an earlier session's artifacts
//! - **Session generations**: late results from a superseded session are
//!   dropped instead of overwriting fresh state
//! - **Tab leadership**: of several tabs on one save, exactly one writes
//! - **Manual retry**: failures are recorded per step and wait for the user
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use storyflow::prelude::*;
//!
//! let collaborators = CollaboratorRegistry::new()
//!     .with("relationship_analyst", Arc::new(RelationshipAnalyst::new()));
//!
//! let orchestrator = Orchestrator::builder(OrchestratorConfig::new())
//!     .collaborators(collaborators)
//!     .snapshot(game_state)
//!     .build()?;
//!
//! let outcome = orchestrator.start_new_run(PipelineKind::EndOfDay).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bucket;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod leadership;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod session;
pub mod store;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bucket::{BucketStore, BucketUpdate, ContextHandle, PipelineBucket};
    pub use crate::collaborators::{
        Collaborator, CollaboratorRegistry, CollaboratorRequest, CollaboratorResponse,
        CollaboratorSignal, FnCollaborator, StepSignals,
    };
    pub use crate::config::{AutoResumePolicy, OrchestratorConfig};
    pub use crate::core::{PipelineKind, RunStatus, StepIndex};
    pub use crate::errors::{
        CollaboratorError, HydrationError, ImportError, LeadershipConflict, RegistryError,
        StaleSessionDrop, StoreError, StoryflowError, WriteRefused,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{RetryScope, RunOutcome, StepExecutor};
    pub use crate::leadership::{BusHub, LeadershipMonitor, LeadershipState, TabBus};
    pub use crate::orchestrator::{ExportBundle, Orchestrator};
    pub use crate::registry::{Fallback, InputSpec, PipelineRegistry, StepSpec};
    pub use crate::retry::{BackoffPolicy, Countdown, CountdownController, RetryController};
    pub use crate::session::{Generation, SessionGuard};
    pub use crate::store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
}
