//! Orchestrator configuration.

use crate::errors::StoryflowError;
use crate::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// When an automatic resume on load is allowed to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoResumePolicy {
    /// Any persisted error of the kind blocks automatic resume.
    #[default]
    Strict,
    /// Only a `NewGame` error blocks; other kinds retry their failed step
    /// automatically on load.
    Legacy,
}

/// Configuration of an [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Identifier of the save; scopes the leadership bus.
    #[serde(default = "default_save_id")]
    pub save_id: String,
    /// Model passed to collaborators and checked against the context handle.
    #[serde(default = "default_model")]
    pub selected_model: String,
    /// Advisory per-step timeout in seconds; `None` disables it.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: Option<f64>,
    /// Automatic resume policy.
    #[serde(default)]
    pub auto_resume: AutoResumePolicy,
    /// Backoff for rate-limit notices without a recommended wait.
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Location of the file-backed checkpoint store; `None` keeps state in memory.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_save_id() -> String {
    "default".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_step_timeout() -> Option<f64> {
    Some(180.0)
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            save_id: default_save_id(),
            selected_model: default_model(),
            step_timeout_seconds: default_step_timeout(),
            auto_resume: AutoResumePolicy::default(),
            backoff: BackoffPolicy::default(),
            store_path: None,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoryflowError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Sets the save identifier.
    #[must_use]
    pub fn with_save_id(mut self, save_id: impl Into<String>) -> Self {
        self.save_id = save_id.into();
        self
    }

    /// Sets the selected model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.selected_model = model.into();
        self
    }

    /// Sets the advisory step timeout.
    #[must_use]
    pub fn with_step_timeout(mut self, seconds: f64) -> Self {
        self.step_timeout_seconds = Some(seconds);
        self
    }

    /// Disables the advisory step timeout.
    #[must_use]
    pub fn without_step_timeout(mut self) -> Self {
        self.step_timeout_seconds = None;
        self
    }

    /// Sets the automatic resume policy.
    #[must_use]
    pub fn with_auto_resume(mut self, policy: AutoResumePolicy) -> Self {
        self.auto_resume = policy;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the checkpoint file location.
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// The step timeout as a duration, ignoring non-positive values and
    /// values too large to represent.
    #[must_use]
    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_seconds
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.auto_resume, AutoResumePolicy::Strict);
        assert_eq!(config.step_timeout(), Some(Duration::from_secs(180)));
        assert!(config.store_path.is_none());
    }

    #[test]
    fn test_builder() {
        let config = OrchestratorConfig::new()
            .with_save_id("slot-2")
            .with_model("narrator-large")
            .with_auto_resume(AutoResumePolicy::Legacy)
            .without_step_timeout();

        assert_eq!(config.save_id, "slot-2");
        assert_eq!(config.selected_model, "narrator-large");
        assert_eq!(config.auto_resume, AutoResumePolicy::Legacy);
        assert_eq!(config.step_timeout(), None);
        assert_eq!(config.clone().with_step_timeout(-1.0).step_timeout(), None);
        assert_eq!(config.clone().with_step_timeout(1e20).step_timeout(), None);
        assert_eq!(config.clone().with_step_timeout(f64::NAN).step_timeout(), None);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"selected_model": "m2", "auto_resume": "legacy", "backoff": {{"base_delay_ms": 10}}}}"#
        )
        .unwrap();

        let config = OrchestratorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.selected_model, "m2");
        assert_eq!(config.auto_resume, AutoResumePolicy::Legacy);
        assert_eq!(config.backoff.base_delay_ms, 10);
        assert_eq!(config.save_id, "default");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = OrchestratorConfig::from_json_file("/nonexistent/storyflow.json").unwrap_err();
        assert_eq!(err.error_type(), "IoFailure");
    }
}
