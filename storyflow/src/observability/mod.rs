//! Tracing subscriber setup.
//!
//! Components log through `tracing` macros with structured fields; the host
//! application installs a subscriber once at startup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingOptions {
    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub default_filter: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Whether span enter/exit is logged.
    #[serde(default)]
    pub log_spans: bool,
}

fn default_filter() -> String {
    "storyflow=info".to_string()
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            default_filter: default_filter(),
            format: LogFormat::default(),
            log_spans: false,
        }
    }
}

impl TracingOptions {
    /// Uses JSON output.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_filter(mut self, directive: impl Into<String>) -> Self {
        self.default_filter = directive.into();
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Installs the global subscriber.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(options: &TracingOptions) -> bool {
    use tracing_subscriber::fmt::format::FmtSpan;

    let spans = if options.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(options.env_filter())
        .with_span_events(spans)
        .with_target(true);

    match options.format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: TracingOptions = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(options.format, LogFormat::Json);
        assert_eq!(options.default_filter, "storyflow=info");
        assert!(!options.log_spans);
    }

    #[test]
    fn test_init_is_idempotent() {
        let options = TracingOptions::default().with_filter("storyflow=debug");
        let first = init_tracing(&options);
        assert!(!init_tracing(&options.json()) || !first);
    }
}
