//! Run configuration.

use serde::{Deserialize, Serialize};

/// When steps and resources are closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseTiming {
    /// Once, when the run completes or fails.
    #[default]
    RunEnd,
    /// After every top-level step, and again at the end of the run.
    EachStep,
}

/// Logging setup used by [`crate::observability::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `"stepflow=debug"`.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

/// Configuration for a recipe run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// When steps and resources are closed.
    #[serde(default)]
    pub close_timing: CloseTiming,
    /// Flush the trace log to the event sink after each steps-list.
    #[serde(default = "default_flush_traces")]
    pub flush_traces: bool,
    /// Logging setup.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_flush_traces() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            close_timing: CloseTiming::default(),
            flush_traces: default_flush_traces(),
            log: LogConfig::default(),
        }
    }
}

impl RunConfig {
    /// Creates a new run configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the close timing.
    #[must_use]
    pub const fn with_close_timing(mut self, timing: CloseTiming) -> Self {
        self.close_timing = timing;
        self
    }

    /// Enables or disables trace flushing.
    #[must_use]
    pub const fn with_flush_traces(mut self, flush: bool) -> Self {
        self.flush_traces = flush;
        self
    }

    /// Sets the logging setup.
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}
