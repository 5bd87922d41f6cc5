//! Diagnostic trace lines appended by steps during a run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StepError;

/// Severity of a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// Verbose diagnostics.
    Debug,
    /// Informational output.
    #[default]
    Info,
    /// Something looks wrong.
    Warning,
    /// Something failed.
    Error,
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for TraceLevel {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(StepError::validation(format!("unknown trace level '{other}'"))),
        }
    }
}

/// A single trace line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// The severity.
    pub level: TraceLevel,
    /// The text.
    pub text: String,
    /// When the line was recorded.
    pub timestamp: DateTime<Utc>,
}

/// An ordered log of trace lines, flushed by the executor.
#[derive(Debug, Default)]
pub struct TraceLog {
    entries: Mutex<Vec<TraceEntry>>,
}

impl TraceLog {
    /// Creates an empty trace log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line.
    pub fn add(&self, text: impl Into<String>, level: TraceLevel) {
        self.entries.lock().push(TraceEntry {
            level,
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    /// Returns a copy of the pending lines.
    #[must_use]
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.lock().clone()
    }

    /// Removes and returns every pending line.
    pub fn drain(&self) -> Vec<TraceEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Returns the number of pending lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_drain_preserves_order() {
        let log = TraceLog::new();
        log.add("first", TraceLevel::Info);
        log.add("second", TraceLevel::Error);

        let drained = log.drain();
        let texts: Vec<_> = drained.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(drained[1].level, TraceLevel::Error);
        assert!(log.is_empty());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARN".parse::<TraceLevel>().unwrap(), TraceLevel::Warning);
        assert_eq!("info".parse::<TraceLevel>().unwrap(), TraceLevel::Info);
        assert!("loud".parse::<TraceLevel>().is_err());
    }
}
