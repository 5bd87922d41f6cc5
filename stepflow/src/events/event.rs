//! Events produced while a recipe runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::context::TraceEntry;
use crate::core::StepStatus;
use crate::errors::ErrorKind;

/// Counts shown at the start and end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of containers.
    pub sections: usize,
    /// Number of steps, containers and callbacks included.
    pub steps: usize,
    /// Number of declared resources.
    pub resources: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sections, {} steps, {} resources",
            self.sections, self.steps, self.resources
        )
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every list ran to completion (assertions and short-circuits included).
    Completed,
    /// A requirement failed and the run stopped early.
    Stopped,
    /// A fatal error ended the run.
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An event on the status channel of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// The run is about to execute its top-level steps.
    #[serde(rename = "run.started")]
    Started {
        /// Recipe title.
        title: String,
        /// Run id.
        run_id: Uuid,
        /// Counts before the run.
        summary: RunSummary,
        /// When the run started.
        timestamp: DateTime<Utc>,
    },

    /// A step changed status.
    #[serde(rename = "step.status")]
    Status {
        /// Step title.
        step: String,
        /// Enclosing container titles and iteration keys, outer first.
        scope: Vec<String>,
        /// The new status.
        status: StepStatus,
        /// Time spent, for terminal statuses.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<f64>,
    },

    /// An assertion, requirement or fatal error surfaced.
    #[serde(rename = "step.failure")]
    Failure {
        /// Step description, `Name(title)`.
        step: String,
        /// Failure classification.
        kind: ErrorKind,
        /// Steps the failure passed through, outer first.
        breadcrumb: Vec<String>,
        /// Failure message.
        message: String,
    },

    /// A trace line flushed by the executor.
    #[serde(rename = "trace")]
    Trace(TraceEntry),

    /// The run ended.
    #[serde(rename = "run.finished")]
    Finished {
        /// Recipe title.
        title: String,
        /// Run id.
        run_id: Uuid,
        /// Counts after the run.
        summary: RunSummary,
        /// How the run ended.
        outcome: RunOutcome,
        /// When the run ended.
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    /// Returns the event type, e.g. `"step.status"`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "run.started",
            Self::Status { .. } => "step.status",
            Self::Failure { .. } => "step.failure",
            Self::Trace(_) => "trace",
            Self::Finished { .. } => "run.finished",
        }
    }

    /// Creates a status event.
    #[must_use]
    pub fn status(step: impl Into<String>, scope: &[String], status: StepStatus) -> Self {
        Self::Status {
            step: step.into(),
            scope: scope.to_vec(),
            status,
            duration_ms: None,
        }
    }

    /// Sets the duration of a status event.
    #[must_use]
    pub fn with_duration(mut self, elapsed_ms: f64) -> Self {
        if let Self::Status { duration_ms, .. } = &mut self {
            *duration_ms = Some(elapsed_ms);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_event_serialization() {
        let event = RunEvent::status("EchoStep", &["Section".to_string()], StepStatus::Ok)
            .with_duration(1.5);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "step.status",
                "step": "EchoStep",
                "scope": ["Section"],
                "status": "ok",
                "duration_ms": 1.5,
            })
        );
        assert_eq!(event.event_type(), "step.status");
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            sections: 1,
            steps: 4,
            resources: 2,
        };
        assert_eq!(summary.to_string(), "1 sections, 4 steps, 2 resources");
    }
}
