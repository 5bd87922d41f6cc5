//! Event sink trait and implementations.

use parking_lot::RwLock;
use tracing::{debug, error, info, warn, Level};

use super::RunEvent;
use crate::context::TraceLevel;
use crate::core::StepStatus;

/// Trait for sinks receiving the status channel of a run.
///
/// The executor owns no presentation logic: progress bars, consoles or
/// reports are built on top of a sink.
pub trait EventSink: Send + Sync {
    /// Receives an event. Must not fail.
    fn emit(&self, event: &RunEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &RunEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level for status events.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub const fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_status(&self, step: &str, scope: &[String], status: StepStatus) {
        let scope = scope.join(" ► ");
        if self.level == Level::DEBUG {
            debug!(step = %step, scope = %scope, status = %status, "Step {}", status);
        } else {
            info!(step = %step, scope = %scope, status = %status, "Step {}", status);
        }
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::Started {
                title,
                run_id,
                summary,
                ..
            } => {
                info!(recipe = %title, run_id = %run_id, summary = %summary, "Recipe started");
            }
            RunEvent::Status {
                step,
                scope,
                status,
                ..
            } => self.log_status(step, scope, *status),
            RunEvent::Failure {
                step,
                kind,
                breadcrumb,
                message,
            } => {
                warn!(
                    step = %step,
                    kind = %kind,
                    breadcrumb = %breadcrumb.join(" » "),
                    "{}", message
                );
            }
            RunEvent::Trace(entry) => match entry.level {
                TraceLevel::Debug => debug!(trace = true, "{}", entry.text),
                TraceLevel::Info => info!(trace = true, "{}", entry.text),
                TraceLevel::Warning => warn!(trace = true, "{}", entry.text),
                TraceLevel::Error => error!(trace = true, "{}", entry.text),
            },
            RunEvent::Finished {
                title,
                run_id,
                summary,
                outcome,
                ..
            } => {
                info!(
                    recipe = %title,
                    run_id = %run_id,
                    summary = %summary,
                    outcome = %outcome,
                    "Recipe finished"
                );
            }
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of a given type, e.g. `"step.status"`.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Returns the status transitions reported for a step title, in order.
    #[must_use]
    pub fn statuses(&self, step_title: &str) -> Vec<StepStatus> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::Status { step, status, .. } if step == step_title => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Returns the text of every flushed trace line.
    #[must_use]
    pub fn traces(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::Trace(entry) => Some(entry.text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns every failure event.
    #[must_use]
    pub fn failures(&self) -> Vec<RunEvent> {
        self.events_of_type("step.failure")
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn failure() -> RunEvent {
        RunEvent::Failure {
            step: "EchoStep(x)".to_string(),
            kind: ErrorKind::Assertion,
            breadcrumb: vec!["Section".to_string()],
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(&failure());
        // Should not panic
    }

    #[test]
    fn test_logging_sink() {
        let sink = LoggingEventSink::default();
        sink.emit(&RunEvent::status("s", &[], StepStatus::Ok));
        sink.emit(&failure());
        LoggingEventSink::debug().emit(&RunEvent::status("s", &[], StepStatus::Skipped));
        // Should not panic
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&RunEvent::status("a", &[], StepStatus::InProgress));
        sink.emit(&RunEvent::status("a", &[], StepStatus::Ok));
        sink.emit(&failure());

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.statuses("a"), vec![StepStatus::InProgress, StepStatus::Ok]);
        assert_eq!(sink.failures().len(), 1);
        assert_eq!(sink.events_of_type("step.status").len(), 2);
    }

    #[test]
    fn test_collecting_sink_clear() {
        let sink = CollectingEventSink::new();
        sink.emit(&failure());
        assert_eq!(sink.len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
