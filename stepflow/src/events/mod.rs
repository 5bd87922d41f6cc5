//! The status channel of a run.
//!
//! The executor reports every step transition, surfaced failure and
//! flushed trace line as a [`RunEvent`] to an [`EventSink`].

mod event;
mod sink;

pub use event::{RunEvent, RunOutcome, RunSummary};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
