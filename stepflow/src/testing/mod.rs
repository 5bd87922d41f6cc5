//! Testing utilities for stepflow recipes.
//!
//! This module provides:
//! - Mock steps that record their inputs or fail on demand
//! - Assertions over the status channel of a run
//! - A harness running one step through the executor

mod assertions;
mod mocks;

pub use assertions::{
    assert_failure_count, assert_invocations, assert_skipped, assert_statuses,
};
pub use mocks::{FailingStep, RecordingStep, ShortCircuitNow};

use crate::config::RunConfig;
use crate::context::RunContext;
use crate::core::Message;
use crate::errors::StepError;
use crate::events::NoOpEventSink;
use crate::executor::Executor;
use crate::steps::Step;

/// Runs a single step against `run`, rendering it and chaining its callbacks.
///
/// # Errors
///
/// Returns every failure of the step unrecovered.
pub fn run_step<S: Step + ?Sized>(
    run: &RunContext,
    step: &S,
    input: impl Into<Message>,
) -> Result<Message, StepError> {
    let sink = NoOpEventSink;
    let config = RunConfig::default();
    Executor::new(run, &sink, &config).execute_step(step, input.into())
}
