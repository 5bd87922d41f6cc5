//! Test assertions over the status channel.

use crate::core::StepStatus;
use crate::events::CollectingEventSink;

use super::RecordingStep;

/// Asserts the ordered status transitions reported for a step title.
pub fn assert_statuses(sink: &CollectingEventSink, step: &str, expected: &[StepStatus]) {
    let actual = sink.statuses(step);
    assert_eq!(
        actual, expected,
        "Expected statuses {expected:?} for '{step}', got {actual:?}"
    );
}

/// Asserts that a step was reported as skipped and nothing else.
pub fn assert_skipped(sink: &CollectingEventSink, step: &str) {
    assert_statuses(sink, step, &[StepStatus::Skipped]);
}

/// Asserts the number of surfaced failures.
pub fn assert_failure_count(sink: &CollectingEventSink, expected: usize) {
    let failures = sink.failures();
    assert_eq!(
        failures.len(),
        expected,
        "Expected {expected} reported failures, got {failures:?}"
    );
}

/// Asserts how many times a recording step was invoked.
pub fn assert_invocations(step: &RecordingStep, expected: usize) {
    assert_eq!(
        step.call_count(),
        expected,
        "Expected {expected} invocations, got inputs {:?}",
        step.inputs()
    );
}
