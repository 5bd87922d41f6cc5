//! Mock steps for testing.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::context::StepContext;
use crate::core::Message;
use crate::errors::{ErrorKind, StepError};
use crate::steps::{leaf_step, Step, StepBase};

/// A step that records every input it receives.
///
/// Clones share the same record, so a test can keep one clone and put
/// the other in a recipe.
#[derive(Debug, Clone, Default)]
pub struct RecordingStep {
    base: StepBase,
    output: Option<Value>,
    inputs: Arc<Mutex<Vec<Value>>>,
}

impl RecordingStep {
    /// Creates a step forwarding its input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a step returning a fixed output.
    #[must_use]
    pub fn returning(output: impl Into<Value>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    /// Returns the inputs received so far, in order.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Resets the record.
    pub fn reset(&self) {
        self.inputs.lock().clear();
    }
}

impl Step for RecordingStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        self.inputs.lock().push(input.to_value());
        Ok(match &self.output {
            Some(output) => Message::from(output.clone()),
            None => input,
        })
    }
}

/// A step that always fails with a configured kind.
#[derive(Debug, Clone)]
pub struct FailingStep {
    base: StepBase,
    kind: ErrorKind,
    message: String,
    calls: Arc<Mutex<usize>>,
}

impl FailingStep {
    /// Creates a failing step.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            kind,
            message: message.into(),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

impl Step for FailingStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, _input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        *self.calls.lock() += 1;
        Err(match self.kind {
            ErrorKind::Assertion => StepError::assertion(self.message.clone()),
            ErrorKind::Requirement => StepError::requirement(self.message.clone()),
            ErrorKind::Validation => StepError::validation(self.message.clone()),
            ErrorKind::Execution => StepError::execution(self.message.clone()),
            ErrorKind::ShortCircuit => StepError::ShortCircuit,
        })
    }
}

/// A step that raises the short-circuit signal unconditionally.
#[derive(Debug, Clone, Default)]
pub struct ShortCircuitNow {
    base: StepBase,
}

impl ShortCircuitNow {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Step for ShortCircuitNow {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, _input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        Err(StepError::ShortCircuit)
    }
}

leaf_step!(RecordingStep, FailingStep, ShortCircuitNow);
