//! Error types for the stepflow engine.
//!
//! Steps fail with a [`StepError`], whose variant decides how far the
//! failure travels: assertions abort the current list, requirements stop
//! the run cleanly, and validation or execution errors surface to the
//! caller of [`crate::recipe::Recipe::execute`] as a [`RecipeError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A soft data-quality check failed.
    Assertion,
    /// A hard data-quality check failed, or a template variable is undefined.
    Requirement,
    /// A step was misconfigured.
    Validation,
    /// Any other runtime failure.
    Execution,
    /// The stop-processing-siblings signal.
    ShortCircuit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion => write!(f, "assertion"),
            Self::Requirement => write!(f, "requirement"),
            Self::Validation => write!(f, "validation"),
            Self::Execution => write!(f, "execution"),
            Self::ShortCircuit => write!(f, "short_circuit"),
        }
    }
}

/// A data-quality failure with the breadcrumb of steps it passed through.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Failure {
    /// The failure message.
    pub message: String,
    /// Step titles from outermost to innermost.
    #[serde(default)]
    pub stack: Vec<String>,
    /// Set once the failure has been surfaced on the status channel.
    #[serde(skip)]
    pub(crate) reported: bool,
}

impl Failure {
    /// Creates a failure with an empty stack.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            reported: false,
        }
    }

    /// Records an enclosing step, keeping the stack ordered outer-to-inner.
    pub fn push_outer(&mut self, title: impl Into<String>) {
        self.stack.insert(0, title.into());
    }

    /// Returns the stack joined as a human-readable breadcrumb.
    #[must_use]
    pub fn breadcrumb(&self) -> String {
        self.stack.join(" » ")
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stack.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.breadcrumb(), self.message)
        }
    }
}

/// The error type returned by a step.
#[derive(Debug, Error)]
pub enum StepError {
    /// A soft check failed; the current steps-list is aborted.
    #[error("assertion failed: {0}")]
    Assertion(Failure),

    /// A hard check failed; the whole run stops cleanly.
    #[error("requirement failed: {0}")]
    Requirement(Failure),

    /// The step was misconfigured.
    #[error("validation error: {0}")]
    Validation(String),

    /// A runtime failure.
    #[error("execution error: {0}")]
    Execution(String),

    /// Skip the remaining steps of the current list.
    #[error("short-circuit")]
    ShortCircuit,

    /// A failure whose cause the engine does not recognize.
    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl StepError {
    /// Creates an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(Failure::new(message))
    }

    /// Creates a requirement failure.
    #[must_use]
    pub fn requirement(message: impl Into<String>) -> Self {
        Self::Requirement(Failure::new(message))
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Assertion(_) => ErrorKind::Assertion,
            Self::Requirement(_) => ErrorKind::Requirement,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Execution(_) | Self::Unexpected(_) => ErrorKind::Execution,
            Self::ShortCircuit => ErrorKind::ShortCircuit,
        }
    }

    /// Returns true if the error terminates the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Execution(_) | Self::Unexpected(_)
        )
    }

    /// Returns the data-quality failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Assertion(f) | Self::Requirement(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the data-quality failure mutably, if any.
    pub fn failure_mut(&mut self) -> Option<&mut Failure> {
        match self {
            Self::Assertion(f) | Self::Requirement(f) => Some(f),
            _ => None,
        }
    }
}

/// The error type returned by a recipe run.
#[derive(Debug, Error)]
pub enum RecipeError {
    /// The run parameters could not be resolved.
    #[error("failed to resolve the run parameters: {0}")]
    Params(#[source] StepError),

    /// A step failed with a fatal error.
    #[error("error executing the step {step}: {source}")]
    Step {
        /// Description of the offending step, `Name(title)`.
        step: String,
        /// The underlying step error.
        #[source]
        source: StepError,
    },

    /// Releasing steps or resources failed at the end of the run.
    #[error("error closing the recipe: {0}")]
    Close(#[source] StepError),
}

impl RecipeError {
    /// Returns the underlying step error.
    #[must_use]
    pub const fn step_error(&self) -> &StepError {
        match self {
            Self::Params(e) | Self::Close(e) => e,
            Self::Step { source, .. } => source,
        }
    }

    /// Returns the classification of the underlying step error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.step_error().kind()
    }
}
