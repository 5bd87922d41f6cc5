//! Step status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The dispatch kind of a node in a recipe tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A plain unit of work.
    Leaf,
    /// A structural group of child steps.
    Section,
    /// A container that runs its body once per element of a sequence.
    Iterable,
    /// A container whose body never changes the value seen downstream.
    Passthrough,
}

impl StepKind {
    /// Returns true for every container kind.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        !matches!(self, Self::Leaf)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::Section => write!(f, "section"),
            Self::Iterable => write!(f, "iterable"),
            Self::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// The reported status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step is running.
    InProgress,
    /// The step completed successfully.
    Ok,
    /// A soft or hard data-quality check failed.
    Fail,
    /// The step errored.
    Error,
    /// The step was skipped after a short-circuit.
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::InProgress
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skipped)
    }
}
