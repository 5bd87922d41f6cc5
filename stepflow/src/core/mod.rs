//! Core types for stepflow.
//!
//! This module contains the fundamental types used throughout the framework:
//! - [`Message`] - The data envelope exchanged between steps
//! - [`StepStatus`] - Reported status of a step
//! - [`StepKind`] - Dispatch kind of a recipe node

mod message;
mod status;

pub use message::Message;
pub use status::{StepKind, StepStatus};
