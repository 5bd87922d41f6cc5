//! # Stepflow
//!
//! A declarative, synchronous pipeline runner.
//!
//! A recipe is a tree of steps executed in order, each step transforming the
//! [`core::Message`] produced by the previous one:
//!
//! - **Containers**: sections, per-element iteration and passthrough groups
//! - **Callbacks**: steps chained after a step on its output
//! - **Templating**: step attributes rendered against `inputs` and `storage`
//! - **Recovery**: assertions abort a list, requirements stop the run cleanly,
//!   short-circuits skip the rest of a list
//! - **Status channel**: every status change and failure goes to an
//!   [`events::EventSink`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepflow::prelude::*;
//!
//! let mut recipe = Recipe::new(
//!     "inventory",
//!     vec![
//!         ForEachStep::new([EchoStep::new("host {{ inputs }}").into()])
//!             .with_seq("{{ storage.params.hosts | tojson }}")
//!             .into(),
//!         ValidateStep::assert_not_empty().into(),
//!     ],
//! )
//! .with_event_sink(Arc::new(LoggingEventSink::info()));
//!
//! recipe.prepare(params)?;
//! let output = recipe.bake()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod recipe;
pub mod resources;
pub mod steps;
pub mod template;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::config::{CloseTiming, LogConfig, RunConfig};
    pub use crate::context::{RunContext, StepContext, Storage, TraceLevel};
    pub use crate::core::{Message, StepKind, StepStatus};
    pub use crate::errors::{ErrorKind, Failure, RecipeError, StepError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RunEvent, RunOutcome,
        RunSummary,
    };
    pub use crate::executor::Executor;
    pub use crate::observability::init_logging;
    pub use crate::recipe::{Params, Recipe};
    pub use crate::resources::{DatabaseResource, Resource, ResourceFactory, Resources};
    pub use crate::steps::common::{
        Base64DecodeStep, Base64EncodeStep, DeclareResourceStep, EchoStep, FailStep, LambdaStep,
        ReadFileStep, SaveToStorageStep, ShortCircuitStep, TraceStep,
    };
    pub use crate::steps::db::{DatabasePingStep, DatabaseQueryStep};
    pub use crate::steps::mutate::{FilterStep, MapStep, ReduceStep, SelectSource, SelectStep};
    pub use crate::steps::text::{TextOp, TextStep};
    pub use crate::steps::validate::{Check, Severity, ValidateStep};
    pub use crate::steps::{
        ForEachStep, Node, PassthroughStep, Section, Step, StepBuilder, StepContainer,
    };
}
