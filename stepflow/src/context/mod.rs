//! Run-scoped state shared with steps.
//!
//! This module provides:
//! - [`Storage`], the nested key/value namespace of a run
//! - [`TraceLog`], diagnostic lines appended by steps
//! - [`RunContext`], which owns the state of one run
//! - [`StepContext`], the view of it handed to each step invocation

mod storage;
mod trace;

pub use storage::{Storage, StorageMut, PARAMS_KEY};
pub use trace::{TraceEntry, TraceLevel, TraceLog};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::Message;
use crate::errors::StepError;
use crate::resources::{ResourceFactory, Resources};
use crate::template::TemplateNamespace;

/// The state of one recipe run.
#[derive(Debug)]
pub struct RunContext {
    title: String,
    run_id: Uuid,
    storage: Storage,
    resources: Resources,
    resource_factory: ResourceFactory,
    traces: TraceLog,
}

impl RunContext {
    /// Creates a fresh run context with a generated run id.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            run_id: Uuid::new_v4(),
            storage: Storage::new(),
            resources: Resources::new(),
            resource_factory: ResourceFactory::new(),
            traces: TraceLog::new(),
        }
    }

    /// Sets the factory used to create declared resources.
    #[must_use]
    pub fn with_resource_factory(mut self, factory: ResourceFactory) -> Self {
        self.resource_factory = factory;
        self
    }

    /// Returns the recipe title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the run storage.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Returns the resource registry.
    #[must_use]
    pub const fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Returns the resource factory.
    #[must_use]
    pub const fn resource_factory(&self) -> &ResourceFactory {
        &self.resource_factory
    }

    /// Returns the trace log.
    #[must_use]
    pub const fn traces(&self) -> &TraceLog {
        &self.traces
    }

    /// Builds the template namespace for a step receiving `input`.
    #[must_use]
    pub fn namespace(&self, input: &Message) -> TemplateNamespace {
        TemplateNamespace::new(input.to_value(), Value::Object(self.storage.as_map()))
    }

    pub(crate) fn seed_params(&self, params: Map<String, Value>) -> Result<(), StepError> {
        self.storage.set(PARAMS_KEY, Value::Object(params))
    }
}

/// The view of a run handed to a single step invocation.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    run: &'a RunContext,
    step: &'a str,
    writes_storage: bool,
}

impl<'a> StepContext<'a> {
    /// Creates a step context.
    ///
    /// `writes_storage` grants access to [`StepContext::storage_mut`].
    #[must_use]
    pub const fn new(run: &'a RunContext, step: &'a str, writes_storage: bool) -> Self {
        Self {
            run,
            step,
            writes_storage,
        }
    }

    /// Returns the title of the running step.
    #[must_use]
    pub const fn step_title(&self) -> &str {
        self.step
    }

    /// Returns the recipe title.
    #[must_use]
    pub fn recipe_title(&self) -> &str {
        self.run.title()
    }

    /// Returns the run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run.run_id()
    }

    /// Returns read access to the run storage.
    #[must_use]
    pub const fn storage(&self) -> &'a Storage {
        self.run.storage()
    }

    /// Returns write access to the run storage.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless the running step declares the
    /// storage-write capability.
    pub fn storage_mut(&self) -> Result<StorageMut<'a>, StepError> {
        if self.writes_storage {
            Ok(StorageMut::new(self.run.storage()))
        } else {
            Err(StepError::validation(format!(
                "{} does not declare the storage-write capability",
                self.step
            )))
        }
    }

    /// Returns the resource registry.
    #[must_use]
    pub const fn resources(&self) -> &'a Resources {
        self.run.resources()
    }

    /// Returns the resource factory.
    #[must_use]
    pub const fn resource_factory(&self) -> &'a ResourceFactory {
        self.run.resource_factory()
    }

    /// Appends a trace line to the run.
    pub fn add_trace(&self, text: impl Into<String>, level: TraceLevel) {
        self.run.traces().add(text, level);
    }
}
