//! The run aggregate: a titled list of top-level steps plus the state they share.
//!
//! A [`Recipe`] is prepared with its parameters, then executed once:
//!
//! ```rust,ignore
//! use stepflow::prelude::*;
//!
//! let mut recipe = Recipe::new(
//!     "hello",
//!     vec![EchoStep::new("Hello {{ storage.params.dest }}!").into()],
//! );
//! recipe.prepare(serde_json::Map::from_iter([("dest".to_string(), "world".into())]))?;
//! assert_eq!(recipe.bake()?, "Hello world!");
//! ```

#[cfg(test)]
mod integration_tests;

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::context::{RunContext, Storage};
use crate::core::Message;
use crate::errors::{RecipeError, StepError};
use crate::events::{EventSink, NoOpEventSink, RunEvent, RunOutcome, RunSummary};
use crate::executor::Executor;
use crate::resources::{ResourceFactory, Resources};
use crate::steps::{count_steps, Node};

/// The parameters a recipe is prepared with.
#[derive(Debug, Clone, Default)]
pub enum Params {
    /// No parameters, i.e. an empty mapping.
    #[default]
    None,
    /// A literal mapping.
    Mapping(Map<String, Value>),
    /// A step whose output is the mapping, e.g. a settings file reader.
    Step(Node),
}

impl From<Map<String, Value>> for Params {
    fn from(params: Map<String, Value>) -> Self {
        Self::Mapping(params)
    }
}

impl From<Option<Map<String, Value>>> for Params {
    fn from(params: Option<Map<String, Value>>) -> Self {
        params.map_or(Self::None, Self::Mapping)
    }
}

impl From<Node> for Params {
    fn from(step: Node) -> Self {
        Self::Step(step)
    }
}

/// An ordered collection of steps run against one [`RunContext`].
pub struct Recipe {
    steps: Vec<Node>,
    run: RunContext,
    sink: Arc<dyn EventSink>,
    config: RunConfig,
    prepared: bool,
}

impl Recipe {
    /// Creates a recipe with a fresh run context.
    #[must_use]
    pub fn new(title: impl Into<String>, steps: Vec<Node>) -> Self {
        Self {
            steps,
            run: RunContext::new(title),
            sink: Arc::new(NoOpEventSink),
            config: RunConfig::default(),
            prepared: false,
        }
    }

    /// Appends a top-level step.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<Node>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Sets the sink receiving the status channel.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the factory used by resource declarations.
    #[must_use]
    pub fn with_resource_factory(mut self, factory: ResourceFactory) -> Self {
        self.run = self.run.with_resource_factory(factory);
        self
    }

    /// Sets the run configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the recipe title.
    #[must_use]
    pub fn title(&self) -> &str {
        self.run.title()
    }

    /// Returns the run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run.run_id()
    }

    /// Returns the run storage.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        self.run.storage()
    }

    /// Returns the declared resources.
    #[must_use]
    pub const fn resources(&self) -> &Resources {
        self.run.resources()
    }

    /// Returns the top-level steps.
    #[must_use]
    pub fn steps(&self) -> &[Node] {
        &self.steps
    }

    /// Counts the sections, steps and declared resources of the recipe.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let (sections, steps) = count_steps(&self.steps);
        RunSummary {
            sections,
            steps,
            resources: self.run.resources().len(),
        }
    }

    /// Resolves the run parameters and stores them under `storage.params`.
    ///
    /// A parameter step runs on its own, with no status reporting, and must
    /// produce a mapping or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::Params`] when the parameter step fails or
    /// produces anything but a mapping.
    pub fn prepare(&mut self, params: impl Into<Params>) -> Result<&mut Self, RecipeError> {
        let params = match params.into() {
            Params::None => Map::new(),
            Params::Mapping(params) => params,
            Params::Step(step) => self.resolve_params(&step)?,
        };
        self.run.seed_params(params).map_err(RecipeError::Params)?;
        self.prepared = true;
        Ok(self)
    }

    fn resolve_params(&self, step: &Node) -> Result<Map<String, Value>, RecipeError> {
        let sink = NoOpEventSink;
        let executor = Executor::new(&self.run, &sink, &self.config);
        let output = executor
            .execute_steps(std::slice::from_ref(step), Message::Empty)
            .map_err(RecipeError::Params)?;
        match output {
            Message::Mapping(params) => Ok(params),
            Message::Empty => Ok(Map::new()),
            other => Err(RecipeError::Params(StepError::validation(format!(
                "{} must produce a mapping of parameters, got: {other}",
                step.describe()
            )))),
        }
    }

    /// Runs every top-level step in order and returns the last output.
    ///
    /// The top-level steps receive the parameters mapping as their first
    /// input. A failed requirement stops the run cleanly and yields the
    /// output of the last completed top-level step. Steps and resources are
    /// closed whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RecipeError::Step`] for a fatal step error and
    /// [`RecipeError::Close`] when closing fails after an otherwise
    /// successful run.
    pub fn execute(&mut self) -> Result<Message, RecipeError> {
        if !self.prepared {
            self.prepare(Params::None)?;
        }

        let span = info_span!("recipe", title = %self.title(), run_id = %self.run_id());
        let _guard = span.enter();

        let started = self.summary();
        info!(summary = %started, "Starting recipe");
        self.sink.emit(&RunEvent::Started {
            title: self.title().to_string(),
            run_id: self.run_id(),
            summary: started,
            timestamp: Utc::now(),
        });

        let input = Message::Mapping(self.run.storage().params());
        let executor = Executor::new(&self.run, self.sink.as_ref(), &self.config);
        let (mut outcome, result) = match executor.execute_steps(&self.steps, input) {
            Ok(output) => (RunOutcome::Completed, Ok(output)),
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "Recipe stopped early");
                (RunOutcome::Stopped, Ok(executor.last_output()))
            }
            Err(source) => {
                let step = executor
                    .failed_step()
                    .unwrap_or_else(|| self.title().to_string());
                (RunOutcome::Failed, Err(RecipeError::Step { step, source }))
            }
        };

        let closed = self.close();
        if closed.is_err() && outcome == RunOutcome::Completed {
            outcome = RunOutcome::Failed;
        }

        let finished = self.summary();
        info!(summary = %finished, %outcome, "Recipe finished");
        self.sink.emit(&RunEvent::Finished {
            title: self.title().to_string(),
            run_id: self.run_id(),
            summary: finished,
            outcome,
            timestamp: Utc::now(),
        });

        match (result, closed) {
            (Ok(_), Err(e)) => Err(RecipeError::Close(e)),
            (result, _) => result,
        }
    }

    /// Executes the recipe and returns the raw value of its output.
    ///
    /// # Errors
    ///
    /// See [`Recipe::execute`].
    pub fn bake(&mut self) -> Result<Value, RecipeError> {
        self.execute().map(Message::into_value)
    }

    /// Closes every top-level step, then every declared resource.
    ///
    /// Every close is attempted; the first error is returned.
    fn close(&self) -> Result<(), StepError> {
        let mut first_error = None;
        for node in &self.steps {
            if let Err(e) = node.close() {
                warn!(step = %node.title(), error = %e, "Failed to close step");
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.run.resources().close_all() {
            warn!(error = %e, "Failed to close resources");
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Recipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recipe")
            .field("title", &self.title())
            .field("run_id", &self.run_id())
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
