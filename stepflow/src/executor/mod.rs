//! The recursive interpreter walking a recipe tree.
//!
//! The executor threads a [`Message`] through a list of [`Node`]s and
//! applies the recovery policy of each failure kind:
//!
//! - an assertion aborts the rest of the current list, whose caller
//!   carries on with the last good output
//! - a short-circuit marks the rest of the current list as skipped
//! - requirements and fatal errors propagate to the caller
//!
//! Failures are reported once, at the nesting level where they originate,
//! with a breadcrumb of the containers, iterations and callbacks they
//! passed through.


use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::{CloseTiming, RunConfig};
use crate::context::{RunContext, StepContext};
use crate::core::{Message, StepStatus};
use crate::errors::StepError;
use crate::events::{EventSink, RunEvent};
use crate::observability::SpanTimer;
use crate::steps::{IterableStepContainer, Node, Step, StepContainer};
use crate::template::TemplateRenderer;

/// Container titles and iteration keys enclosing a step, outer first.
#[derive(Debug, Clone, Default)]
struct Scope {
    path: Vec<String>,
}

impl Scope {
    fn child(&self, segment: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(segment.into());
        Self { path }
    }

    fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

/// The result of running a steps-list to its end or to an assertion.
#[derive(Debug)]
struct ListOutcome {
    output: Message,
    aborted: bool,
}

/// Runs recipe trees against a [`RunContext`].
pub struct Executor<'r> {
    run: &'r RunContext,
    sink: &'r dyn EventSink,
    config: &'r RunConfig,
    checkpoint: Mutex<Message>,
    failed_step: Mutex<Option<String>>,
}

impl<'r> Executor<'r> {
    /// Creates an executor reporting to `sink`.
    #[must_use]
    pub fn new(run: &'r RunContext, sink: &'r dyn EventSink, config: &'r RunConfig) -> Self {
        Self {
            run,
            sink,
            config,
            checkpoint: Mutex::new(Message::Empty),
            failed_step: Mutex::new(None),
        }
    }

    /// Runs a list of nodes in order and returns the last output.
    ///
    /// Assertions and short-circuits are resolved inside the list.
    ///
    /// # Errors
    ///
    /// Returns requirement failures and fatal errors.
    pub fn execute_steps(&self, steps: &[Node], input: Message) -> Result<Message, StepError> {
        self.run_list(steps, input, &Scope::default(), false, false)
            .map(|outcome| outcome.output)
    }

    /// Runs a single step through its full lifecycle.
    ///
    /// # Errors
    ///
    /// Returns every failure of the step, including assertions and
    /// short-circuits.
    pub fn execute_step<S: Step + ?Sized>(&self, step: &S, input: Message) -> Result<Message, StepError> {
        self.run_step(step, input, &Scope::default(), 0, false)
    }

    /// Returns the output of the last completed top-level node.
    #[must_use]
    pub fn last_output(&self) -> Message {
        self.checkpoint.lock().clone()
    }

    /// Returns `Name(title)` of the step where a fatal error originated.
    #[must_use]
    pub fn failed_step(&self) -> Option<String> {
        self.failed_step.lock().clone()
    }

    /// Emits every pending trace line and clears the log.
    pub fn flush_traces(&self) {
        if !self.config.flush_traces {
            return;
        }
        for entry in self.run.traces().drain() {
            self.sink.emit(&RunEvent::Trace(entry));
        }
    }

    fn run_list(
        &self,
        steps: &[Node],
        input: Message,
        scope: &Scope,
        in_passthrough: bool,
        skip: bool,
    ) -> Result<ListOutcome, StepError> {
        let mut output = input;
        let mut short_circuit = skip;
        let mut aborted = false;

        for node in steps {
            match self.run_node(node, &output, scope, short_circuit) {
                Ok(next) => {
                    if !in_passthrough {
                        output = next;
                    }
                }
                Err(StepError::Assertion(_)) => {
                    debug!(step = %node.title(), "Assertion failed, aborting the remaining steps");
                    aborted = true;
                }
                Err(StepError::ShortCircuit) => {
                    debug!(step = %node.title(), "Short-circuit, skipping the remaining steps");
                    short_circuit = true;
                }
                Err(e) => {
                    self.flush_traces();
                    return Err(e);
                }
            }

            if scope.is_root() {
                *self.checkpoint.lock() = output.clone();
                if self.config.close_timing == CloseTiming::EachStep {
                    if let Err(e) = node.close() {
                        warn!(step = %node.title(), error = %e, "Failed to close step");
                    }
                }
            }
            if aborted {
                break;
            }
        }

        self.flush_traces();
        Ok(ListOutcome { output, aborted })
    }

    fn run_node(&self, node: &Node, input: &Message, scope: &Scope, skip: bool) -> Result<Message, StepError> {
        match node {
            Node::Leaf(step) => self.run_step(step.as_ref(), input.clone(), scope, 0, skip),
            Node::Section(container) => self.run_container(container.as_ref(), input, scope, false, skip),
            Node::Passthrough(container) => self.run_container(container.as_ref(), input, scope, true, skip),
            Node::Iterable(container) => self.run_iterable(container.as_ref(), input, scope, skip),
        }
    }

    fn run_step<S: Step + ?Sized>(
        &self,
        step: &S,
        input: Message,
        scope: &Scope,
        level: usize,
        skip: bool,
    ) -> Result<Message, StepError> {
        if skip {
            self.emit_status(step.title(), scope, StepStatus::Skipped, None);
            return Ok(input);
        }

        let timer = SpanTimer::start(step.title());
        self.emit_status(step.title(), scope, StepStatus::InProgress, None);
        let result = self.invoke(step, input, scope, level);
        self.settle(step, scope, level, timer, result)
    }

    /// Renders the step, processes it and threads the output through its callbacks.
    fn invoke<S: Step + ?Sized>(
        &self,
        step: &S,
        input: Message,
        scope: &Scope,
        level: usize,
    ) -> Result<Message, StepError> {
        if step.templated().is_empty() {
            return self.process(step, input, scope, level);
        }

        let namespace = self.run.namespace(&input);
        match step.render(&TemplateRenderer::new(&namespace))? {
            Some(rendered) => self.process(rendered.as_ref(), input, scope, level),
            None => self.process(step, input, scope, level),
        }
    }

    fn process<S: Step + ?Sized>(
        &self,
        step: &S,
        input: Message,
        scope: &Scope,
        level: usize,
    ) -> Result<Message, StepError> {
        let ctx = StepContext::new(self.run, step.title(), step.as_storage_writer().is_some());
        let mut output = step.process(input, &ctx)?;

        let callbacks = step.callbacks();
        if callbacks.is_empty() {
            return Ok(output);
        }
        let callback_scope = scope.child(step.title());
        for callback in callbacks {
            output = match callback {
                Node::Leaf(cb) => self.run_step(cb.as_ref(), output, &callback_scope, level + 1, false)?,
                container => self.run_node(container, &output, &callback_scope, false)?,
            };
        }
        Ok(output)
    }

    fn run_container<C: StepContainer + ?Sized>(
        &self,
        container: &C,
        input: &Message,
        scope: &Scope,
        passthrough: bool,
        skip: bool,
    ) -> Result<Message, StepError> {
        let title = container.title();
        let body_scope = scope.child(title);

        if skip {
            self.emit_status(title, scope, StepStatus::Skipped, None);
            self.run_list(container.steps(), input.clone(), &body_scope, passthrough, true)?;
            return Ok(input.clone());
        }

        let timer = SpanTimer::start(title);
        self.emit_status(title, scope, StepStatus::InProgress, None);
        let result = self.run_list(container.steps(), input.clone(), &body_scope, passthrough, false);
        let outcome = self.finish_container(title, scope, timer, result)?;
        Ok(if passthrough { input.clone() } else { outcome })
    }

    fn run_iterable<C: IterableStepContainer + ?Sized>(
        &self,
        container: &C,
        input: &Message,
        scope: &Scope,
        skip: bool,
    ) -> Result<Message, StepError> {
        let title = container.title();
        let body_scope = scope.child(title);

        if skip {
            self.emit_status(title, scope, StepStatus::Skipped, None);
            self.run_list(container.steps(), input.clone(), &body_scope, false, true)?;
            return Ok(input.clone());
        }

        let timer = SpanTimer::start(title);
        self.emit_status(title, scope, StepStatus::InProgress, None);
        let pairs = match self
            .invoke(container, input.clone(), scope, 0)
            .and_then(Message::into_pairs)
        {
            Ok(pairs) => pairs,
            Err(e) => return self.settle(container, scope, 0, timer, Err(e)),
        };

        let mut output = input.clone();
        let mut aborted = false;
        for (key, value) in pairs {
            debug!(container = %title, key = %key, "Iterating");
            let item_scope = body_scope.child(key);
            match self.run_list(container.steps(), Message::from(value), &item_scope, false, false) {
                Ok(outcome) => {
                    aborted |= outcome.aborted;
                    output = outcome.output;
                }
                Err(e) => return self.finish_container(title, scope, timer, Err(e)),
            }
        }
        self.finish_container(title, scope, timer, Ok(ListOutcome { output, aborted }))
    }

    /// Reports the terminal status of a container whose body already
    /// reported its own failures.
    fn finish_container(
        &self,
        title: &str,
        scope: &Scope,
        timer: SpanTimer,
        result: Result<ListOutcome, StepError>,
    ) -> Result<Message, StepError> {
        let elapsed = timer.finish();
        match result {
            Ok(outcome) => {
                let status = if outcome.aborted {
                    StepStatus::Fail
                } else {
                    StepStatus::Ok
                };
                self.emit_status(title, scope, status, Some(elapsed));
                Ok(outcome.output)
            }
            Err(e) => {
                let status = if e.failure().is_some() {
                    StepStatus::Fail
                } else {
                    StepStatus::Error
                };
                self.emit_status(title, scope, status, Some(elapsed));
                Err(e)
            }
        }
    }

    /// Reports the terminal status of a step and surfaces its failure.
    ///
    /// Failures are surfaced at level 0 only, i.e. by the step that sits in
    /// a steps-list rather than in a callback chain.
    fn settle<S: Step + ?Sized>(
        &self,
        step: &S,
        scope: &Scope,
        level: usize,
        timer: SpanTimer,
        result: Result<Message, StepError>,
    ) -> Result<Message, StepError> {
        let elapsed = Some(timer.finish());
        let title = step.title();
        let mut error = match result {
            Ok(output) => {
                self.emit_status(title, scope, StepStatus::Ok, elapsed);
                return Ok(output);
            }
            Err(e) => e,
        };

        let status = match &error {
            StepError::ShortCircuit => StepStatus::Ok,
            StepError::Assertion(_) | StepError::Requirement(_) => StepStatus::Fail,
            _ => StepStatus::Error,
        };
        self.emit_status(title, scope, status, elapsed);

        if let Some(failure) = error.failure_mut() {
            if !failure.reported {
                failure.push_outer(title);
                if level == 0 {
                    for segment in scope.path.iter().rev() {
                        failure.push_outer(segment.clone());
                    }
                    failure.reported = true;
                    self.report(&step.describe(), &error);
                }
            }
        } else if error.is_fatal() {
            let mut failed_step = self.failed_step.lock();
            if failed_step.is_none() {
                *failed_step = Some(step.describe());
                drop(failed_step);
                self.report(&step.describe(), &error);
            }
        }
        Err(error)
    }

    fn report(&self, step: &str, error: &StepError) {
        let (breadcrumb, message) = match error.failure() {
            Some(failure) => (failure.stack.clone(), failure.message.clone()),
            None => (Vec::new(), error.to_string()),
        };
        match error {
            StepError::Assertion(_) => {
                warn!(step = %step, breadcrumb = %breadcrumb.join(" » "), "Failure: {}", message);
            }
            _ => {
                error!(step = %step, breadcrumb = %breadcrumb.join(" » "), "Error: {}", message);
            }
        }
        self.sink.emit(&RunEvent::Failure {
            step: step.to_string(),
            kind: error.kind(),
            breadcrumb,
            message,
        });
    }

    fn emit_status(&self, title: &str, scope: &Scope, status: StepStatus, elapsed_ms: Option<f64>) {
        let event = RunEvent::status(title, &scope.path, status);
        let event = match elapsed_ms {
            Some(ms) => event.with_duration(ms),
            None => event,
        };
        self.sink.emit(&event);
    }
}
