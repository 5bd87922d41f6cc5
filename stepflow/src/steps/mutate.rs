//! Steps reshaping their input: selection, filtering, mapping and reduction.
//!
//! Filter, map and reduce iterate sequences element by element. Mappings
//! are flattened first: their values are concatenated, lists spread and
//! scalars kept, so `{"a": [1, 2], "b": [3]}` iterates `1, 2, 3`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{leaf_step, Step, StepBase};
use crate::context::StepContext;
use crate::core::Message;
use crate::errors::StepError;
use crate::template::{select_path, TemplateRenderer};

/// Where a [`SelectStep`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectSource {
    /// The step input.
    #[default]
    Input,
    /// The whole run storage.
    Storage,
}

/// Selects a dotted path, e.g. `"hosts[0].name"`, out of its input or the storage.
///
/// A path that resolves to nothing yields an empty message.
#[derive(Debug, Clone)]
pub struct SelectStep {
    base: StepBase,
    expression: String,
    source: SelectSource,
}

impl SelectStep {
    /// Creates a step selecting `expression` from its input.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            expression: expression.into(),
            source: SelectSource::Input,
        }
    }

    /// Sets where to select from.
    #[must_use]
    pub const fn with_source(mut self, source: SelectSource) -> Self {
        self.source = source;
        self
    }
}

impl Step for SelectStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["expression"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            expression: renderer.render_string(&self.expression)?,
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let data = match self.source {
            SelectSource::Input => input.into_value(),
            SelectSource::Storage => Value::Object(ctx.storage().as_map()),
        };
        if data.is_null() {
            return Err(StepError::execution(format!(
                "{} does not have any input data to select '{}' from",
                self.describe(),
                self.expression
            )));
        }
        Ok(select_path(&data, &self.expression).map_or(Message::Empty, Message::from))
    }
}

/// Flattens the input into the elements to iterate.
fn elements(step: &str, input: Message) -> Result<Vec<Value>, StepError> {
    match input.normalize() {
        Message::Sequence(items) => Ok(items),
        Message::Mapping(map) => Ok(map
            .into_iter()
            .flat_map(|(_, value)| match value {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect()),
        Message::Empty => Err(StepError::execution(format!(
            "{step} does not have any input data to mutate"
        ))),
        Message::Value(v) => Err(StepError::execution(format!(
            "object to mutate using {step} is not iterable: {v}"
        ))),
    }
}

fn closure_error(step: &str, error: &anyhow::Error) -> StepError {
    StepError::execution(format!("{step} function failed: {error}"))
}

/// Predicate deciding whether a [`FilterStep`] keeps an element.
pub type FilterFn = Arc<dyn Fn(&Value) -> anyhow::Result<bool> + Send + Sync>;

/// Keeps the elements for which the predicate holds.
#[derive(Clone)]
pub struct FilterStep {
    base: StepBase,
    func: FilterFn,
}

impl FilterStep {
    /// Creates a filter from a predicate.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            base: StepBase::new(),
            func: Arc::new(func),
        }
    }
}

impl Step for FilterStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let mut kept = Vec::new();
        for item in elements(self.name(), input)? {
            if (self.func)(&item).map_err(|e| closure_error(self.name(), &e))? {
                kept.push(item);
            }
        }
        Ok(Message::Sequence(kept))
    }
}

/// Transformation applied by a [`MapStep`].
pub type MapFn = Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// Replaces every element with the result of a function.
#[derive(Clone)]
pub struct MapStep {
    base: StepBase,
    func: MapFn,
}

impl MapStep {
    /// Creates a map from a function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            base: StepBase::new(),
            func: Arc::new(func),
        }
    }
}

impl Step for MapStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        elements(self.name(), input)?
            .iter()
            .map(|item| (self.func)(item).map_err(|e| closure_error(self.name(), &e)))
            .collect::<Result<Vec<_>, _>>()
            .map(Message::Sequence)
    }
}

/// Accumulator applied by a [`ReduceStep`].
pub type ReduceFn = Arc<dyn Fn(Value, &Value) -> anyhow::Result<Value> + Send + Sync>;

/// Folds the elements into a single value.
///
/// Without an initial value the first element seeds the accumulator.
#[derive(Clone)]
pub struct ReduceStep {
    base: StepBase,
    func: ReduceFn,
    initial: Option<Value>,
}

impl ReduceStep {
    /// Creates a reduction from an accumulator function.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Value, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            base: StepBase::new(),
            func: Arc::new(func),
            initial: None,
        }
    }

    /// Sets the initial accumulator.
    #[must_use]
    pub fn with_initial(mut self, initial: impl Into<Value>) -> Self {
        self.initial = Some(initial.into());
        self
    }
}

impl Step for ReduceStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let mut items = elements(self.name(), input)?.into_iter();
        let seed = match self.initial.clone() {
            Some(initial) => initial,
            None => items.next().ok_or_else(|| {
                StepError::execution(format!("{} cannot reduce an empty sequence", self.name()))
            })?,
        };
        items
            .try_fold(seed, |acc, item| {
                (self.func)(acc, &item).map_err(|e| closure_error(self.name(), &e))
            })
            .map(Message::from)
    }
}

macro_rules! closure_debug {
    ($($ty:ident),+) => {
        $(
            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($ty))
                        .field("base", &self.base)
                        .finish_non_exhaustive()
                }
            }
        )+
    };
}

closure_debug!(FilterStep, MapStep, ReduceStep);

leaf_step!(SelectStep, FilterStep, MapStep, ReduceStep);
