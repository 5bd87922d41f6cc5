//! Containers: steps made of other steps.

use serde_json::Value;

use super::{Node, Step, StepBase, StepBuilder};
use crate::context::StepContext;
use crate::core::Message;
use crate::errors::StepError;
use crate::template::TemplateRenderer;

/// A step composed of an ordered list of child steps.
pub trait StepContainer: Step {
    /// Returns the children, in execution order.
    fn steps(&self) -> &[Node];
}

/// A container whose body runs once per element of a sequence.
///
/// The executor first runs the container as a plain step; the message its
/// [`Step::process`] returns is the sequence to iterate.
pub trait IterableStepContainer: StepContainer {
    /// Returns the explicit sequence source, if any.
    fn sequence(&self) -> Option<&Value>;
}

fn close_all(nodes: &[Node]) -> Result<(), StepError> {
    let mut first_error = None;
    for node in nodes {
        if let Err(e) = node.close() {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// A structural group of steps.
///
/// Sections only group their children; they take no callbacks.
#[derive(Debug, Clone, Default)]
pub struct Section {
    base: StepBase,
    steps: Vec<Node>,
}

impl Section {
    /// Creates a section from its children.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Node>) -> Self {
        Self {
            base: StepBase::new(),
            steps: steps.into_iter().collect(),
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.base.title = Some(title.into());
        self
    }

    /// Appends a child.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<Node>) -> Self {
        self.steps.push(step.into());
        self
    }
}

impl Step for Section {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn close(&self) -> Result<(), StepError> {
        close_all(&self.steps)
    }
}

impl StepContainer for Section {
    fn steps(&self) -> &[Node] {
        &self.steps
    }
}

impl From<Section> for Node {
    fn from(section: Section) -> Self {
        Self::section(section)
    }
}

/// Runs its children for their effect and forwards its own input unchanged.
///
/// Every child receives the passthrough's input. Passthroughs take no callbacks.
#[derive(Debug, Clone, Default)]
pub struct PassthroughStep {
    base: StepBase,
    steps: Vec<Node>,
}

impl PassthroughStep {
    /// Creates a passthrough from its children.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Node>) -> Self {
        Self {
            base: StepBase::new(),
            steps: steps.into_iter().collect(),
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.base.title = Some(title.into());
        self
    }

    /// Appends a child.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<Node>) -> Self {
        self.steps.push(step.into());
        self
    }
}

impl Step for PassthroughStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn close(&self) -> Result<(), StepError> {
        close_all(&self.steps)
    }
}

impl StepContainer for PassthroughStep {
    fn steps(&self) -> &[Node] {
        &self.steps
    }
}

impl From<PassthroughStep> for Node {
    fn from(step: PassthroughStep) -> Self {
        Self::passthrough(step)
    }
}

/// Runs its body once per element of `seq`, or of its input when `seq` is unset.
///
/// The container itself runs like a plain step whose output is the
/// sequence, so its callbacks can reshape the sequence before iteration.
/// `seq` is templated, so `"{{ storage.hosts | tojson }}"` iterates over a
/// stored list. Sequences are iterated with their index as key, mappings
/// with their own keys.
#[derive(Debug, Clone, Default)]
pub struct ForEachStep {
    base: StepBase,
    steps: Vec<Node>,
    seq: Option<Value>,
}

impl ForEachStep {
    /// Creates a container iterating over its input.
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = Node>) -> Self {
        Self {
            base: StepBase::new(),
            steps: steps.into_iter().collect(),
            seq: None,
        }
    }

    /// Sets an explicit sequence to iterate.
    #[must_use]
    pub fn with_seq(mut self, seq: impl Into<Value>) -> Self {
        self.seq = Some(seq.into());
        self
    }

    /// Appends a body step.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<Node>) -> Self {
        self.steps.push(step.into());
        self
    }
}

impl Step for ForEachStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["seq"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        let Some(seq) = &self.seq else {
            return Ok(None);
        };
        Ok(Some(Box::new(Self {
            seq: Some(renderer.render_value(seq)?),
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let sequence = match &self.seq {
            Some(seq) => Message::from(seq.clone()),
            None => input.normalize(),
        };
        match &sequence {
            Message::Empty => Err(StepError::execution("there are no elements to iterate")),
            Message::Value(_) => Err(StepError::execution("the input is not iterable")),
            Message::Sequence(items) if items.is_empty() => {
                Err(StepError::execution("the input sequence is empty"))
            }
            Message::Mapping(map) if map.is_empty() => {
                Err(StepError::execution("the input sequence is empty"))
            }
            _ => Ok(sequence),
        }
    }

    fn close(&self) -> Result<(), StepError> {
        close_all(&self.steps)
    }
}

impl StepContainer for ForEachStep {
    fn steps(&self) -> &[Node] {
        &self.steps
    }
}

impl IterableStepContainer for ForEachStep {
    fn sequence(&self) -> Option<&Value> {
        self.seq.as_ref()
    }
}

impl StepBuilder for ForEachStep {
    fn base_mut(&mut self) -> &mut StepBase {
        &mut self.base
    }
}

impl From<ForEachStep> for Node {
    fn from(step: ForEachStep) -> Self {
        Self::iterable(step)
    }
}
