//! Step trait, recipe nodes and built-in steps.
//!
//! A [`Step`] is the atomic unit of work: it consumes a [`Message`] and
//! produces one. Recipes are trees of [`Node`]s, whose variant tells the
//! executor how to dispatch it: a plain step, a [`Section`], an iterable
//! container such as [`ForEachStep`], or a [`PassthroughStep`].
//!
//! Templated attributes are never rendered in place. [`Step::render`]
//! returns a rendered copy, so a step can be executed any number of times
//! with different namespaces.

mod container;
pub mod common;
pub mod db;
pub mod mutate;
pub mod text;
pub mod validate;

pub use container::{ForEachStep, IterableStepContainer, PassthroughStep, Section, StepContainer};

use std::fmt;
use std::sync::Arc;

use crate::context::StepContext;
use crate::core::{Message, StepKind};
use crate::errors::StepError;
use crate::template::TemplateRenderer;

/// Configuration shared by every step: an optional title and its callbacks.
#[derive(Debug, Clone, Default)]
pub struct StepBase {
    title: Option<String>,
    callbacks: Vec<Node>,
}

impl StepBase {
    /// Creates an untitled base without callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the explicit title, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Returns the callbacks.
    #[must_use]
    pub fn callbacks(&self) -> &[Node] {
        &self.callbacks
    }
}

/// A unit of work in a recipe.
///
/// Implementors must provide [`Step::base`] and usually override
/// [`Step::process`]. Steps with templated attributes list them in
/// [`Step::templated`] and return a rendered copy from [`Step::render`].
pub trait Step: Send + Sync + fmt::Debug {
    /// Returns the shared step configuration.
    fn base(&self) -> &StepBase;

    /// Returns the short type name of the step.
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Returns the title, defaulting to the type name.
    fn title(&self) -> &str {
        self.base().title().unwrap_or_else(|| self.name())
    }

    /// Returns `Name(title)`, used in error reports.
    fn describe(&self) -> String {
        format!("{}({})", self.name(), self.title())
    }

    /// Names the attributes rendered as templates before each execution.
    fn templated(&self) -> &'static [&'static str] {
        &[]
    }

    /// Returns a copy of the step with its templated attributes rendered.
    ///
    /// `None` means the step has nothing to render and runs as is.
    ///
    /// # Errors
    ///
    /// Returns a requirement failure for undefined template variables.
    fn render(&self, _renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(None)
    }

    /// Runs the step's own logic.
    ///
    /// # Errors
    ///
    /// Returns the failure the step wants the executor to act on.
    fn process(&self, _input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        Err(StepError::validation(format!(
            "{} must not be called directly",
            self.name()
        )))
    }

    /// Returns the steps run after [`Step::process`], each fed the previous output.
    fn callbacks(&self) -> &[Node] {
        self.base().callbacks()
    }

    /// Releases whatever the step holds.
    fn close(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Returns the storage-write capability, if the step has it.
    fn as_storage_writer(&self) -> Option<&dyn StorageWriter> {
        None
    }
}

/// Capability marker for steps allowed to write the run storage.
pub trait StorageWriter: Step {}

/// Builder methods shared by every concrete step.
pub trait StepBuilder: Sized {
    /// Returns the shared configuration mutably.
    fn base_mut(&mut self) -> &mut StepBase;

    /// Sets the title.
    #[must_use]
    fn with_title(mut self, title: impl Into<String>) -> Self {
        self.base_mut().title = Some(title.into());
        self
    }

    /// Appends a callback.
    #[must_use]
    fn with_callback(mut self, callback: impl Into<Node>) -> Self {
        self.base_mut().callbacks.push(callback.into());
        self
    }

    /// Appends several callbacks.
    #[must_use]
    fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = Node>) -> Self {
        self.base_mut().callbacks.extend(callbacks);
        self
    }
}

/// Implements [`StepBuilder`] and `From<Step> for Node` for leaf steps.
macro_rules! leaf_step {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::steps::StepBuilder for $ty {
                fn base_mut(&mut self) -> &mut $crate::steps::StepBase {
                    &mut self.base
                }
            }

            impl From<$ty> for $crate::steps::Node {
                fn from(step: $ty) -> Self {
                    $crate::steps::Node::leaf(step)
                }
            }
        )+
    };
}
pub(crate) use leaf_step;

/// A node of a recipe tree, tagged with how the executor dispatches it.
#[derive(Debug, Clone)]
pub enum Node {
    /// A plain step.
    Leaf(Arc<dyn Step>),
    /// A structural group of steps.
    Section(Arc<dyn StepContainer>),
    /// A container run once per element of its sequence.
    Iterable(Arc<dyn IterableStepContainer>),
    /// A container whose children never change the value seen downstream.
    Passthrough(Arc<dyn StepContainer>),
}

impl Node {
    /// Wraps a plain step.
    #[must_use]
    pub fn leaf(step: impl Step + 'static) -> Self {
        Self::Leaf(Arc::new(step))
    }

    /// Wraps a container as a section.
    #[must_use]
    pub fn section(container: impl StepContainer + 'static) -> Self {
        Self::Section(Arc::new(container))
    }

    /// Wraps an iterable container.
    #[must_use]
    pub fn iterable(container: impl IterableStepContainer + 'static) -> Self {
        Self::Iterable(Arc::new(container))
    }

    /// Wraps a container as a passthrough.
    #[must_use]
    pub fn passthrough(container: impl StepContainer + 'static) -> Self {
        Self::Passthrough(Arc::new(container))
    }

    /// Returns the dispatch kind.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Leaf(_) => StepKind::Leaf,
            Self::Section(_) => StepKind::Section,
            Self::Iterable(_) => StepKind::Iterable,
            Self::Passthrough(_) => StepKind::Passthrough,
        }
    }

    /// Returns the title of the wrapped step.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Leaf(s) => s.title(),
            Self::Section(c) | Self::Passthrough(c) => c.title(),
            Self::Iterable(c) => c.title(),
        }
    }

    /// Returns `Name(title)` of the wrapped step.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Leaf(s) => s.describe(),
            Self::Section(c) | Self::Passthrough(c) => c.describe(),
            Self::Iterable(c) => c.describe(),
        }
    }

    /// Returns the children of a container, empty for plain steps.
    #[must_use]
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Leaf(_) => &[],
            Self::Section(c) | Self::Passthrough(c) => c.steps(),
            Self::Iterable(c) => c.steps(),
        }
    }

    /// Returns the callbacks of the wrapped step.
    #[must_use]
    pub fn callbacks(&self) -> &[Node] {
        match self {
            Self::Leaf(s) => s.callbacks(),
            Self::Section(c) | Self::Passthrough(c) => c.callbacks(),
            Self::Iterable(c) => c.callbacks(),
        }
    }

    /// Releases the wrapped step.
    ///
    /// # Errors
    ///
    /// Returns the step's close error.
    pub fn close(&self) -> Result<(), StepError> {
        match self {
            Self::Leaf(s) => s.close(),
            Self::Section(c) | Self::Passthrough(c) => c.close(),
            Self::Iterable(c) => c.close(),
        }
    }
}

/// Counts `(sections, steps)` in a tree, callbacks included.
#[must_use]
pub fn count_steps(nodes: &[Node]) -> (usize, usize) {
    nodes.iter().fold((0, 0), |(sections, steps), node| {
        let (child_sections, child_steps) = count_steps(node.children());
        let (cb_sections, cb_steps) = count_steps(node.callbacks());
        let own_section = usize::from(node.kind().is_container());
        (
            sections + own_section + child_sections + cb_sections,
            steps + 1 + child_steps + cb_steps,
        )
    })
}

/// Strips the module path and generics from a type name.
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::common::EchoStep;
    use super::*;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("stepflow::steps::common::EchoStep"), "EchoStep");
        assert_eq!(short_type_name("a::Wrapper<b::Inner>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_title_defaults_to_type_name() {
        let step = EchoStep::new("hi");
        assert_eq!(step.title(), "EchoStep");
        assert_eq!(step.with_title("greet").title(), "greet");
    }

    #[test]
    fn test_node_kinds() {
        let leaf: Node = EchoStep::new("x").into();
        assert_eq!(leaf.kind(), StepKind::Leaf);
        let section: Node = Section::new([leaf.clone()]).into();
        assert_eq!(section.kind(), StepKind::Section);
        assert_eq!(section.children().len(), 1);
        let pass: Node = PassthroughStep::new([leaf]).into();
        assert_eq!(pass.kind(), StepKind::Passthrough);
    }

    #[test]
    fn test_count_steps() {
        let nodes: Vec<Node> = vec![
            EchoStep::new("a").into(),
            Section::new([
                EchoStep::new("b").into(),
                EchoStep::new("c")
                    .with_callback(EchoStep::new("d"))
                    .into(),
            ])
            .into(),
        ];
        assert_eq!(count_steps(&nodes), (1, 5));
    }

    #[test]
    fn test_default_process_must_not_be_called() {
        let run = crate::context::RunContext::new("t");
        let ctx = StepContext::new(&run, "Section", false);
        let err = Section::new([]).process(Message::Empty, &ctx).unwrap_err();
        assert!(err.to_string().contains("Section must not be called directly"));
    }
}
