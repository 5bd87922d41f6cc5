//! General-purpose steps: constants, closures, storage, traces and resources.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use super::{leaf_step, Step, StepBase, StorageWriter};
use crate::context::{StepContext, TraceLevel};
use crate::core::Message;
use crate::errors::StepError;
use crate::template::{value_to_string, TemplateNamespace, TemplateRenderer};

/// Closure run by a [`LambdaStep`]: `(input value, storage map) -> output value`.
pub type LambdaFn = Arc<dyn Fn(&Value, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>;

/// Predicate over `(input, storage map)`.
pub type StepPredicate = Arc<dyn Fn(&Message, &Map<String, Value>) -> bool + Send + Sync>;

/// Returns a constant message.
#[derive(Debug, Clone)]
pub struct EchoStep {
    base: StepBase,
    message: Value,
}

impl EchoStep {
    /// Creates a step returning `message`, rendered as a template.
    #[must_use]
    pub fn new(message: impl Into<Value>) -> Self {
        Self {
            base: StepBase::new(),
            message: message.into(),
        }
    }

    /// Returns the unrendered message.
    #[must_use]
    pub const fn message(&self) -> &Value {
        &self.message
    }
}

impl Step for EchoStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["message"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            message: renderer.render_value(&self.message)?,
            ..self.clone()
        })))
    }

    fn process(&self, _input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        Ok(Message::from(self.message.clone()))
    }
}

/// Runs a closure over the input value and the storage map.
#[derive(Clone)]
pub struct LambdaStep {
    base: StepBase,
    func: LambdaFn,
}

impl LambdaStep {
    /// Creates a step from a closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value, &Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            base: StepBase::new(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for LambdaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaStep")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl Step for LambdaStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let storage = ctx.storage().as_map();
        (self.func)(&input.into_value(), &storage)
            .map(Message::from)
            .map_err(|e| StepError::execution(format!("error during lambda function call: {e}")))
    }
}

/// Saves its input into the run storage and forwards it.
#[derive(Debug, Clone)]
pub struct SaveToStorageStep {
    base: StepBase,
    key: String,
}

impl SaveToStorageStep {
    /// Creates a step storing its input under a dotted `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            key: key.into(),
        }
    }
}

impl Step for SaveToStorageStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["key"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            key: renderer.render_string(&self.key)?,
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        ctx.storage_mut()?.set(&self.key, input.to_value())?;
        Ok(input)
    }

    fn as_storage_writer(&self) -> Option<&dyn StorageWriter> {
        Some(self)
    }
}

impl StorageWriter for SaveToStorageStep {}

/// Appends lines to the run trace and forwards its input.
///
/// Without an explicit trace the input value is traced. Lists add one
/// line per element.
#[derive(Debug, Clone, Default)]
pub struct TraceStep {
    base: StepBase,
    trace: Option<Value>,
    level: TraceLevel,
}

impl TraceStep {
    /// Creates a step tracing its input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a step tracing a fixed text or list of texts.
    #[must_use]
    pub fn text(trace: impl Into<Value>) -> Self {
        Self {
            trace: Some(trace.into()),
            ..Self::default()
        }
    }

    /// Sets the trace level.
    #[must_use]
    pub const fn with_level(mut self, level: TraceLevel) -> Self {
        self.level = level;
        self
    }
}

impl Step for TraceStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["trace"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        let Some(trace) = &self.trace else {
            return Ok(None);
        };
        Ok(Some(Box::new(Self {
            trace: Some(renderer.render_value(trace)?),
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let trace = self.trace.clone().unwrap_or_else(|| input.to_value());
        match trace {
            Value::Array(lines) => {
                for line in &lines {
                    ctx.add_trace(value_to_string(line), self.level);
                }
            }
            other => ctx.add_trace(value_to_string(&other), self.level),
        }
        Ok(input)
    }
}

/// Declares a named resource for the rest of the run.
///
/// The declaration is a mapping `{engine: "<name>", ...}`; the engine key is
/// stripped before the remaining parameters reach the factory, and those
/// parameters are the step's output.
#[derive(Debug, Clone)]
pub struct DeclareResourceStep {
    base: StepBase,
    name: String,
    resource: Value,
}

impl DeclareResourceStep {
    /// Creates a step declaring `resource` under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, resource: impl Into<Value>) -> Self {
        Self {
            base: StepBase::new(),
            name: name.into(),
            resource: resource.into(),
        }
    }
}

impl Step for DeclareResourceStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["name", "resource"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            name: renderer.render_string(&self.name)?,
            resource: renderer.render_value(&self.resource)?,
            ..self.clone()
        })))
    }

    fn process(&self, _input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let Value::Object(declaration) = &self.resource else {
            return Err(StepError::validation(format!(
                "Engine key was not defined in the resource: {}",
                self.resource
            )));
        };
        let (resource, params) = ctx.resource_factory().create_from_declaration(declaration)?;
        let description = resource.describe();
        ctx.resources().declare(self.name.clone(), resource)?;
        ctx.add_trace(description, TraceLevel::Info);
        Ok(Message::Mapping(params))
    }
}

/// Fails the run with an execution error.
///
/// Handy to stop a recipe early while developing it.
#[derive(Clone, Default)]
pub struct FailStep {
    base: StepBase,
    predicate: Option<StepPredicate>,
}

impl FailStep {
    /// Creates a step that always fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails only when `predicate` holds, forwarding the input otherwise.
    #[must_use]
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&Message, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            base: StepBase::new(),
            predicate: Some(Arc::new(predicate)),
        }
    }
}

impl fmt::Debug for FailStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailStep")
            .field("base", &self.base)
            .field("conditional", &self.predicate.is_some())
            .finish()
    }
}

impl Step for FailStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let fails = match &self.predicate {
            Some(predicate) => predicate(&input, &ctx.storage().as_map()),
            None => true,
        };
        if fails {
            return Err(StepError::execution("FailStep is failing this execution"));
        }
        Ok(input)
    }
}

/// Skips the remaining steps of its list when triggered.
///
/// Triggers when the predicate holds, or on a `true` input whether or not a
/// predicate is set.
#[derive(Clone, Default)]
pub struct ShortCircuitStep {
    base: StepBase,
    predicate: Option<StepPredicate>,
}

impl ShortCircuitStep {
    /// Creates a step triggered by a `true` input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a step also triggered by `predicate`.
    #[must_use]
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&Message, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            base: StepBase::new(),
            predicate: Some(Arc::new(predicate)),
        }
    }
}

impl fmt::Debug for ShortCircuitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShortCircuitStep")
            .field("base", &self.base)
            .field("conditional", &self.predicate.is_some())
            .finish()
    }
}

impl Step for ShortCircuitStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        if let Some(predicate) = &self.predicate {
            if predicate(&input, &ctx.storage().as_map()) {
                return Err(StepError::ShortCircuit);
            }
        }
        if input == Message::Value(Value::Bool(true)) {
            return Err(StepError::ShortCircuit);
        }
        Ok(input)
    }
}

fn input_string<'m>(step: &str, input: &'m Message) -> Result<&'m str, StepError> {
    input
        .as_str()
        .ok_or_else(|| StepError::execution(format!("{step} requires a string input, got a {}", input.variant())))
}

/// Encodes a string input as standard Base64.
#[derive(Debug, Clone, Default)]
pub struct Base64EncodeStep {
    base: StepBase,
}

impl Base64EncodeStep {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Step for Base64EncodeStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let text = input_string(self.name(), &input)?;
        Ok(Message::from(STANDARD.encode(text.as_bytes())))
    }
}

/// Decodes a standard Base64 string input into UTF-8 text.
#[derive(Debug, Clone, Default)]
pub struct Base64DecodeStep {
    base: StepBase,
}

impl Base64DecodeStep {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Step for Base64DecodeStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let text = input_string(self.name(), &input)?;
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| StepError::execution(format!("invalid Base64 input: {e}")))?;
        String::from_utf8(bytes)
            .map(Message::from)
            .map_err(|e| StepError::execution(format!("decoded Base64 is not UTF-8: {e}")))
    }
}

/// Reads a text file and renders it as a template.
///
/// The keys of `data` are available as template roots next to `inputs`
/// and `storage`. Files ending in `.json` are parsed into a message.
#[derive(Debug, Clone)]
pub struct ReadFileStep {
    base: StepBase,
    filename: String,
    data: Map<String, Value>,
}

impl ReadFileStep {
    /// Creates a step reading `filename`.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            filename: filename.into(),
            data: Map::new(),
        }
    }

    /// Sets the extra template variables.
    #[must_use]
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

impl Step for ReadFileStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["filename"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            filename: renderer.render_string(&self.filename)?,
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let content = std::fs::read_to_string(&self.filename)
            .map_err(|e| StepError::execution(format!("cannot read '{}': {e}", self.filename)))?;

        let namespace = self.data.iter().fold(
            TemplateNamespace::new(input.into_value(), Value::Object(ctx.storage().as_map())),
            |ns, (key, value)| ns.with_root(key.clone(), value.clone()),
        );
        let rendered = TemplateRenderer::new(&namespace).render_string(&content)?;

        if self.filename.ends_with(".json") {
            let value: Value = serde_json::from_str(&rendered)
                .map_err(|e| StepError::execution(format!("invalid JSON in '{}': {e}", self.filename)))?;
            return Ok(Message::from(value));
        }
        Ok(Message::from(rendered))
    }
}

leaf_step!(
    EchoStep,
    LambdaStep,
    SaveToStorageStep,
    TraceStep,
    DeclareResourceStep,
    FailStep,
    ShortCircuitStep,
    Base64EncodeStep,
    Base64DecodeStep,
    ReadFileStep,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::resources::{EmptyResource, Resource, ResourceFactory};
    use crate::testing::run_step;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_echo_renders_copy() {
        let run = RunContext::new("test");
        let step = EchoStep::new("run {{ storage.params | length }}");
        assert_eq!(run_step(&run, &step, Message::Empty).unwrap(), Message::from("run 0"));
        assert_eq!(step.message(), &json!("run {{ storage.params | length }}"));
    }

    #[test]
    fn test_lambda_sees_input_and_storage() {
        let run = RunContext::new("test");
        let step = LambdaStep::new(|input, storage| {
            Ok(json!({"input": input, "has_params": storage.contains_key("params")}))
        });
        let out = run_step(&run, &step, Message::from(json!(7))).unwrap();
        assert_eq!(out, Message::from(json!({"input": 7, "has_params": true})));
    }

    #[test]
    fn test_lambda_error_is_execution_failure() {
        let run = RunContext::new("test");
        let step = LambdaStep::new(|_, _| Err(anyhow::anyhow!("nope")));
        let err = run_step(&run, &step, Message::Empty).unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
        assert!(err.to_string().contains("error during lambda function call: nope"));
    }

    #[test]
    fn test_save_to_storage() {
        let run = RunContext::new("test");
        let step = SaveToStorageStep::new("results.first");
        let out = run_step(&run, &step, Message::from(json!([1, 2]))).unwrap();
        assert_eq!(out, Message::from(json!([1, 2])));
        assert_eq!(run.storage().get_path("results.first"), Some(json!([1, 2])));
    }

    #[test]
    fn test_trace_list_adds_one_line_per_element() {
        let run = RunContext::new("test");
        let step = TraceStep::text(json!(["a", "b"])).with_level(TraceLevel::Warning);
        let out = run_step(&run, &step, Message::from("in")).unwrap();
        assert_eq!(out, Message::from("in"));
        let entries = run.traces().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].text, "b");
        assert_eq!(entries[1].level, TraceLevel::Warning);
    }

    #[test]
    fn test_trace_defaults_to_input() {
        let run = RunContext::new("test");
        run_step(&run, &TraceStep::new(), Message::from("hello")).unwrap();
        assert_eq!(run.traces().entries()[0].text, "hello");
    }

    #[test]
    fn test_declare_resource_strips_engine() {
        let factory = ResourceFactory::new().with_engine(
            "memory",
            Box::new(|params: &Map<String, Value>| -> Result<Arc<dyn Resource>, StepError> {
                Ok(Arc::new(EmptyResource::new("memory", params.clone())))
            }),
        );
        let run = RunContext::new("test").with_resource_factory(factory);
        let step = DeclareResourceStep::new("db", json!({"engine": "memory", "path": "/tmp/x"}));
        let out = run_step(&run, &step, Message::Empty).unwrap();

        assert_eq!(out, Message::from(json!({"path": "/tmp/x"})));
        assert_eq!(run.resources().get("db").unwrap().engine(), "memory");
        assert_eq!(run.traces().len(), 1);
    }

    #[test]
    fn test_declare_resource_requires_engine() {
        let run = RunContext::new("test");
        let step = DeclareResourceStep::new("db", json!({"path": "/tmp/x"}));
        let err = run_step(&run, &step, Message::Empty).unwrap_err();
        assert!(err.to_string().contains("Engine key was not defined in the resource"));
        assert!(run.resources().is_empty());
    }

    #[test]
    fn test_fail_step() {
        let run = RunContext::new("test");
        let err = run_step(&run, &FailStep::new(), Message::Empty).unwrap_err();
        assert_eq!(err.to_string(), "execution error: FailStep is failing this execution");

        let conditional = FailStep::when(|input, _| input.is_empty());
        assert!(run_step(&run, &conditional, Message::from("x")).is_ok());
    }

    #[test]
    fn test_short_circuit_on_true_input() {
        let run = RunContext::new("test");
        let step = ShortCircuitStep::new();
        assert!(matches!(
            run_step(&run, &step, Message::from(json!(true))),
            Err(StepError::ShortCircuit)
        ));
        assert_eq!(
            run_step(&run, &step, Message::from(json!(false))).unwrap(),
            Message::from(json!(false))
        );
    }

    #[test]
    fn test_short_circuit_predicate() {
        let run = RunContext::new("test");
        let step = ShortCircuitStep::when(|input, _| input.as_str() == Some("stop"));
        assert!(matches!(
            run_step(&run, &step, Message::from("stop")),
            Err(StepError::ShortCircuit)
        ));
    }

    #[test]
    fn test_short_circuit_true_input_with_predicate() {
        let run = RunContext::new("test");
        let step = ShortCircuitStep::when(|_, _| false);
        assert!(matches!(
            run_step(&run, &step, Message::from(json!(true))),
            Err(StepError::ShortCircuit)
        ));
        assert_eq!(
            run_step(&run, &step, Message::from("go")).unwrap(),
            Message::from("go")
        );
    }

    #[test]
    fn test_echo_renders_mapping_keys() {
        let run = RunContext::new("test");
        run.seed_params(Map::from_iter([("name".to_string(), json!("prod"))]))
            .unwrap();
        let step = EchoStep::new(json!({"{{ storage.params.name }}": 1}));
        assert_eq!(
            run_step(&run, &step, Message::Empty).unwrap(),
            Message::from(json!({"prod": 1}))
        );
    }

    #[test]
    fn test_base64() {
        let run = RunContext::new("test");
        let encoded = run_step(&run, &Base64EncodeStep::new(), Message::from("stepflow rocks")).unwrap();
        assert_eq!(encoded, Message::from("c3RlcGZsb3cgcm9ja3M="));
        let decoded = run_step(&run, &Base64DecodeStep::new(), encoded).unwrap();
        assert_eq!(decoded, Message::from("stepflow rocks"));
    }

    #[test]
    fn test_base64_requires_string() {
        let run = RunContext::new("test");
        let err = run_step(&run, &Base64EncodeStep::new(), Message::from(json!([1]))).unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
    }

    #[test]
    fn test_read_file_renders_data() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "name={{{{ name }}}}").unwrap();

        let run = RunContext::new("test");
        let data = Map::from_iter([("name".to_string(), json!("Stepflow"))]);
        let step = ReadFileStep::new(file.path().to_string_lossy()).with_data(data);
        assert_eq!(run_step(&run, &step, Message::Empty).unwrap(), Message::from("name=Stepflow"));
    }

    #[test]
    fn test_read_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"env": "{{{{ storage.params.env }}}}"}}"#).unwrap();

        let run = RunContext::new("test");
        run.seed_params(Map::from_iter([("env".to_string(), json!("prod"))]))
            .unwrap();
        let step = ReadFileStep::new(file.path().to_string_lossy());
        assert_eq!(
            run_step(&run, &step, Message::Empty).unwrap(),
            Message::from(json!({"env": "prod"}))
        );
    }

    #[test]
    fn test_read_missing_file() {
        let run = RunContext::new("test");
        let err = run_step(&run, &ReadFileStep::new("/nonexistent/file.txt"), Message::Empty).unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
    }
}
