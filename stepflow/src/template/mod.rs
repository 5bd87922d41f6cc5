//! Template rendering for step attributes.
//!
//! Resolves `{{ expression }}` templates against the namespace a step runs
//! in. Every namespace exposes two roots:
//!
//! - `{{ inputs }}`: the value of the message entering the step
//! - `{{ storage.params.name }}`: the run storage, including the run parameters
//!
//! # Template Syntax
//!
//! - `{{ storage.key.field }}`: nested field access via dot notation
//! - `{{ inputs.items[0].name }}` or `{{ inputs.items.0.name }}`: array index access
//! - `{{ inputs | tojson }}`: filters, applied left to right
//!
//! Rendering always produces text, except when an expression uses the
//! `tojson` filter: the rendered text is then parsed back into structured
//! data, so `"{{ storage.out | tojson }}"` yields the original mapping.
//!
//! Referencing an undefined variable is a requirement failure.

mod filters;

use serde_json::{Map, Value};

use crate::errors::StepError;

/// The variables visible to a template expression.
#[derive(Debug, Clone, Default)]
pub struct TemplateNamespace {
    roots: Map<String, Value>,
}

impl TemplateNamespace {
    /// Creates the standard namespace `{inputs, storage}`.
    #[must_use]
    pub fn new(inputs: Value, storage: Value) -> Self {
        let mut roots = Map::new();
        roots.insert("inputs".to_string(), inputs);
        roots.insert("storage".to_string(), storage);
        Self { roots }
    }

    /// Adds an extra root variable.
    #[must_use]
    pub fn with_root(mut self, name: impl Into<String>, value: Value) -> Self {
        self.roots.insert(name.into(), value);
        self
    }

    /// Returns a root variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.roots.get(name)
    }
}

/// Renders template strings against a [`TemplateNamespace`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateRenderer<'a> {
    namespace: Option<&'a TemplateNamespace>,
}

impl<'a> TemplateRenderer<'a> {
    /// Creates a renderer backed by a namespace.
    #[must_use]
    pub const fn new(namespace: &'a TemplateNamespace) -> Self {
        Self {
            namespace: Some(namespace),
        }
    }

    /// Creates a renderer that leaves every value untouched.
    #[must_use]
    pub const fn null() -> Self {
        Self { namespace: None }
    }

    /// Resolves all templates in a JSON value tree.
    ///
    /// - Strings: rendered
    /// - Objects: keys rendered to text, values recursively resolved
    /// - Arrays: recursively resolved
    /// - Other types: returned unchanged
    ///
    /// # Errors
    ///
    /// Returns a requirement failure for undefined variables and an
    /// execution failure for malformed expressions.
    pub fn render_value(&self, value: &Value) -> Result<Value, StepError> {
        match value {
            Value::String(s) => self.render_str(s),
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (k, v) in map {
                    resolved.insert(self.render_string(k)?, self.render_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(arr) => {
                let resolved: Result<Vec<Value>, _> =
                    arr.iter().map(|v| self.render_value(v)).collect();
                Ok(Value::Array(resolved?))
            }
            other => Ok(other.clone()),
        }
    }

    /// Renders a template string.
    ///
    /// The result is a string unless an expression used `tojson` and the
    /// rendered text parses as JSON.
    ///
    /// # Errors
    ///
    /// See [`TemplateRenderer::render_value`].
    pub fn render_str(&self, template: &str) -> Result<Value, StepError> {
        let Some(namespace) = self.namespace else {
            return Ok(Value::String(template.to_string()));
        };

        let mut rendered = String::with_capacity(template.len());
        let mut structured = false;
        let mut remaining = template;

        while let Some(start) = remaining.find("{{") {
            rendered.push_str(&remaining[..start]);
            let after = &remaining[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                StepError::execution(format!("unclosed template expression in '{template}'"))
            })?;
            let expression = Expression::parse(&after[..end])?;
            structured |= expression.is_structured();
            rendered.push_str(&value_to_string(&expression.evaluate(namespace)?));
            remaining = &after[end + 2..];
        }
        rendered.push_str(remaining);

        if structured {
            if let Ok(value) = serde_json::from_str::<Value>(&rendered) {
                return Ok(value);
            }
        }
        Ok(Value::String(rendered))
    }

    /// Renders a template string and returns its text form.
    ///
    /// # Errors
    ///
    /// See [`TemplateRenderer::render_value`].
    pub fn render_string(&self, template: &str) -> Result<String, StepError> {
        self.render_str(template).map(|v| value_to_string(&v))
    }
}

/// A parsed `{{ path | filter }}` expression.
#[derive(Debug)]
struct Expression<'t> {
    path: &'t str,
    filters: Vec<&'t str>,
}

impl<'t> Expression<'t> {
    fn parse(inner: &'t str) -> Result<Self, StepError> {
        let mut parts = inner.split('|').map(str::trim);
        let path = parts.next().unwrap_or_default();
        if path.is_empty() {
            return Err(StepError::execution("empty template expression"));
        }
        Ok(Self {
            path,
            filters: parts.collect(),
        })
    }

    fn is_structured(&self) -> bool {
        self.filters.iter().any(|f| *f == filters::TO_JSON)
    }

    fn evaluate(&self, namespace: &TemplateNamespace) -> Result<Value, StepError> {
        let value = lookup(namespace, self.path)?;
        self.filters
            .iter()
            .try_fold(value, |acc, name| filters::apply(name, acc))
    }
}

/// Resolves a dotted path with optional `[n]` indices against the namespace.
fn lookup(namespace: &TemplateNamespace, path: &str) -> Result<Value, StepError> {
    let undefined = || StepError::requirement(format!("undefined template variable: '{path}'"));

    let segments = parse_path_segments(path);
    let (root, rest) = segments.split_first().ok_or_else(undefined)?;
    let mut current = namespace.get(&root.name).ok_or_else(undefined)?;
    for index in &root.indices {
        current = current.get(index).ok_or_else(undefined)?;
    }

    for segment in rest {
        current = navigate_segment(current, segment).ok_or_else(undefined)?;
    }
    Ok(current.clone())
}

/// A segment of a dot-separated path with trailing array indices.
#[derive(Debug)]
struct PathSegment {
    name: String,
    indices: Vec<usize>,
}

/// Parses `"a.items[0][1].name"` into segments.
fn parse_path_segments(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .map(|part| {
            let (name, mut tail) = part.find('[').map_or((part, ""), |i| part.split_at(i));
            let mut indices = Vec::new();
            while let Some(rest) = tail.strip_prefix('[') {
                let Some(close) = rest.find(']') else { break };
                if let Ok(i) = rest[..close].trim().parse::<usize>() {
                    indices.push(i);
                }
                tail = &rest[close + 1..];
            }
            PathSegment {
                name: name.trim().to_string(),
                indices,
            }
        })
        .collect()
}

fn navigate_segment<'v>(value: &'v Value, segment: &PathSegment) -> Option<&'v Value> {
    let mut field = match value {
        Value::Array(items) => items.get(segment.name.parse::<usize>().ok()?)?,
        other => other.get(&segment.name)?,
    };
    for index in &segment.indices {
        field = field.get(index)?;
    }
    Some(field)
}

/// Selects a dotted path with optional `[n]` indices inside a value.
///
/// A leading `[n]` indexes the value itself, so `"[0].name"` works on lists.
pub(crate) fn select_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in parse_path_segments(path) {
        if segment.name.is_empty() {
            for index in &segment.indices {
                current = current.get(index)?;
            }
        } else {
            current = navigate_segment(current, &segment)?;
        }
    }
    Some(current.clone())
}

/// Converts a JSON value to its text form for interpolation.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
