//! Text processing over strings and sequences of strings.

use regex::Regex;
use serde_json::Value;

use super::{leaf_step, Step, StepBase};
use crate::context::StepContext;
use crate::core::Message;
use crate::errors::StepError;
use crate::template::{value_to_string, TemplateRenderer};

/// The transformation a [`TextStep`] applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOp {
    /// Lower-case every string.
    ToLower,
    /// Upper-case every string.
    ToUpper,
    /// Keep the strings matching the pattern.
    Subset,
    /// Split strings on the pattern.
    Split,
    /// Join a sequence with the pattern as separator.
    Join,
    /// Count the pattern occurrences.
    Count,
    /// Replace every pattern occurrence.
    Replace(String),
}

enum Matcher {
    Fixed(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, s: &str) -> bool {
        match self {
            Self::Fixed(p) => s == p,
            Self::Regex(re) => re.is_match(s),
        }
    }

    fn split(&self, s: &str) -> Value {
        let pieces: Vec<Value> = match self {
            Self::Fixed(p) => s.split(p.as_str()).map(Value::from).collect(),
            Self::Regex(re) => re.split(s).map(Value::from).collect(),
        };
        Value::Array(pieces)
    }

    fn count(&self, s: &str) -> Value {
        let n = match self {
            Self::Fixed(p) if p.is_empty() => 0,
            Self::Fixed(p) => s.matches(p.as_str()).count(),
            Self::Regex(re) => re.find_iter(s).count(),
        };
        Value::from(n)
    }

    fn replace(&self, s: &str, replacement: &str) -> Value {
        match self {
            Self::Fixed(p) => Value::from(s.replace(p.as_str(), replacement)),
            Self::Regex(re) => Value::from(re.replace_all(s, replacement).into_owned()),
        }
    }
}

/// Applies a [`TextOp`] to a string or to each string of a sequence.
///
/// Patterns are regular expressions unless [`TextStep::fixed`] is set, and
/// are templated. Subset on a single string yields the string or nothing.
#[derive(Debug, Clone)]
pub struct TextStep {
    base: StepBase,
    op: TextOp,
    pattern: String,
    fixed: bool,
}

impl TextStep {
    /// Creates a text step.
    #[must_use]
    pub fn new(op: TextOp, pattern: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            op,
            pattern: pattern.into(),
            fixed: false,
        }
    }

    /// Lower-cases the input.
    #[must_use]
    pub fn to_lower() -> Self {
        Self::new(TextOp::ToLower, "")
    }

    /// Upper-cases the input.
    #[must_use]
    pub fn to_upper() -> Self {
        Self::new(TextOp::ToUpper, "")
    }

    /// Keeps strings matching `pattern`.
    #[must_use]
    pub fn subset(pattern: impl Into<String>) -> Self {
        Self::new(TextOp::Subset, pattern)
    }

    /// Splits strings on `pattern`.
    #[must_use]
    pub fn split(pattern: impl Into<String>) -> Self {
        Self::new(TextOp::Split, pattern)
    }

    /// Joins a sequence with `separator`.
    #[must_use]
    pub fn join(separator: impl Into<String>) -> Self {
        Self::new(TextOp::Join, separator).fixed()
    }

    /// Counts occurrences of `pattern`.
    #[must_use]
    pub fn count(pattern: impl Into<String>) -> Self {
        Self::new(TextOp::Count, pattern)
    }

    /// Replaces occurrences of `pattern` with `replacement`.
    #[must_use]
    pub fn replace(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::new(TextOp::Replace(replacement.into()), pattern)
    }

    /// Treats the pattern as a literal string.
    #[must_use]
    pub const fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }

    fn matcher(&self) -> Result<Matcher, StepError> {
        if self.fixed {
            return Ok(Matcher::Fixed(self.pattern.clone()));
        }
        Regex::new(&self.pattern).map(Matcher::Regex).map_err(|e| {
            StepError::validation(format!("{}: invalid pattern '{}': {e}", self.describe(), self.pattern))
        })
    }

    fn expecting(&self) -> StepError {
        StepError::execution(format!(
            "{} is expecting a string or sequence of strings",
            self.describe()
        ))
    }

    fn apply_one(&self, matcher: &Matcher, s: &str) -> Value {
        match &self.op {
            TextOp::ToLower => Value::from(s.to_lowercase()),
            TextOp::ToUpper => Value::from(s.to_uppercase()),
            TextOp::Subset => {
                if matcher.is_match(s) {
                    Value::from(s)
                } else {
                    Value::Null
                }
            }
            TextOp::Split => matcher.split(s),
            TextOp::Join => Value::from(s),
            TextOp::Count => matcher.count(s),
            TextOp::Replace(replacement) => matcher.replace(s, replacement),
        }
    }
}

impl Step for TextStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["pattern"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        if self.pattern.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(Self {
            pattern: renderer.render_string(&self.pattern)?,
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, _ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let matcher = self.matcher()?;
        match input {
            Message::Value(Value::String(s)) => Ok(Message::from(self.apply_one(&matcher, &s))),
            Message::Value(other) if !matches!(self.op, TextOp::ToLower | TextOp::ToUpper | TextOp::Subset) => {
                Ok(Message::from(self.apply_one(&matcher, &value_to_string(&other))))
            }
            Message::Sequence(items) => {
                if self.op == TextOp::Join {
                    let parts: Vec<String> = items.iter().map(value_to_string).collect();
                    return Ok(Message::from(parts.join(&self.pattern)));
                }
                let strings = items.iter().filter_map(Value::as_str);
                let out: Vec<Value> = match self.op {
                    TextOp::Subset => strings
                        .filter(|s| matcher.is_match(s))
                        .map(Value::from)
                        .collect(),
                    _ => strings.map(|s| self.apply_one(&matcher, s)).collect(),
                };
                Ok(Message::Sequence(out))
            }
            _ => Err(self.expecting()),
        }
    }
}

leaf_step!(TextStep);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::testing::run_step;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn apply(step: &TextStep, input: Value) -> Result<Message, StepError> {
        let run = RunContext::new("test");
        run_step(&run, step, Message::from(input))
    }

    #[test]
    fn test_case() {
        assert_eq!(apply(&TextStep::to_upper(), json!("abc")).unwrap(), Message::from("ABC"));
        assert_eq!(
            apply(&TextStep::to_lower(), json!(["A", 1, "B"])).unwrap(),
            Message::from(json!(["a", "b"]))
        );
        assert!(apply(&TextStep::to_lower(), json!(3)).is_err());
    }

    #[test]
    fn test_subset() {
        let step = TextStep::subset("^db");
        assert_eq!(
            apply(&step, json!(["db1", "web1", "db2"])).unwrap(),
            Message::from(json!(["db1", "db2"]))
        );
        assert_eq!(apply(&step, json!("web")).unwrap(), Message::Empty);
    }

    #[test]
    fn test_split_regex_and_fixed() {
        assert_eq!(
            apply(&TextStep::split(r"\s*,\s*"), json!("a , b,c")).unwrap(),
            Message::from(json!(["a", "b", "c"]))
        );
        assert_eq!(
            apply(&TextStep::split(".").fixed(), json!("1.2")).unwrap(),
            Message::from(json!(["1", "2"]))
        );
    }

    #[test]
    fn test_join() {
        assert_eq!(
            apply(&TextStep::join(", "), json!(["a", "b", 3])).unwrap(),
            Message::from("a, b, 3")
        );
    }

    #[test]
    fn test_count() {
        assert_eq!(apply(&TextStep::count("o"), json!("foo boo")).unwrap(), Message::from(json!(4)));
        assert_eq!(
            apply(&TextStep::count("ab").fixed(), json!(["abab", "x"])).unwrap(),
            Message::from(json!([2, 0]))
        );
    }

    #[test]
    fn test_replace() {
        assert_eq!(
            apply(&TextStep::replace(r"\d+", "N"), json!("a1b22")).unwrap(),
            Message::from("aNbN")
        );
        assert_eq!(
            apply(&TextStep::replace("$", "USD").fixed(), json!("10$")).unwrap(),
            Message::from("10USD")
        );
    }

    #[test]
    fn test_invalid_regex_is_validation_error() {
        assert!(matches!(
            apply(&TextStep::count("("), json!("x")),
            Err(StepError::Validation(_))
        ));
    }

    #[test]
    fn test_mapping_input_is_rejected() {
        let err = apply(&TextStep::to_upper(), json!({"a": "b"})).unwrap_err();
        assert!(err.to_string().contains("is expecting a string or sequence of strings"));
    }
}
