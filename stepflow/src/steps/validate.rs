//! Data-quality checks.
//!
//! A [`ValidateStep`] pairs a [`Check`] with a [`Severity`]: a failed check
//! raises an assertion (the current list is aborted and the run goes on) or
//! a requirement (the run stops cleanly). Checks forward their input
//! unchanged when they pass.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{leaf_step, Step, StepBase};
use crate::context::StepContext;
use crate::core::Message;
use crate::errors::StepError;
use crate::template::TemplateRenderer;

/// How a failed check is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Abort the current steps-list.
    Assert,
    /// Stop the whole run.
    Require,
}

impl Severity {
    fn fail(self, message: impl Into<String>) -> StepError {
        match self {
            Self::Assert => StepError::assertion(message),
            Self::Require => StepError::requirement(message),
        }
    }
}

/// Predicate over `(input, storage map)` used by [`Check::Predicate`].
pub type CheckFn = Arc<dyn Fn(&Message, &Map<String, Value>) -> bool + Send + Sync>;

/// The condition a [`ValidateStep`] verifies.
#[derive(Clone)]
pub enum Check {
    /// The input value equals the expected value.
    Equal(Value),
    /// The input has no elements.
    Empty,
    /// The input has at least one element.
    NotEmpty,
    /// Every needle is contained in some element of the input sequence.
    AllIn(Value),
    /// No needle is contained in any element of the input sequence.
    AllNotIn(Value),
    /// The input is a single-row sequence whose values are all truthy.
    Checks,
    /// The input is a number greater than the bound.
    Greater(f64),
    /// The input is a number greater than or equal to the bound.
    GreaterOrEqual(f64),
    /// The input is a number less than the bound.
    Less(f64),
    /// The input is a number less than or equal to the bound.
    LessOrEqual(f64),
    /// A custom predicate holds.
    Predicate(CheckFn),
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal(v) => f.debug_tuple("Equal").field(v).finish(),
            Self::Empty => f.write_str("Empty"),
            Self::NotEmpty => f.write_str("NotEmpty"),
            Self::AllIn(v) => f.debug_tuple("AllIn").field(v).finish(),
            Self::AllNotIn(v) => f.debug_tuple("AllNotIn").field(v).finish(),
            Self::Checks => f.write_str("Checks"),
            Self::Greater(b) => f.debug_tuple("Greater").field(b).finish(),
            Self::GreaterOrEqual(b) => f.debug_tuple("GreaterOrEqual").field(b).finish(),
            Self::Less(b) => f.debug_tuple("Less").field(b).finish(),
            Self::LessOrEqual(b) => f.debug_tuple("LessOrEqual").field(b).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Verifies a [`Check`] against its input.
#[derive(Debug, Clone)]
pub struct ValidateStep {
    base: StepBase,
    severity: Severity,
    check: Check,
}

macro_rules! constructors {
    ($($assert:ident, $require:ident => $check:ident),+ $(,)?) => {
        $(
            #[doc = concat!("Asserts [`Check::", stringify!($check), "`].")]
            #[must_use]
            pub fn $assert() -> Self {
                Self::new(Severity::Assert, Check::$check)
            }

            #[doc = concat!("Requires [`Check::", stringify!($check), "`].")]
            #[must_use]
            pub fn $require() -> Self {
                Self::new(Severity::Require, Check::$check)
            }
        )+
    };
}

impl ValidateStep {
    /// Creates a validation step.
    #[must_use]
    pub fn new(severity: Severity, check: Check) -> Self {
        Self {
            base: StepBase::new(),
            severity,
            check,
        }
    }

    constructors!(
        assert_empty, require_empty => Empty,
        assert_not_empty, require_not_empty => NotEmpty,
        assert_checks, require_checks => Checks,
    );

    /// Asserts the input equals `expected`.
    #[must_use]
    pub fn assert_equal(expected: impl Into<Value>) -> Self {
        Self::new(Severity::Assert, Check::Equal(expected.into()))
    }

    /// Requires the input to equal `expected`.
    #[must_use]
    pub fn require_equal(expected: impl Into<Value>) -> Self {
        Self::new(Severity::Require, Check::Equal(expected.into()))
    }

    /// Asserts every needle appears in the input sequence. Needles are templated.
    #[must_use]
    pub fn assert_all_in(needles: impl Into<Value>) -> Self {
        Self::new(Severity::Assert, Check::AllIn(needles.into()))
    }

    /// Requires every needle to appear in the input sequence.
    #[must_use]
    pub fn require_all_in(needles: impl Into<Value>) -> Self {
        Self::new(Severity::Require, Check::AllIn(needles.into()))
    }

    /// Asserts no needle appears in the input sequence.
    #[must_use]
    pub fn assert_all_not_in(needles: impl Into<Value>) -> Self {
        Self::new(Severity::Assert, Check::AllNotIn(needles.into()))
    }

    /// Requires no needle to appear in the input sequence.
    #[must_use]
    pub fn require_all_not_in(needles: impl Into<Value>) -> Self {
        Self::new(Severity::Require, Check::AllNotIn(needles.into()))
    }

    /// Asserts the input is greater than `bound`.
    #[must_use]
    pub fn assert_greater(bound: f64) -> Self {
        Self::new(Severity::Assert, Check::Greater(bound))
    }

    /// Requires the input to be greater than `bound`.
    #[must_use]
    pub fn require_greater(bound: f64) -> Self {
        Self::new(Severity::Require, Check::Greater(bound))
    }

    /// Asserts the input is greater than or equal to `bound`.
    #[must_use]
    pub fn assert_greater_or_equal(bound: f64) -> Self {
        Self::new(Severity::Assert, Check::GreaterOrEqual(bound))
    }

    /// Requires the input to be greater than or equal to `bound`.
    #[must_use]
    pub fn require_greater_or_equal(bound: f64) -> Self {
        Self::new(Severity::Require, Check::GreaterOrEqual(bound))
    }

    /// Asserts the input is less than `bound`.
    #[must_use]
    pub fn assert_less(bound: f64) -> Self {
        Self::new(Severity::Assert, Check::Less(bound))
    }

    /// Requires the input to be less than `bound`.
    #[must_use]
    pub fn require_less(bound: f64) -> Self {
        Self::new(Severity::Require, Check::Less(bound))
    }

    /// Asserts the input is less than or equal to `bound`.
    #[must_use]
    pub fn assert_less_or_equal(bound: f64) -> Self {
        Self::new(Severity::Assert, Check::LessOrEqual(bound))
    }

    /// Requires the input to be less than or equal to `bound`.
    #[must_use]
    pub fn require_less_or_equal(bound: f64) -> Self {
        Self::new(Severity::Require, Check::LessOrEqual(bound))
    }

    /// Asserts a custom predicate.
    pub fn assert_that<F>(predicate: F) -> Self
    where
        F: Fn(&Message, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        Self::new(Severity::Assert, Check::Predicate(Arc::new(predicate)))
    }

    /// Requires a custom predicate.
    pub fn require_that<F>(predicate: F) -> Self
    where
        F: Fn(&Message, &Map<String, Value>) -> bool + Send + Sync + 'static,
    {
        Self::new(Severity::Require, Check::Predicate(Arc::new(predicate)))
    }

    /// Returns the severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the check.
    #[must_use]
    pub const fn check(&self) -> &Check {
        &self.check
    }

    fn verify(&self, input: &Message, ctx: &StepContext<'_>) -> Result<(), StepError> {
        let fail = |message: String| Err(self.severity.fail(message));
        let x = input.to_value();

        match &self.check {
            Check::Equal(expected) => {
                if &x != expected {
                    return fail(format!("elements are not equal: {x} / {expected}"));
                }
            }
            Check::Empty => {
                if !is_empty(&x) {
                    return fail(format!("element is not empty: {x}"));
                }
            }
            Check::NotEmpty => {
                if is_empty(&x) {
                    return fail(format!("element is empty: {x}"));
                }
            }
            Check::AllIn(needles) | Check::AllNotIn(needles) => {
                let Message::Sequence(items) = input else {
                    return Err(StepError::validation(format!(
                        "{} requires a sequence to iterate",
                        self.describe()
                    )));
                };
                let needles = as_list(needles);
                if items.is_empty() {
                    return fail("there is no input data to iterate".to_string());
                }
                if needles.is_empty() {
                    return fail("there are no needles to iterate".to_string());
                }
                let expect_present = matches!(self.check, Check::AllIn(_));
                for needle in &needles {
                    let present = items.iter().any(|item| contains(item, needle));
                    if present != expect_present {
                        let verb = if expect_present { "not in" } else { "in" };
                        return fail(format!("key {needle} {verb} {x}"));
                    }
                }
            }
            Check::Checks => {
                let Message::Sequence(rows) = input else {
                    return Err(StepError::validation(format!(
                        "{} requires a sequence of elements with one item",
                        self.describe()
                    )));
                };
                if rows.len() != 1 {
                    return fail(format!(
                        "returned {} elements instead of one, failing the check",
                        rows.len()
                    ));
                }
                let failed: Map<String, Value> = match &rows[0] {
                    Value::Object(row) => row
                        .iter()
                        .filter(|(_, v)| !is_truthy(v))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    other => {
                        return Err(StepError::validation(format!(
                            "{} requires a row mapping, got {other}",
                            self.describe()
                        )))
                    }
                };
                if !failed.is_empty() {
                    return fail(format!("one or more checks failed: {}", Value::Object(failed)));
                }
            }
            Check::Greater(bound) => compare(&x, *bound, |a, b| a > b, "greater than").or_else(fail)?,
            Check::GreaterOrEqual(bound) => {
                compare(&x, *bound, |a, b| a >= b, "greater than or equal to").or_else(fail)?;
            }
            Check::Less(bound) => compare(&x, *bound, |a, b| a < b, "less than").or_else(fail)?,
            Check::LessOrEqual(bound) => {
                compare(&x, *bound, |a, b| a <= b, "less than or equal to").or_else(fail)?;
            }
            Check::Predicate(predicate) => {
                if !predicate(input, &ctx.storage().as_map()) {
                    return fail(format!("predicate does not hold for {x}"));
                }
            }
        }
        Ok(())
    }
}

fn compare(x: &Value, bound: f64, holds: fn(f64, f64) -> bool, relation: &str) -> Result<(), String> {
    let n = x
        .as_f64()
        .ok_or_else(|| format!("{x} is not a number"))?;
    if holds(n, bound) {
        Ok(())
    } else {
        Err(format!("{x} is not {relation} {bound}"))
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Truthiness of a check value: false, zero and empty collections fail.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        other => !is_empty(other),
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Membership of `needle` in `haystack`: substring, element or key.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), _) => items.contains(needle),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        (h, n) => h == n,
    }
}

impl Step for ValidateStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        match self.check {
            Check::AllIn(_) | Check::AllNotIn(_) => &["needles"],
            _ => &[],
        }
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        let check = match &self.check {
            Check::AllIn(needles) => Check::AllIn(renderer.render_value(needles)?),
            Check::AllNotIn(needles) => Check::AllNotIn(renderer.render_value(needles)?),
            _ => return Ok(None),
        };
        Ok(Some(Box::new(Self {
            check,
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        self.verify(&input, ctx)?;
        Ok(input)
    }
}

leaf_step!(ValidateStep);
