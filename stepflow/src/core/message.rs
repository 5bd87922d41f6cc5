//! The data envelope passed between steps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::StepError;

/// A tagged data envelope flowing from one step to the next.
///
/// Raw values are always coerced into the narrowest matching variant, so a
/// JSON array becomes a [`Message::Sequence`], an object becomes a
/// [`Message::Mapping`], `null` becomes [`Message::Empty`] and every other
/// value is a scalar [`Message::Value`]. Build messages through
/// [`Message::from`] or [`Message::value`]; a hand-built `Message::Value`
/// carrying a list or map is re-coerced by [`Message::normalize`] wherever
/// the variant matters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Message {
    /// No data.
    #[default]
    Empty,
    /// A scalar: string, number or bool.
    Value(Value),
    /// An ordered list of values.
    Sequence(Vec<Value>),
    /// A string-keyed map of values.
    Mapping(Map<String, Value>),
}

impl Message {
    /// Creates a scalar message.
    ///
    /// Non-scalar values are coerced like [`Message::from`].
    #[must_use]
    pub fn value(v: impl Into<Value>) -> Self {
        Self::from(v.into())
    }

    /// Returns the raw value carried by the message.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Value(v) => v.clone(),
            Self::Sequence(items) => Value::Array(items.clone()),
            Self::Mapping(map) => Value::Object(map.clone()),
        }
    }

    /// Consumes the message and returns its raw value.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Value(v) => v,
            Self::Sequence(items) => Value::Array(items),
            Self::Mapping(map) => Value::Object(map),
        }
    }

    /// Re-coerces a [`Message::Value`] holding `null`, a list or a map into
    /// its narrowest variant. Other messages are returned unchanged.
    #[must_use]
    pub fn normalize(self) -> Self {
        match self {
            Self::Value(v) if !is_scalar(&v) => Self::from(v),
            other => other,
        }
    }

    /// Returns true for [`Message::Empty`].
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the variant name, used in error messages.
    #[must_use]
    pub const fn variant(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Value(_) => "value",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Returns the string payload of a scalar string message.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Normalizes the message into ordered `(key, value)` pairs.
    ///
    /// Sequences yield their index as key, mappings their own keys.
    ///
    /// # Errors
    ///
    /// Returns an execution error when the message is neither a sequence
    /// nor a mapping.
    pub fn into_pairs(self) -> Result<Vec<(String, Value)>, StepError> {
        match self.normalize() {
            Self::Sequence(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect()),
            Self::Mapping(map) => Ok(map.into_iter().collect()),
            other => Err(StepError::execution(format!(
                "cannot iterate over a {} message",
                other.variant()
            ))),
        }
    }
}

const fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::Array(items) => Self::Sequence(items),
            Value::Object(map) => Self::Mapping(map),
            scalar => Self::Value(scalar),
        }
    }
}

impl From<Message> for Value {
    fn from(message: Message) -> Self {
        message.into_value()
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl From<Vec<Value>> for Message {
    fn from(items: Vec<Value>) -> Self {
        Self::Sequence(items)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Value(Value::String(s.to_string()))
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "<empty>"),
            Self::Value(Value::String(s)) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_value()),
        }
    }
}
