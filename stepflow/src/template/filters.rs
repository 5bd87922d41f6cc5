//! Filters applied with `{{ value | filter }}`.

use serde_json::Value;

use super::value_to_string;
use crate::errors::StepError;

/// Serializes the value to JSON text and marks the template as structured.
pub(super) const TO_JSON: &str = "tojson";

/// Applies a named filter to a value.
pub(super) fn apply(name: &str, value: Value) -> Result<Value, StepError> {
    match name {
        TO_JSON => Ok(Value::String(value.to_string())),
        "keys" => keys(value),
        "length" => length(&value),
        "upper" => Ok(Value::String(value_to_string(&value).to_uppercase())),
        "lower" => Ok(Value::String(value_to_string(&value).to_lowercase())),
        "trim" => Ok(Value::String(value_to_string(&value).trim().to_string())),
        "first" => element(value, name, |items| items.first()),
        "last" => element(value, name, |items| items.last()),
        other => Err(StepError::execution(format!(
            "unknown template filter '{other}'"
        ))),
    }
}

fn keys(value: Value) -> Result<Value, StepError> {
    let value = match value {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    match value {
        Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
        other => Err(StepError::execution(format!(
            "keys filter expects a mapping, got {other}"
        ))),
    }
}

fn length(value: &Value) -> Result<Value, StepError> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => {
            return Err(StepError::execution(format!(
                "length filter expects a string, sequence or mapping, got {other}"
            )))
        }
    };
    Ok(Value::from(len))
}

fn element(
    value: Value,
    name: &str,
    pick: impl FnOnce(&[Value]) -> Option<&Value>,
) -> Result<Value, StepError> {
    match &value {
        Value::Array(items) => Ok(pick(items.as_slice()).cloned().unwrap_or(Value::Null)),
        other => Err(StepError::execution(format!(
            "{name} filter expects a sequence, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_accepts_json_text() {
        let keys = apply("keys", json!("{\"b\": 1, \"a\": 2}")).unwrap();
        assert_eq!(keys, json!(["a", "b"]));
    }

    #[test]
    fn test_length() {
        assert_eq!(apply("length", json!([1, 2, 3])).unwrap(), json!(3));
        assert_eq!(apply("length", json!("héllo")).unwrap(), json!(5));
        assert!(apply("length", json!(1)).is_err());
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(apply("upper", json!("abc")).unwrap(), json!("ABC"));
        assert_eq!(apply("lower", json!("ABC")).unwrap(), json!("abc"));
        assert_eq!(apply("trim", json!("  x ")).unwrap(), json!("x"));
    }

    #[test]
    fn test_first_and_last() {
        assert_eq!(apply("first", json!([1, 2])).unwrap(), json!(1));
        assert_eq!(apply("last", json!([1, 2])).unwrap(), json!(2));
        assert_eq!(apply("first", json!([])).unwrap(), Value::Null);
    }

    #[test]
    fn test_unknown_filter() {
        let err = apply("nope", json!(1)).unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
    }
}
