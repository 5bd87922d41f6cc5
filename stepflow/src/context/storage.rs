//! The run-scoped nested key/value namespace.

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::errors::StepError;

/// The key under which the resolved run parameters are stored.
pub const PARAMS_KEY: &str = "params";

/// A thread-safe nested key/value store shared by every step of a run.
///
/// Any step may read it. Writes go through a [`StorageMut`], which a
/// step can only obtain when it declares the storage-write capability.
#[derive(Debug, Default)]
pub struct Storage {
    data: RwLock<Map<String, Value>>,
}

impl Storage {
    /// Creates a new storage holding an empty `params` entry.
    #[must_use]
    pub fn new() -> Self {
        let mut data = Map::new();
        data.insert(PARAMS_KEY.to_string(), Value::Object(Map::new()));
        Self {
            data: RwLock::new(data),
        }
    }

    /// Gets a top-level value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Gets a nested value by dotted path, e.g. `"params.name"`.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let data = self.data.read();
        let mut segments = path.split('.');
        let mut current = data.get(segments.next()?)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Checks if a top-level key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Returns the run parameters.
    #[must_use]
    pub fn params(&self) -> Map<String, Value> {
        match self.get(PARAMS_KEY) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Returns a copy of the whole namespace.
    #[must_use]
    pub fn as_map(&self) -> Map<String, Value> {
        self.data.read().clone()
    }

    /// Returns the number of top-level entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns all top-level keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Sets a value by dotted path, creating or overwriting nested maps.
    pub(crate) fn set(&self, path: &str, value: Value) -> Result<(), StepError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StepError::validation(format!(
                "invalid storage key '{path}'"
            )));
        }
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| StepError::validation("empty storage key"))?;

        let mut data = self.data.write();
        let mut current = &mut *data;
        for segment in parents {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = entry
                .as_object_mut()
                .ok_or_else(|| StepError::execution(format!("cannot write storage key '{path}'")))?;
        }
        current.insert((*last).to_string(), value);
        Ok(())
    }

    /// Removes a top-level key.
    pub(crate) fn remove(&self, key: &str) -> Option<Value> {
        self.data.write().remove(key)
    }
}

/// Write access to a [`Storage`], handed to storage-writing steps.
#[derive(Debug, Clone, Copy)]
pub struct StorageMut<'a> {
    storage: &'a Storage,
}

impl<'a> StorageMut<'a> {
    pub(crate) const fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Sets a value by dotted path; `"a.b.c"` creates or overwrites nested maps.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty path segments.
    pub fn set(&self, path: &str, value: Value) -> Result<(), StepError> {
        self.storage.set(path, value)
    }

    /// Removes a top-level key, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.storage.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_new_storage_has_params() {
        let storage = Storage::new();
        assert_eq!(storage.get(PARAMS_KEY), Some(json!({})));
        assert!(storage.params().is_empty());
    }

    #[test]
    fn test_dotted_set_creates_nested_maps() {
        let storage = Storage::new();
        storage.set("a.b.c", json!(1)).unwrap();
        assert_eq!(storage.get("a"), Some(json!({"b": {"c": 1}})));
        assert_eq!(storage.get_path("a.b.c"), Some(json!(1)));
    }

    #[test]
    fn test_dotted_set_overwrites_scalars() {
        let storage = Storage::new();
        storage.set("a", json!("scalar")).unwrap();
        storage.set("a.b", json!(2)).unwrap();
        assert_eq!(storage.get("a"), Some(json!({"b": 2})));
    }

    #[test]
    fn test_dotted_set_keeps_siblings() {
        let storage = Storage::new();
        storage.set("params.name", json!("prod")).unwrap();
        storage.set("params.region", json!("eu")).unwrap();
        assert_eq!(
            storage.get(PARAMS_KEY),
            Some(json!({"name": "prod", "region": "eu"}))
        );
    }

    #[test]
    fn test_invalid_keys() {
        let storage = Storage::new();
        assert!(storage.set("", json!(1)).is_err());
        assert!(storage.set("a..b", json!(1)).is_err());
    }

    #[test]
    fn test_writer_sets_and_removes() {
        let storage = Storage::new();
        let writer = StorageMut::new(&storage);
        writer.set("out", json!([1, 2])).unwrap();
        assert!(storage.contains_key("out"));
        assert_eq!(writer.remove("out"), Some(json!([1, 2])));
        assert_eq!(storage.len(), 1);
    }
}
