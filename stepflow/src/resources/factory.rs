//! Engine-keyed construction of resources.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Resource;
use crate::errors::StepError;

/// The declaration key naming the engine of a resource.
pub const ENGINE_KEY: &str = "engine";

/// Constructor for a resource engine, receiving the declaration parameters
/// without the `engine` key.
pub type ResourceConstructor =
    Box<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Resource>, StepError> + Send + Sync>;

/// A harmless placeholder for engines the factory does not know.
///
/// Declaring it always succeeds; it has no capabilities, so steps that
/// need one fail when they use it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmptyResource {
    engine: String,
    params: Map<String, Value>,
}

impl EmptyResource {
    /// Creates a placeholder for an engine.
    #[must_use]
    pub fn new(engine: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            engine: engine.into(),
            params,
        }
    }

    /// Returns the declaration parameters.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }
}

impl Resource for EmptyResource {
    fn engine(&self) -> &str {
        &self.engine
    }

    fn describe(&self) -> String {
        format!("{} (no-op resource)", self.engine)
    }
}

/// Creates resources by dispatching on their engine name.
#[derive(Default)]
pub struct ResourceFactory {
    constructors: HashMap<String, ResourceConstructor>,
}

impl ResourceFactory {
    /// Creates a factory that knows no engines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for an engine.
    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<String>, constructor: ResourceConstructor) -> Self {
        self.register(engine, constructor);
        self
    }

    /// Registers a constructor for an engine, replacing any previous one.
    pub fn register(&mut self, engine: impl Into<String>, constructor: ResourceConstructor) {
        self.constructors.insert(engine.into(), constructor);
    }

    /// Returns true if the engine has a registered constructor.
    #[must_use]
    pub fn supports(&self, engine: &str) -> bool {
        self.constructors.contains_key(engine)
    }

    /// Returns the registered engine names, sorted.
    #[must_use]
    pub fn engines(&self) -> Vec<String> {
        let mut engines: Vec<String> = self.constructors.keys().cloned().collect();
        engines.sort();
        engines
    }

    /// Creates a resource, falling back to [`EmptyResource`] for unknown engines.
    ///
    /// # Errors
    ///
    /// Propagates the error of a registered constructor.
    pub fn create(&self, engine: &str, params: &Map<String, Value>) -> Result<Arc<dyn Resource>, StepError> {
        match self.constructors.get(engine) {
            Some(constructor) => constructor(params),
            None => {
                tracing::debug!(engine = %engine, "No constructor registered, using a no-op resource");
                Ok(Arc::new(EmptyResource::new(engine, params.clone())))
            }
        }
    }

    /// Creates a resource from a declaration `{engine: "<name>", ...}`.
    ///
    /// Returns the resource and the parameters left after stripping `engine`.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `engine` is missing or not a string.
    pub fn create_from_declaration(
        &self,
        declaration: &Map<String, Value>,
    ) -> Result<(Arc<dyn Resource>, Map<String, Value>), StepError> {
        let engine = match declaration.get(ENGINE_KEY) {
            Some(Value::String(engine)) => engine.clone(),
            _ => {
                return Err(StepError::validation(format!(
                    "Engine key was not defined in the resource: {}",
                    Value::Object(declaration.clone())
                )))
            }
        };
        let mut params = declaration.clone();
        params.remove(ENGINE_KEY);
        let resource = self.create(&engine, &params)?;
        Ok((resource, params))
    }
}

impl fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFactory")
            .field("engines", &self.engines())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declaration(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_unknown_engine_defaults_to_empty_resource() {
        let factory = ResourceFactory::new();
        let resource = factory.create("oracle", &Map::new()).unwrap();
        assert_eq!(resource.engine(), "oracle");
        assert!(resource.as_database().is_none());
    }

    #[test]
    fn test_registered_engine_is_used() {
        let factory = ResourceFactory::new().with_engine(
            "custom",
            Box::new(|params: &Map<String, Value>| -> Result<Arc<dyn Resource>, StepError> {
                Ok(Arc::new(EmptyResource::new("custom-built", params.clone())))
            }),
        );
        assert!(factory.supports("custom"));
        let resource = factory.create("custom", &Map::new()).unwrap();
        assert_eq!(resource.engine(), "custom-built");
    }

    #[test]
    fn test_declaration_strips_engine() {
        let factory = ResourceFactory::new();
        let (resource, params) = factory
            .create_from_declaration(&declaration(json!({"engine": "mysql", "host": "db"})))
            .unwrap();
        assert_eq!(resource.engine(), "mysql");
        assert_eq!(Value::Object(params), json!({"host": "db"}));
    }

    #[test]
    fn test_declaration_requires_engine() {
        let factory = ResourceFactory::new();
        let err = factory
            .create_from_declaration(&declaration(json!({"host": "db"})))
            .unwrap_err();
        assert!(err.to_string().contains("Engine key was not defined"));
    }
}
