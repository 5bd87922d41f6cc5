//! Named external handles shared by the steps of a run.
//!
//! Resources are declared at run time with an engine name and engine
//! specific parameters. A [`ResourceFactory`] turns the declaration into a
//! concrete [`Resource`]; unknown engines get an [`EmptyResource`] that only
//! fails once a step tries to use it.

mod factory;

pub use factory::{EmptyResource, ResourceConstructor, ResourceFactory, ENGINE_KEY};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::StepError;

/// An opaque external handle, such as a database connection.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Returns the engine this resource was created for.
    fn engine(&self) -> &str;

    /// Returns a human-readable connection description.
    fn describe(&self) -> String;

    /// Releases the handle.
    fn close(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Returns the database capability, if this resource has one.
    fn as_database(&self) -> Option<&dyn DatabaseResource> {
        None
    }
}

/// A resource that can answer queries with rows of named columns.
#[cfg_attr(test, mockall::automock)]
pub trait DatabaseResource: Send + Sync {
    /// Runs a query and returns its rows.
    fn query(&self, sql: &str) -> Result<Vec<Map<String, Value>>, StepError>;
}

/// The registry of resources declared during a run.
#[derive(Default)]
pub struct Resources {
    entries: RwLock<HashMap<String, Arc<dyn Resource>>>,
}

impl Resources {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource under a name.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the name is already declared.
    pub fn declare(&self, name: impl Into<String>, resource: Arc<dyn Resource>) -> Result<(), StepError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(StepError::execution(format!(
                "resource '{name}' is already declared"
            )));
        }
        entries.insert(name, resource);
        Ok(())
    }

    /// Looks a resource up by name.
    ///
    /// # Errors
    ///
    /// Returns an execution error naming the declared resources when the
    /// name is unknown.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Resource>, StepError> {
        let found = self.entries.read().get(name).cloned();
        found.ok_or_else(|| {
            StepError::execution(format!(
                "resource '{name}' is not declared, available resources: [{}]",
                self.names().join(", ")
            ))
        })
    }

    /// Checks if a name is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Returns the declared names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Closes every resource, attempting all of them.
    ///
    /// Resources stay declared so the end-of-run summary can count them.
    ///
    /// # Errors
    ///
    /// Returns the first close error.
    pub fn close_all(&self) -> Result<(), StepError> {
        let mut first_error = None;
        for name in self.names() {
            let Some(resource) = self.entries.read().get(&name).cloned() else {
                continue;
            };
            if let Err(e) = resource.close() {
                tracing::warn!(resource = %name, error = %e, "Failed to close resource");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct ClosingResource {
        closed: Mutex<u32>,
        fail: bool,
    }

    impl Resource for ClosingResource {
        fn engine(&self) -> &str {
            "test"
        }

        fn describe(&self) -> String {
            "test resource".to_string()
        }

        fn close(&self) -> Result<(), StepError> {
            *self.closed.lock() += 1;
            if self.fail {
                Err(StepError::execution("close failed"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_declare_and_get() {
        let resources = Resources::new();
        resources
            .declare("db", Arc::new(EmptyResource::new("postgresql", Map::new())))
            .unwrap();
        assert_eq!(resources.get("db").unwrap().engine(), "postgresql");
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_redeclare_is_error() {
        let resources = Resources::new();
        let r: Arc<dyn Resource> = Arc::new(EmptyResource::new("x", Map::new()));
        resources.declare("db", Arc::clone(&r)).unwrap();
        let err = resources.declare("db", r).unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
    }

    #[test]
    fn test_missing_name_lists_available() {
        let resources = Resources::new();
        for name in ["warehouse", "cache"] {
            resources
                .declare(name, Arc::new(EmptyResource::new("x", Map::new())))
                .unwrap();
        }
        let err = resources.get("missing").unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
        let message = err.to_string();
        assert!(message.contains("missing"));
        assert!(message.contains("[cache, warehouse]"));
    }

    #[test]
    fn test_missing_lookups_alongside_declarations() {
        let resources = Resources::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200 {
                    resources
                        .declare(format!("r{i}"), Arc::new(EmptyResource::new("x", Map::new())))
                        .unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        assert!(resources.get("missing").is_err());
                    }
                });
            }
        });
        assert_eq!(resources.len(), 200);
    }

    #[test]
    fn test_close_all_attempts_every_resource() {
        let resources = Resources::new();
        let failing = Arc::new(ClosingResource {
            fail: true,
            ..Default::default()
        });
        let ok = Arc::new(ClosingResource::default());
        resources.declare("a", failing.clone()).unwrap();
        resources.declare("b", ok.clone()).unwrap();

        assert!(resources.close_all().is_err());
        assert_eq!(*failing.closed.lock(), 1);
        assert_eq!(*ok.closed.lock(), 1);
    }

    #[test]
    fn test_mock_database_capability() {
        let mut db = MockDatabaseResource::new();
        db.expect_query()
            .withf(|sql| sql.starts_with("SELECT"))
            .returning(|_| Ok(vec![Map::new()]));
        assert_eq!(db.query("SELECT 1").unwrap().len(), 1);
    }
}
