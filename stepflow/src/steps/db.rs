//! Steps querying database resources.
//!
//! Concrete drivers live outside the engine: a resource exposes the
//! [`DatabaseResource`] capability through [`crate::resources::Resource::as_database`].

use serde_json::{json, Value};

use super::validate::ValidateStep;
use super::{leaf_step, Step, StepBase, StepBuilder};
use crate::context::StepContext;
use crate::core::Message;
use crate::errors::StepError;
use crate::template::TemplateRenderer;

pub use crate::resources::DatabaseResource;

/// The query answered by any live SQL server.
pub const PING_QUERY: &str = "SELECT 'alive' AS alive";

/// Runs a query against a declared database resource and returns its rows.
///
/// A query ending in `.sql` is read from that file.
#[derive(Debug, Clone)]
pub struct DatabaseQueryStep {
    base: StepBase,
    resource: String,
    query: String,
}

impl DatabaseQueryStep {
    /// Creates a step running `query` on the resource declared as `resource`.
    #[must_use]
    pub fn new(resource: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            resource: resource.into(),
            query: query.into(),
        }
    }

    fn load_query(&self) -> Result<String, StepError> {
        if !self.query.ends_with(".sql") {
            return Ok(self.query.clone());
        }
        std::fs::read_to_string(&self.query)
            .map_err(|e| StepError::execution(format!("sql file {} cannot be read: {e}", self.query)))
    }
}

impl Step for DatabaseQueryStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["resource", "query"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            resource: renderer.render_string(&self.resource)?,
            query: renderer.render_string(&self.query)?,
            ..self.clone()
        })))
    }

    fn process(&self, _input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        let resource = ctx.resources().get(&self.resource)?;
        let db = resource.as_database().ok_or_else(|| {
            StepError::execution(format!(
                "resource '{}' ({}) does not support database queries",
                self.resource,
                resource.engine()
            ))
        })?;

        let query = self.load_query()?;
        tracing::debug!(step = %self.title(), resource = %self.resource, "Running query");
        let rows = db.query(&query)?;
        Ok(Message::Sequence(rows.into_iter().map(Value::Object).collect()))
    }
}

/// Checks that a database resource answers.
///
/// Runs [`PING_QUERY`] and asserts the single-row answer through a callback.
/// A wrong answer is an assertion that aborts the current list only; a
/// failing query is an execution error and stops the run.
#[derive(Debug, Clone)]
pub struct DatabasePingStep {
    base: StepBase,
    query: DatabaseQueryStep,
}

impl DatabasePingStep {
    /// Creates a ping for the resource declared as `resource`.
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            base: StepBase::new(),
            query: DatabaseQueryStep::new(resource, PING_QUERY),
        }
        .with_callback(ValidateStep::assert_equal(json!([{"alive": "alive"}])))
    }
}

impl Step for DatabasePingStep {
    fn base(&self) -> &StepBase {
        &self.base
    }

    fn templated(&self) -> &'static [&'static str] {
        &["resource"]
    }

    fn render(&self, renderer: &TemplateRenderer<'_>) -> Result<Option<Box<dyn Step>>, StepError> {
        Ok(Some(Box::new(Self {
            query: DatabaseQueryStep {
                resource: renderer.render_string(&self.query.resource)?,
                ..self.query.clone()
            },
            ..self.clone()
        })))
    }

    fn process(&self, input: Message, ctx: &StepContext<'_>) -> Result<Message, StepError> {
        self.query.process(input, ctx)
    }
}

leaf_step!(DatabaseQueryStep, DatabasePingStep);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::context::RunContext;
    use crate::events::CollectingEventSink;
    use crate::executor::Executor;
    use crate::resources::{EmptyResource, MockDatabaseResource, Resource};
    use crate::testing::run_step;
    use pretty_assertions::assert_eq;
    use serde_json::Map;
    use std::sync::Arc;

    struct FakeDb {
        client: MockDatabaseResource,
    }

    impl std::fmt::Debug for FakeDb {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("FakeDb")
        }
    }

    impl Resource for FakeDb {
        fn engine(&self) -> &str {
            "fake"
        }

        fn describe(&self) -> String {
            "fake database".to_string()
        }

        fn as_database(&self) -> Option<&dyn DatabaseResource> {
            Some(&self.client)
        }
    }

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn run_with(client: MockDatabaseResource) -> RunContext {
        let run = RunContext::new("test");
        run.resources()
            .declare("db", Arc::new(FakeDb { client }))
            .unwrap();
        run
    }

    #[test]
    fn test_query_returns_rows() {
        let mut client = MockDatabaseResource::new();
        client
            .expect_query()
            .withf(|sql| sql == "SELECT 1 AS one")
            .times(1)
            .returning(|_| Ok(vec![row(json!({"one": 1}))]));
        let run = run_with(client);

        let out = run_step(&run, &DatabaseQueryStep::new("db", "SELECT 1 AS one"), Message::Empty).unwrap();
        assert_eq!(out, Message::from(json!([{"one": 1}])));
    }

    #[test]
    fn test_query_reads_sql_file() {
        let mut file = tempfile::Builder::new().suffix(".sql").tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"SELECT 2").unwrap();

        let mut client = MockDatabaseResource::new();
        client
            .expect_query()
            .withf(|sql| sql == "SELECT 2")
            .returning(|_| Ok(Vec::new()));
        let run = run_with(client);

        let step = DatabaseQueryStep::new("db", file.path().to_string_lossy());
        assert_eq!(run_step(&run, &step, Message::Empty).unwrap(), Message::Sequence(Vec::new()));
    }

    #[test]
    fn test_undeclared_resource() {
        let run = RunContext::new("test");
        let err = run_step(&run, &DatabaseQueryStep::new("db", "SELECT 1"), Message::Empty).unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
    }

    #[test]
    fn test_no_op_resource_fails_on_use() {
        let run = RunContext::new("test");
        run.resources()
            .declare("db", Arc::new(EmptyResource::new("oracle", Map::new())))
            .unwrap();
        let err = run_step(&run, &DatabaseQueryStep::new("db", "SELECT 1"), Message::Empty).unwrap_err();
        assert!(err.to_string().contains("does not support database queries"));
    }

    #[test]
    fn test_ping_alive() {
        let mut client = MockDatabaseResource::new();
        client
            .expect_query()
            .withf(|sql| sql == PING_QUERY)
            .returning(|_| Ok(vec![row(json!({"alive": "alive"}))]));
        let run = run_with(client);

        let out = run_step(&run, &DatabasePingStep::new("db"), Message::Empty).unwrap();
        assert_eq!(out, Message::from(json!([{"alive": "alive"}])));
    }

    #[test]
    fn test_ping_wrong_answer_is_assertion() {
        let mut client = MockDatabaseResource::new();
        client.expect_query().returning(|_| Ok(Vec::new()));
        let run = run_with(client);

        let sink = CollectingEventSink::new();
        let config = RunConfig::default();
        let executor = Executor::new(&run, &sink, &config);
        let err = executor
            .execute_step(&DatabasePingStep::new("db"), Message::Empty)
            .unwrap_err();
        assert!(matches!(err, StepError::Assertion(_)));
        assert_eq!(
            err.failure().map(|f| f.stack.clone()),
            Some(vec!["DatabasePingStep".to_string(), "ValidateStep".to_string()])
        );
    }

    #[test]
    fn test_ping_query_error_is_fatal() {
        let mut client = MockDatabaseResource::new();
        client
            .expect_query()
            .returning(|_| Err(StepError::execution("connection refused")));
        let run = run_with(client);

        let sink = CollectingEventSink::new();
        let config = RunConfig::default();
        let executor = Executor::new(&run, &sink, &config);
        let err = executor
            .execute_step(&DatabasePingStep::new("db"), Message::Empty)
            .unwrap_err();
        assert!(matches!(err, StepError::Execution(_)));
        assert!(err.is_fatal());
    }
}
