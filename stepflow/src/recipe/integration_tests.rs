//! End-to-end runs of whole recipes.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::config::CloseTiming;
use crate::errors::ErrorKind;
use crate::events::CollectingEventSink;
use crate::resources::Resource;
use crate::steps::common::{
    Base64DecodeStep, Base64EncodeStep, DeclareResourceStep, EchoStep, FailStep,
    ReadFileStep, SaveToStorageStep, ShortCircuitStep,
};
use crate::steps::mutate::SelectStep;
use crate::steps::{ForEachStep, StepBuilder};
use crate::testing::{assert_invocations, FailingStep, RecordingStep};

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn finished_outcome(sink: &CollectingEventSink) -> Option<RunOutcome> {
    sink.events_of_type("run.finished")
        .into_iter()
        .find_map(|e| match e {
            RunEvent::Finished { outcome, .. } => Some(outcome),
            _ => None,
        })
}

#[derive(Debug)]
struct CountingResource {
    closes: Arc<AtomicUsize>,
}

impl Resource for CountingResource {
    fn engine(&self) -> &str {
        "counting"
    }

    fn describe(&self) -> String {
        "counting resource".to_string()
    }

    fn close(&self) -> Result<(), StepError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting_factory(closes: &Arc<AtomicUsize>) -> ResourceFactory {
    let closes = Arc::clone(closes);
    ResourceFactory::new().with_engine(
        "counting",
        Box::new(move |_| -> Result<Arc<dyn Resource>, StepError> {
            Ok(Arc::new(CountingResource {
                closes: Arc::clone(&closes),
            }))
        }),
    )
}

#[test]
fn test_short_circuit_skips_fail_step() {
    let mut recipe = Recipe::new(
        "short circuit",
        vec![
            ShortCircuitStep::when(|_, _| true).into(),
            FailStep::new().into(),
        ],
    );
    assert_eq!(recipe.bake().unwrap(), json!({}));
}

#[test]
fn test_fail_step_runs_without_short_circuit() {
    let mut recipe = Recipe::new(
        "short circuit",
        vec![
            ShortCircuitStep::when(|_, _| false).into(),
            FailStep::new().into(),
        ],
    );
    let err = recipe.bake().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    match err {
        RecipeError::Step { step, .. } => assert_eq!(step, "FailStep(FailStep)"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_templated_params() {
    let mut recipe = Recipe::new(
        "hello",
        vec![EchoStep::new("Hello {{ storage.params.dest }}!").into()],
    );
    recipe.prepare(params(json!({"dest": "world"}))).unwrap();
    assert_eq!(recipe.bake().unwrap(), json!("Hello world!"));
}

#[test]
fn test_base64_round_trip_through_callbacks() {
    let mut encode = Recipe::new(
        "encode",
        vec![EchoStep::new("stepflow rocks")
            .with_callback(Base64EncodeStep::new())
            .into()],
    );
    assert_eq!(encode.bake().unwrap(), json!("c3RlcGZsb3cgcm9ja3M="));

    let mut decode = Recipe::new(
        "decode",
        vec![
            EchoStep::new("c3RlcGZsb3cgcm9ja3M=").into(),
            Base64DecodeStep::new().into(),
        ],
    );
    assert_eq!(decode.bake().unwrap(), json!("stepflow rocks"));
}

#[test]
fn test_top_level_steps_receive_params() {
    let recorder = RecordingStep::new();
    let mut recipe = Recipe::new("inputs", vec![recorder.clone().into()]);
    recipe.prepare(params(json!({"key": "value"}))).unwrap();
    assert_eq!(recipe.bake().unwrap(), json!({"key": "value"}));
    assert_eq!(recorder.inputs(), vec![json!({"key": "value"})]);
}

#[test]
fn test_execute_prepares_empty_params() {
    let mut recipe = Recipe::new("unprepared", vec![EchoStep::new("x").into()]);
    recipe.execute().unwrap();
    assert_eq!(recipe.storage().get("params"), Some(json!({})));
}

#[test]
fn test_requirement_stops_the_run_cleanly() {
    let sink = Arc::new(CollectingEventSink::new());
    let after = RecordingStep::new();
    let mut recipe = Recipe::new(
        "requirement",
        vec![
            EchoStep::new("first").into(),
            FailingStep::new(ErrorKind::Requirement, "no rows").into(),
            after.clone().into(),
        ],
    )
    .with_event_sink(sink.clone());

    assert_eq!(recipe.execute().unwrap(), Message::from("first"));
    assert_invocations(&after, 0);
    assert_eq!(finished_outcome(&sink), Some(RunOutcome::Stopped));
}

#[test]
fn test_params_from_a_step() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(br#"{"prod": {"name": "production"}, "dev": {"name": "development"}}"#)
        .unwrap();

    let settings = ReadFileStep::new(file.path().to_string_lossy())
        .with_callback(SelectStep::new("prod"));
    let mut recipe = Recipe::new(
        "settings",
        vec![EchoStep::new("Environment is {{ storage.params.name }}").into()],
    );
    recipe.prepare(Node::from(settings)).unwrap();
    assert_eq!(recipe.bake().unwrap(), json!("Environment is production"));
}

#[test]
fn test_params_step_must_produce_a_mapping() {
    let mut recipe = Recipe::new("settings", Vec::new());
    let err = recipe
        .prepare(Node::from(EchoStep::new("not a mapping")))
        .unwrap_err();
    assert!(matches!(err, RecipeError::Params(StepError::Validation(_))));
}

#[test]
fn test_resources_closed_at_run_end() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut recipe = Recipe::new(
        "resources",
        vec![DeclareResourceStep::new("db", json!({"engine": "counting", "dsn": "x"})).into()],
    )
    .with_resource_factory(counting_factory(&closes));

    recipe.execute().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(recipe.resources().len(), 1);
    assert_eq!(recipe.summary().resources, 1);
}

#[test]
fn test_resources_closed_on_failure() {
    let closes = Arc::new(AtomicUsize::new(0));
    let mut recipe = Recipe::new(
        "resources",
        vec![
            DeclareResourceStep::new("db", json!({"engine": "counting"})).into(),
            FailStep::new().into(),
        ],
    )
    .with_resource_factory(counting_factory(&closes))
    .with_config(RunConfig::new().with_close_timing(CloseTiming::EachStep));

    assert!(recipe.execute().is_err());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_run_events() {
    let sink = Arc::new(CollectingEventSink::new());
    let mut recipe = Recipe::new(
        "events",
        vec![ForEachStep::new([EchoStep::new("{{ inputs }}").into()])
            .with_seq(json!([1, 2]))
            .into()],
    )
    .with_event_sink(sink.clone());
    let run_id = recipe.run_id();

    assert_eq!(recipe.bake().unwrap(), json!("2"));

    let started = sink.events_of_type("run.started");
    assert_eq!(started.len(), 1);
    match &started[0] {
        RunEvent::Started {
            title,
            run_id: id,
            summary,
            ..
        } => {
            assert_eq!(title, "events");
            assert_eq!(*id, run_id);
            assert_eq!(
                *summary,
                RunSummary {
                    sections: 1,
                    steps: 2,
                    resources: 0
                }
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(finished_outcome(&sink), Some(RunOutcome::Completed));
}

#[test]
fn test_fatal_error_outcome() {
    let sink = Arc::new(CollectingEventSink::new());
    let mut recipe =
        Recipe::new("fatal", vec![FailStep::new().into()]).with_event_sink(sink.clone());
    assert!(recipe.execute().is_err());
    assert_eq!(finished_outcome(&sink), Some(RunOutcome::Failed));
    assert_eq!(sink.failures().len(), 1);
}

#[test]
fn test_storage_survives_the_run() {
    let mut recipe = Recipe::new("storage", Vec::new())
        .with_step(EchoStep::new(42))
        .with_step(SaveToStorageStep::new("answer"));
    recipe.execute().unwrap();
    assert_eq!(recipe.storage().get("answer"), Some(json!(42)));
}
