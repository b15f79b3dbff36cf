//! Test: dependency resolution within a pipeline

use crate::helpers::*;
use flow::core::argument::Argument;
use flow::core::collection::{Collection, CollectionError, DEFAULT_PIPELINE_ID};
use flow::core::pipeline::ROOT_ID;
use flow::dag::DagError;
use std::sync::Arc;

fn adj(col: &Collection, id: i64) -> Vec<String> {
    col.pipeline(DEFAULT_PIPELINE_ID)
        .unwrap()
        .graph
        .adj(id)
        .iter()
        .map(|n| n.value.name.clone())
        .collect()
}

/// A producer is wired before its consumer
#[test]
fn test_produce_then_consume() {
    let arg = Argument::string("arg-a");
    let mut col = Collection::with_default_pipeline("P");
    col.add_steps(
        DEFAULT_PIPELINE_ID,
        vec![
            step(1, "produce").provides([arg.clone()]),
            step(2, "consume").requires([arg]),
        ],
    )
    .unwrap();

    col.build_edges(&[]).unwrap();

    assert_eq!(adj(&col, ROOT_ID), vec!["produce"]);
    assert_eq!(adj(&col, 1), vec!["consume"]);
}

/// Two producers of the same argument are rejected
#[test]
fn test_ambiguous_provider() {
    let arg = Argument::string("arg-b");
    let mut col = Collection::with_default_pipeline("Q");
    col.add_steps(
        DEFAULT_PIPELINE_ID,
        vec![
            step(1, "first").provides([arg.clone()]),
            step(2, "second").provides([arg.clone()]),
        ],
    )
    .unwrap();

    let err = col.build_edges(&[]).unwrap_err();
    assert!(matches!(&err, CollectionError::AmbiguousProvider { argument, .. } if *argument == arg));
    assert!(err.to_string().contains("arg-b"));
    assert!(!col.is_resolved());
}

/// A requirement nobody provides is rejected
#[test]
fn test_no_step_provider() {
    let arg = Argument::string("arg-c");
    let mut col = Collection::with_default_pipeline("R");
    col.add_steps(DEFAULT_PIPELINE_ID, vec![step(1, "orphan").requires([arg.clone()])])
        .unwrap();

    let err = col.build_edges(&[]).unwrap_err();
    assert!(matches!(&err, CollectionError::NoStepProvider { argument, step, .. }
        if *argument == arg && step == "orphan"));
}

/// An argument with the same key but another kind is a different dependency
#[test]
fn test_kind_is_part_of_identity() {
    let mut col = Collection::with_default_pipeline("P");
    col.add_steps(
        DEFAULT_PIPELINE_ID,
        vec![
            step(1, "produce").provides([Argument::string("count")]),
            step(2, "consume").requires([Argument::int64("count")]),
        ],
    )
    .unwrap();

    assert!(matches!(
        col.build_edges(&[]),
        Err(CollectionError::NoStepProvider { .. })
    ));
}

/// A rejected batch leaves the collection as it was
#[test]
fn test_duplicate_ids_add_nothing() {
    let mut col = Collection::with_default_pipeline("P");
    col.add_steps(DEFAULT_PIPELINE_ID, vec![step(1, "a")]).unwrap();

    let err = col
        .add_steps(DEFAULT_PIPELINE_ID, vec![step(2, "b"), step(1, "c")])
        .unwrap_err();
    assert_eq!(err, CollectionError::Graph(DagError::DuplicateId(1)));
    assert!(col.by_id(2).is_err());
    assert_eq!(col.by_name("a").unwrap().len(), 1);
}

/// Steps declared through a flow run after what they depend on, whatever
/// order they were added in
#[tokio::test]
async fn test_declaration_order_does_not_matter() {
    let source = Argument::directory("source");
    let binary = Argument::file("binary");
    let version = Argument::string("version");

    let client = Arc::new(RecordingClient::default());
    let mut flow = recording_flow(client.clone());
    flow.add(vec![
        noop("publish").requires([binary.clone(), version.clone()]),
        noop("compile").requires([source]).provides([binary]),
        noop("describe").provides([version]),
        noop("lint"),
    ])
    .unwrap();

    flow.execute(tokio_util::sync::CancellationToken::new()).await.unwrap();

    let order = client.order.lock();
    let (name, steps) = &order[0];
    assert_eq!(name, "scenario");
    assert_eq!(steps.len(), 4);
    assert_before(steps, "compile", "publish");
    assert_before(steps, "describe", "publish");
}
