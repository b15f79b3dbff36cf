//! Test: dependencies between pipelines

use crate::helpers::*;
use flow::core::argument::Argument;
use flow::core::collection::CollectionError;
use flow::flow::FlowError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A pipeline that requires an argument runs after the pipeline providing it
#[tokio::test]
async fn test_pipeline_order_follows_arguments() {
    let version = Argument::string("version");
    let client = Arc::new(RecordingClient::default());
    let mut flow = recording_flow(client.clone());

    let v = version.clone();
    let publish = flow
        .pipeline("publish", |f| f.add(vec![noop("upload").requires([Argument::string("version")])]))
        .unwrap()
        .requires([version.clone()]);
    let build = flow
        .pipeline("build", move |f| f.add(vec![noop("describe").provides([v])]))
        .unwrap()
        .provides([version]);
    flow.add_pipelines(vec![publish, build]).unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();

    let names: Vec<String> = client.order.lock().iter().map(|(name, _)| name.clone()).collect();
    assert_before(&names, "build", "publish");
}

/// A pipeline requirement nobody provides is rejected
#[test]
fn test_no_pipeline_provider() {
    let mut flow = recording_flow(Arc::new(RecordingClient::default()));
    let publish = flow
        .pipeline("publish", |f| f.add(vec![noop("upload")]))
        .unwrap()
        .requires([Argument::string("version")]);
    flow.add_pipelines(vec![publish]).unwrap();

    let err = flow.resolve().unwrap_err();
    assert!(matches!(
        err,
        FlowError::Collection(CollectionError::NoPipelineProvider { ref pipeline, .. }) if pipeline == "publish"
    ));
}

/// Two pipelines providing the same argument are rejected
#[test]
fn test_ambiguous_pipeline_provider() {
    let version = Argument::string("version");
    let mut flow = recording_flow(Arc::new(RecordingClient::default()));
    let a = flow.pipeline("a", |_| Ok(())).unwrap().provides([version.clone()]);
    let b = flow.pipeline("b", |_| Ok(())).unwrap().provides([version]);
    flow.add_pipelines(vec![a, b]).unwrap();

    assert!(matches!(
        flow.resolve(),
        Err(FlowError::Collection(CollectionError::AmbiguousProvider { .. }))
    ));
}

/// Traversal stops descending below a pipeline when told to
#[test]
fn test_walk_stops() {
    let mut flow = recording_flow(Arc::new(RecordingClient::default()));
    let pipelines = ["a", "b", "c"]
        .iter()
        .map(|name| flow.pipeline(name, |_| Ok(())).unwrap())
        .collect();
    flow.add_pipelines(pipelines).unwrap();

    let mut seen = Vec::new();
    flow.collection()
        .walk_pipelines::<CollectionError, _>(|p| {
            seen.push(p.name.clone());
            Ok(if p.name == "b" {
                flow::dag::Visit::Stop
            } else {
                flow::dag::Visit::Continue
            })
        })
        .unwrap();
    // the default pipeline comes first
    assert_eq!(seen, vec!["scenario", "a", "b"]);
}
