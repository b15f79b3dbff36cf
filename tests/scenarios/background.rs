//! Test: background steps

use crate::helpers::*;
use flow::core::argument::Argument;
use flow::core::collection::DEFAULT_PIPELINE_ID;
use flow::core::pipeline::ROOT_ID;
use flow::core::step::named_step;
use std::sync::Arc;

/// A background step hangs off the root even when it requires something
#[test]
fn test_background_steps_are_rooted() {
    let url = Argument::string("db-url");
    let client = Arc::new(RecordingClient::default());
    let mut flow = recording_flow(client);

    flow.add(vec![noop("config").provides([url.clone()])]).unwrap();
    flow.background(vec![named_step("db", None).with_image("postgres:15").requires([url])])
        .unwrap();
    flow.resolve().unwrap();

    let pipeline = flow.collection().pipeline(DEFAULT_PIPELINE_ID).unwrap();
    let rooted: Vec<&str> = pipeline
        .graph
        .adj(ROOT_ID)
        .iter()
        .map(|n| n.value.name.as_str())
        .collect();
    assert!(rooted.contains(&"db"));
    assert!(rooted.contains(&"config"));
    // and still waits for its provider
    assert_eq!(pipeline.dependencies_of(2), vec![1]);
}
