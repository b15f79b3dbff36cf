//! Test: client validation while declaring

use crate::helpers::*;
use flow::client::ClientRegistry;
use flow::cli::commands::PipelineArgs;
use flow::core::step::named_step;
use flow::flow::{Flow, FlowError};
use std::sync::Arc;

/// A skipped step is still registered
#[test]
fn test_skip_is_a_warning() {
    let client = Arc::new(RecordingClient::skipping(&["service"]));
    let mut flow = recording_flow(client.clone());

    flow.add(vec![noop("build"), named_step("service", None)]).unwrap();

    assert_eq!(*client.validated.lock(), vec!["build", "service"]);
    assert_eq!(flow.collection().by_name("service").unwrap().len(), 1);
}

/// The drone client refuses a step without an image and names the step
#[test]
fn test_invalid_step_aborts_with_context() {
    let output = Buffer::default();
    let args = PipelineArgs {
        client: "drone".to_string(),
        ..PipelineArgs::default()
    };
    let mut flow = Flow::new(opts_with(args, &output), &ClientRegistry::with_defaults()).unwrap();

    flow.add(vec![noop("first")]).unwrap();
    let mut blank = noop("blank");
    blank.image = " ".to_string();
    let err = flow.add(vec![blank]).unwrap_err();

    assert!(matches!(err, FlowError::Validation { id: 2, .. }));
    assert_eq!(err.to_string(), "[name: blank, id: 2] drone steps need an image");
}

/// The local runner skips steps it has nothing to run for
#[test]
fn test_cli_skips_steps_without_action() {
    let output = Buffer::default();
    let mut flow = Flow::new(opts(&output), &ClientRegistry::with_defaults()).unwrap();

    flow.background(vec![named_step("postgres", None).with_image("postgres:15")])
        .unwrap();
    assert!(flow.collection().by_id(1).unwrap().is_background());
}
