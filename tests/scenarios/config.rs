//! Test: pipelines declared in YAML

use crate::helpers::*;
use flow::cli::commands::PipelineArgs;
use flow::client::cli::CliClient;
use flow::client::{Client, ClientRegistry};
use flow::core::argument::Argument;
use flow::core::config::FlowConfig;
use flow::core::state::{InMemoryState, StateHandler};
use flow::flow::Flow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PIPELINE: &str = r#"
name: release
arguments:
  version: string
  api-token: secret
pipelines:
  - name: publish
    requires: [version]
    steps:
      - name: upload
        run: ["echo uploading $FLOW_ARG_VERSION"]
        requires: [version]
        environment:
          TOKEN: { argument: api-token }
  - name: build
    when:
      - event: git-tag
        tag: { glob: "v*" }
    provides: [version]
    steps:
      - name: describe
        run: ["echo version=1.4.0 >> \"$FLOW_OUTPUT\""]
        provides: [version]
      - name: cache
        image: redis:7
        background: true
"#;

fn declare(client: &str, output: &Buffer) -> Flow {
    let config = FlowConfig::from_yaml(PIPELINE).unwrap();
    let args = PipelineArgs {
        client: client.to_string(),
        ..PipelineArgs::default()
    };
    let mut flow = Flow::new_multi(opts_with(args, output), &ClientRegistry::with_defaults()).unwrap();
    config.build(&mut flow).unwrap();
    flow
}

/// The YAML resolves into the same graph as code would
#[test]
fn test_config_resolves() {
    let output = Buffer::default();
    let mut flow = declare("graphviz", &output);
    flow.resolve().unwrap();

    let col = flow.collection();
    let names: Vec<&str> = col.pipelines().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["publish", "build"]);

    let upload = col.by_name("upload").unwrap();
    assert!(upload[0].action.is_some());
    assert_eq!(upload[0].image, flow::core::step::DEFAULT_IMAGE);
    assert!(col.by_name("cache").unwrap()[0].is_background());
}

/// Step IDs follow the order of the file, services included
#[test]
fn test_step_ids_follow_file_order() {
    let output = Buffer::default();
    let flow = declare("graphviz", &output);

    let col = flow.collection();
    let describe = col.by_id(4).unwrap();
    assert_eq!(describe.name, "describe");
    assert!(!describe.is_background());

    let cache = col.by_id(5).unwrap();
    assert_eq!(cache.name, "cache");
    assert!(cache.is_background());
}

/// Secrets stay out of the generated config
#[tokio::test]
async fn test_config_to_drone() {
    let output = Buffer::default();
    let mut flow = declare("drone", &output);
    flow.execute(CancellationToken::new()).await.unwrap();

    let yaml = output.contents();
    assert!(yaml.contains("from_secret: api-token"));
    assert!(yaml.contains("refs/tags/v*"));
    assert!(yaml.contains("image: redis:7"));
}

/// Runs locally with the cli client, sharing its state with the test
fn local_flow(args: PipelineArgs, output: &Buffer, state: Arc<InMemoryState>) -> Flow {
    let mut registry = ClientRegistry::new();
    registry.register("cli", move |opts| Ok(Box::new(CliClient::with_state(opts, state.clone())) as Box<dyn Client>));

    let config = FlowConfig::from_yaml(PIPELINE).unwrap();
    let mut flow = Flow::new_multi(opts_with(args, output), &registry).unwrap();
    config.build(&mut flow).unwrap();
    flow
}

/// Outputs written to $FLOW_OUTPUT reach the steps that require them
#[tokio::test]
async fn test_config_runs_locally() {
    let output = Buffer::default();
    let state = Arc::new(InMemoryState::new());
    let args = PipelineArgs {
        arguments: vec![("api-token".to_string(), "hunter2".to_string())],
        ..PipelineArgs::default()
    };

    let mut flow = local_flow(args, &output, state.clone());
    flow.execute(CancellationToken::new()).await.unwrap();

    assert_eq!(state.get_string(&Argument::string("version")).unwrap(), "1.4.0");
}

/// A single step runs on its own, without resolving the graph
#[tokio::test]
async fn test_config_single_step_locally() {
    let output = Buffer::default();
    let state = Arc::new(InMemoryState::new());
    // publish=1, upload=2, build=3, describe=4, cache=5
    let args = PipelineArgs {
        step: Some(4),
        ..PipelineArgs::default()
    };

    let mut flow = local_flow(args, &output, state.clone());
    flow.execute(CancellationToken::new()).await.unwrap();

    assert_eq!(state.get_string(&Argument::string("version")).unwrap(), "1.4.0");
}
