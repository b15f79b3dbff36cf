//! Test: drawing the graph

use crate::helpers::*;
use flow::client::ClientRegistry;
use flow::cli::commands::PipelineArgs;
use flow::core::argument::Argument;
use flow::flow::Flow;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_dot_output() {
    let binary = Argument::file("binary");
    let output = Buffer::default();
    let args = PipelineArgs {
        client: "graphviz".to_string(),
        ..PipelineArgs::default()
    };
    let mut flow = Flow::new(opts_with(args, &output), &ClientRegistry::with_defaults()).unwrap();

    flow.add(vec![
        noop("compile").provides([binary.clone()]),
        noop("test").requires([binary]),
    ])
    .unwrap();
    flow.execute(CancellationToken::new()).await.unwrap();

    let dot = output.contents();
    assert!(dot.starts_with("digraph flow {"));
    assert!(dot.contains("subgraph cluster_1 {"));
    assert!(dot.contains("label=\"scenario\";"));
    assert!(dot.contains("pipeline_1_root -> step_1;"));
    assert!(dot.contains("step_1 -> step_2;"));
    assert!(dot.trim_end().ends_with('}'));
}
