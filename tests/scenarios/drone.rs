//! Test: generating a Drone config

use crate::helpers::*;
use flow::client::ClientRegistry;
use flow::cli::commands::PipelineArgs;
use flow::core::argument::Argument;
use flow::core::event::{git_commit_event, FilterValue, GitCommitFilters};
use flow::core::step::named_step;
use flow::flow::Flow;
use tokio_util::sync::CancellationToken;

fn drone_flow(output: &Buffer) -> Flow {
    let args = PipelineArgs {
        client: "drone".to_string(),
        ..PipelineArgs::default()
    };
    Flow::new(opts_with(args, output), &ClientRegistry::with_defaults()).unwrap()
}

/// Secrets are referenced by name and never written out
#[tokio::test]
async fn test_secrets_render_as_from_secret() {
    let token = Argument::secret("registry-token");
    let image = Argument::string("image");
    let output = Buffer::default();
    let mut flow = drone_flow(&output);

    flow.external([token.clone()]);
    flow.when(vec![git_commit_event(GitCommitFilters {
        branch: Some(FilterValue::string("main")),
    })])
    .unwrap();
    flow.add(vec![
        noop("build").with_image("docker:24").provides([image.clone()]),
        noop("push")
            .with_image("docker:24")
            .requires([image])
            .with_env_var("REGISTRY_TOKEN", token)
            .with_env_var("REGISTRY", "ghcr.io"),
    ])
    .unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();

    let yaml = output.contents();
    assert!(yaml.starts_with("---\n"));
    assert!(yaml.contains("kind: pipeline"));
    assert!(yaml.contains("name: scenario"));
    assert!(yaml.contains("from_secret: registry-token"));
    assert!(yaml.contains("REGISTRY: ghcr.io"));
    assert!(yaml.contains("flow run --file ci.yaml --client cli --step 2"));
    assert!(yaml.contains("- push"));
    assert!(yaml.contains("- main"));
}

/// Services and pipeline dependencies
#[tokio::test]
async fn test_services_and_pipeline_dependencies() {
    let version = Argument::string("version");
    let output = Buffer::default();
    let mut flow = drone_flow(&output);

    let v = version.clone();
    let build = flow
        .pipeline("build", move |f| {
            f.background(vec![named_step("postgres", None).with_image("postgres:15")])?;
            f.add(vec![noop("describe").provides([v])])
        })
        .unwrap()
        .provides([version.clone()]);
    let publish = flow
        .pipeline("publish", |f| f.add(vec![noop("upload")]))
        .unwrap()
        .requires([version]);
    flow.add_pipelines(vec![build, publish]).unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();

    let yaml = output.contents();
    // default, build and publish
    assert_eq!(yaml.matches("---\n").count(), 3);
    assert!(yaml.contains("services:"));
    assert!(yaml.contains("image: postgres:15"));
    assert!(yaml.contains("depends_on:\n- build"));
}
