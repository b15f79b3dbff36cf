//! Test: the cli client runs steps locally

use crate::helpers::*;
use flow::client::cli::CliClient;
use flow::client::Client;
use flow::cli::commands::{PipelineArgs, SchedulingStrategyArg};
use flow::core::argument::{Argument, ArgumentType};
use flow::core::state::StateHandler;
use flow::core::step::{action, named_step};
use flow::flow::{Flow, FlowError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn local_flow(args: PipelineArgs, output: &Buffer) -> (Flow, Arc<CliClient>) {
    let client = Arc::new(CliClient::new(&opts_with(args.clone(), output)));
    let flow = Flow::with_client(opts_with(args, output), client.clone());
    (flow, client)
}

/// Values flow from producer to consumer through the state
#[tokio::test]
async fn test_state_hand_off() {
    let version = Argument::string("version");
    let tag = Argument::string("tag");
    let output = Buffer::default();
    let (mut flow, client) = local_flow(PipelineArgs::default(), &output);

    let ran = Arc::new(Mutex::new(Vec::new()));
    let (r1, r2) = (ran.clone(), ran.clone());
    let (v1, v2, t2) = (version.clone(), version.clone(), tag.clone());

    flow.add(vec![
        named_step(
            "tag",
            Some(action(move |_, opts| {
                let (r, v, t) = (r2.clone(), v2.clone(), t2.clone());
                async move {
                    r.lock().push("tag");
                    let version = opts.state.get_string(&v)?;
                    opts.state.set_string(&t, &format!("v{}", version))?;
                    Ok(())
                }
            })),
        )
        .requires([version.clone()])
        .provides([tag.clone()]),
        named_step(
            "describe",
            Some(action(move |_, opts| {
                let (r, v) = (r1.clone(), v1.clone());
                async move {
                    r.lock().push("describe");
                    opts.state.set_string(&v, "1.2.3")?;
                    Ok(())
                }
            })),
        )
        .provides([version]),
    ])
    .unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();

    assert_eq!(*ran.lock(), vec!["describe", "tag"]);
    assert_eq!(client.state().get_string(&tag).unwrap(), "v1.2.3");

    let printed = output.contents();
    assert!(printed.contains("describe"));
    assert!(printed.contains("completed"));
}

/// The first failing step fails the run and its dependents never start
#[tokio::test]
async fn test_failure_stops_dependents() {
    let artifact = Argument::file("artifact");
    let output = Buffer::default();
    let (mut flow, _client) = local_flow(PipelineArgs::default(), &output);

    let uploaded = Arc::new(Mutex::new(false));
    let u = uploaded.clone();
    flow.add(vec![
        named_step(
            "compile",
            Some(action(|_, _| async { Err::<(), _>(anyhow::anyhow!("exit status 2")) })),
        )
        .provides([artifact.clone()]),
        named_step(
            "upload",
            Some(action(move |_, _| {
                let u = u.clone();
                async move {
                    *u.lock() = true;
                    Ok(())
                }
            })),
        )
        .requires([artifact]),
    ])
    .unwrap();

    let err = flow.execute(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, FlowError::Client(_)));
    assert!(!*uploaded.lock());
    assert!(output.contents().contains("exit status 2"));
}

/// Background steps are stopped once the rest of the pipeline is done
#[tokio::test]
async fn test_background_runs_alongside() {
    let output = Buffer::default();
    let args = PipelineArgs {
        strategy: SchedulingStrategyArg::Parallel,
        ..PipelineArgs::default()
    };
    let (mut flow, _client) = local_flow(args, &output);

    flow.background(vec![named_step(
        "server",
        Some(action(|cancel, _| async move {
            cancel.cancelled().await;
            Ok(())
        })),
    )])
    .unwrap();
    flow.add(vec![named_step(
        "client",
        Some(action(|_, _| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        })),
    )])
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), flow.execute(CancellationToken::new()))
        .await
        .expect("background step kept the pipeline alive")
        .unwrap();
}

/// `--step` runs one step with arguments given on the command line
#[tokio::test]
async fn test_single_step() {
    let name = Argument::string("name");
    let greeting = Argument::string("greeting");
    let output = Buffer::default();
    let args = PipelineArgs {
        step: Some(2),
        arguments: vec![("name".to_string(), "flow".to_string())],
        ..PipelineArgs::default()
    };
    let (mut flow, client) = local_flow(args, &output);

    let (n, g) = (name.clone(), greeting.clone());
    flow.add(vec![
        named_step("unrelated", Some(action(|_, _| async { Err::<(), _>(anyhow::anyhow!("should not run")) }))),
        named_step(
            "greet",
            Some(action(move |_, opts| {
                let (n, g) = (n.clone(), g.clone());
                async move {
                    let name = opts.state.get_string(&n)?;
                    opts.state.set_string(&g, &format!("hello {}", name))?;
                    Ok(())
                }
            })),
        )
        .requires([name])
        .provides([greeting.clone()]),
    ])
    .unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();
    assert_eq!(client.state().get_string(&greeting).unwrap(), "hello flow");
    assert!(client.provides().iter().any(|a| a.key == "build-id"));
}

/// `--arg` values are provided by the root, so a full run resolves
#[tokio::test]
async fn test_arg_satisfies_requirement() {
    let version = Argument::string("version");
    let seen = Argument::string("seen");
    let output = Buffer::default();
    let args = PipelineArgs {
        arguments: vec![("version".to_string(), "1.0".to_string())],
        ..PipelineArgs::default()
    };
    let (mut flow, client) = local_flow(args, &output);

    let (v, s) = (version.clone(), seen.clone());
    flow.add(vec![named_step(
        "publish",
        Some(action(move |_, opts| {
            let (v, s) = (v.clone(), s.clone());
            async move {
                let version = opts.state.get_string(&v)?;
                opts.state.set_string(&s, &version)?;
                Ok(())
            }
        })),
    )
    .requires([version.clone()])
    .provides([seen.clone()])])
    .unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();
    assert_eq!(client.state().get_string(&seen).unwrap(), "1.0");
    assert!(client.provides().contains(&version));
}

/// A declared kind types the `--arg` value
#[tokio::test]
async fn test_arg_uses_declared_kind() {
    let count = Argument::int64("count");
    let doubled = Argument::int64("doubled");
    let output = Buffer::default();
    let args = PipelineArgs {
        arguments: vec![("count".to_string(), "21".to_string())],
        ..PipelineArgs::default()
    };
    let mut opts = opts_with(args, &output);
    opts.argument_kinds.insert("count".to_string(), ArgumentType::Int64);

    let client = Arc::new(CliClient::new(&opts));
    assert!(client.provides().contains(&count));
    assert!(!client.provides().contains(&Argument::string("count")));

    let mut flow = Flow::with_client(opts, client.clone());
    let (c, d) = (count.clone(), doubled.clone());
    flow.add(vec![named_step(
        "double",
        Some(action(move |_, opts| {
            let (c, d) = (c.clone(), d.clone());
            async move {
                let n = opts.state.get_int64(&c)?;
                opts.state.set_int64(&d, n * 2)?;
                Ok(())
            }
        })),
    )
    .requires([count])
    .provides([doubled.clone()])])
    .unwrap();

    flow.execute(CancellationToken::new()).await.unwrap();
    assert_eq!(client.state().get_int64(&doubled).unwrap(), 42);
}
