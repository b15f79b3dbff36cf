//! Test: producer cycles are rejected

use crate::helpers::*;
use flow::core::argument::Argument;
use flow::core::collection::{Collection, CollectionError, DEFAULT_PIPELINE_ID};
use flow::core::pipeline::Pipeline;

#[test]
fn test_step_cycle() {
    let a = Argument::string("a");
    let b = Argument::string("b");
    let mut col = Collection::with_default_pipeline("loop");
    col.add_steps(
        DEFAULT_PIPELINE_ID,
        vec![
            step(1, "start"),
            step(2, "ping").requires([a.clone()]).provides([b.clone()]),
            step(3, "pong").requires([b]).provides([a]),
        ],
    )
    .unwrap();

    let err = col.build_edges(&[]).unwrap_err();
    match err {
        CollectionError::CyclicDependency { scope, members } => {
            assert_eq!(scope, "loop");
            assert!(members.contains(&"ping".to_string()));
            assert!(members.contains(&"pong".to_string()));
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert!(!col.is_resolved());
}

#[test]
fn test_pipeline_cycle() {
    let a = Argument::string("a");
    let b = Argument::string("b");
    let mut col = Collection::new();
    col.add_pipelines(vec![
        Pipeline::new("first", 1).requires([a.clone()]).provides([b.clone()]),
        Pipeline::new("second", 2).requires([b]).provides([a]),
    ])
    .unwrap();

    assert!(matches!(
        col.build_edges(&[]),
        Err(CollectionError::CyclicDependency { scope, .. }) if scope == "pipelines"
    ));
}
