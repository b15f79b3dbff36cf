//! Shared fixtures for the scenario tests

use flow::client::{Client, CommonOpts, ValidationError};
use flow::cli::commands::PipelineArgs;
use flow::core::collection::{Collection, CollectionError};
use flow::core::step::{action, named_step, Sink, Step};
use flow::dag::Visit;
use flow::flow::Flow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output buffer that can stand in for a [`Sink`]
#[derive(Clone, Default)]
pub struct Buffer(pub Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn sink(&self) -> Sink {
        self.0.clone()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

pub fn opts_with(args: PipelineArgs, output: &Buffer) -> CommonOpts {
    CommonOpts {
        name: "scenario".to_string(),
        version: "0.0.0".to_string(),
        args,
        argument_kinds: Default::default(),
        entrypoint: "flow run --file ci.yaml".to_string(),
        output: output.sink(),
    }
}

pub fn opts(output: &Buffer) -> CommonOpts {
    opts_with(PipelineArgs::default(), output)
}

/// A step with an action that does nothing
pub fn noop(name: &str) -> Step {
    named_step(name, Some(action(|_, _| async { Ok(()) })))
}

/// A step with an explicit ID, for collections built without a [`Flow`]
pub fn step(id: i64, name: &str) -> Step {
    let mut s = named_step(name, None);
    s.id = id;
    s
}

/// Records the step order it sees for every pipeline, and what it was asked
/// to validate
#[derive(Default)]
pub struct RecordingClient {
    pub validated: Mutex<Vec<String>>,
    pub order: Mutex<Vec<(String, Vec<String>)>>,
    pub skip: Vec<String>,
}

impl RecordingClient {
    pub fn skipping(names: &[&str]) -> Self {
        Self {
            skip: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Client for RecordingClient {
    fn validate(&self, step: &Step) -> Result<(), ValidationError> {
        self.validated.lock().push(step.name.clone());
        if self.skip.contains(&step.name) {
            return Err(ValidationError::Skip(format!("{} is skipped", step.name)));
        }
        Ok(())
    }

    async fn done(&self, _cancel: CancellationToken, collection: &Collection) -> anyhow::Result<()> {
        let mut pipelines = Vec::new();
        collection.traverse_pipelines::<CollectionError, _>(|p| {
            pipelines.push((p.id, p.name.clone()));
            Ok(Visit::Continue)
        })?;

        let mut order = self.order.lock();
        for (id, name) in pipelines {
            let mut steps = Vec::new();
            collection.traverse_steps::<CollectionError, _>(id, |s| {
                steps.push(s.name.clone());
                Ok(Visit::Continue)
            })?;
            order.push((name, steps));
        }
        Ok(())
    }
}

/// A flow wired to a [`RecordingClient`]
pub fn recording_flow(client: Arc<RecordingClient>) -> Flow {
    Flow::with_client(opts(&Buffer::default()), client)
}

/// Assert that `before` appears ahead of `after` in `order`
pub fn assert_before(order: &[String], before: &str, after: &str) {
    let position = |name: &str| {
        order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("'{}' not found in {:?}", name, order))
    };
    assert!(
        position(before) < position(after),
        "Expected '{}' before '{}', got: {:?}",
        before,
        after,
        order
    );
}
