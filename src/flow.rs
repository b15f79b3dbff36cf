//! The declaration API pipelines are written against
//!
//! A [`Flow`] owns the [`Collection`] being declared and the client that will
//! consume it. It hands out step IDs from a counter shared with every
//! sub-pipeline, so the n-th declared step has the same ID no matter which
//! client runs it; `--step <id>` relies on that.

use crate::client::{Client, ClientRegistry, CommonOpts, RegistryError, ValidationError};
use crate::core::argument::Argument;
use crate::core::collection::{Collection, CollectionError};
use crate::core::event::Event;
use crate::core::pipeline::{Pipeline, PipelineType};
use crate::core::step::{step_names, Step, StepType, DEFAULT_IMAGE};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use crate::core::collection::DEFAULT_PIPELINE_ID;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("error adding steps '[{steps}]' to collection: {source}")]
    AddSteps { steps: String, source: CollectionError },

    /// A client rejected a step
    #[error("[name: {name}, id: {id}] {source}")]
    Validation {
        name: String,
        id: i64,
        source: ValidationError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Client(anyhow::Error),

    #[error("interrupted")]
    Interrupted,
}

/// Hands out step and pipeline IDs
#[derive(Debug, Clone)]
struct Counter(Arc<AtomicI64>);

impl Counter {
    fn new() -> Self {
        Self(Arc::new(AtomicI64::new(1)))
    }

    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Declares pipelines and runs them with a client.
///
/// Not meant to be shared between threads while declaring.
pub struct Flow {
    client: Arc<dyn Client>,
    collection: Collection,
    opts: CommonOpts,
    counter: Counter,
    pipeline: i64,

    /// Provided by the root alongside the client's arguments
    external: Vec<Argument>,
}

impl Flow {
    /// A flow with a single pipeline named after `opts.name`
    pub fn new(opts: CommonOpts, registry: &ClientRegistry) -> Result<Self, FlowError> {
        let client = init_client(&opts, registry)?;
        Ok(Self::with_client(opts, client))
    }

    /// A flow without a default pipeline; pipelines are declared with
    /// [`Flow::pipeline`] and added with [`Flow::add_pipelines`]
    pub fn new_multi(opts: CommonOpts, registry: &ClientRegistry) -> Result<Self, FlowError> {
        let client = init_client(&opts, registry)?;
        Ok(Self {
            client,
            collection: Collection::new(),
            opts,
            counter: Counter::new(),
            pipeline: DEFAULT_PIPELINE_ID,
            external: Vec::new(),
        })
    }

    /// Use a specific client instead of looking one up
    pub fn with_client(opts: CommonOpts, client: Arc<dyn Client>) -> Self {
        let name = if opts.name.is_empty() { "default" } else { opts.name.as_str() };
        Self {
            client,
            collection: Collection::with_default_pipeline(name),
            opts,
            counter: Counter::new(),
            pipeline: DEFAULT_PIPELINE_ID,
            external: Vec::new(),
        }
    }

    /// ID of the pipeline steps are currently added to
    pub fn pipeline_id(&self) -> i64 {
        self.pipeline
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn opts(&self) -> &CommonOpts {
        &self.opts
    }

    /// Add steps to the current pipeline. Their order is worked out from
    /// what they require and provide, not from the order they're added in.
    pub fn add(&mut self, steps: Vec<Step>) -> Result<(), FlowError> {
        let steps = self.setup(steps);
        self.validate(&steps)?;
        self.add_validated(steps)
    }

    /// Add steps that run for the lifetime of the pipeline. A step without
    /// an action runs its image's default command.
    pub fn background(&mut self, steps: Vec<Step>) -> Result<(), FlowError> {
        let steps: Vec<Step> = steps
            .into_iter()
            .map(|s| s.with_type(StepType::Background))
            .collect();
        self.add(steps)
    }

    /// Set the events that trigger the current pipeline, replacing any
    /// that were set before
    pub fn when(&mut self, events: Vec<Event>) -> Result<(), FlowError> {
        self.collection.add_events(self.pipeline, events)?;
        Ok(())
    }

    /// Declare a sub-pipeline. `declare` adds its steps; the returned
    /// pipeline is added with [`Flow::add_pipelines`], usually after setting
    /// what it requires and provides.
    pub fn pipeline<F>(&mut self, name: &str, declare: F) -> Result<Pipeline, FlowError>
    where
        F: FnOnce(&mut Flow) -> Result<(), FlowError>,
    {
        let mut id = self.counter.next();
        while self.collection.pipeline(id).is_ok() {
            id = self.counter.next();
        }

        let mut collection = Collection::new();
        collection.add_pipelines(vec![Pipeline::new(name, id).with_type(PipelineType::Sub)])?;

        let mut sub = Flow {
            client: Arc::clone(&self.client),
            collection,
            opts: self.opts.clone(),
            counter: self.counter.clone(),
            pipeline: id,
            external: Vec::new(),
        };
        declare(&mut sub)?;

        Ok(sub.collection.pipeline(id)?.clone())
    }

    pub fn add_pipelines(&mut self, pipelines: Vec<Pipeline>) -> Result<(), FlowError> {
        self.collection.add_pipelines(pipelines)?;
        Ok(())
    }

    /// Apply the default image and hand out IDs
    fn setup(&self, steps: Vec<Step>) -> Vec<Step> {
        steps
            .into_iter()
            .map(|mut step| {
                if step.image.is_empty() {
                    step.image = DEFAULT_IMAGE.to_string();
                }
                step.id = self.counter.next();
                if step.name.is_empty() {
                    step.name = format!("unnamed-step-{}", step.id);
                }
                step
            })
            .collect()
    }

    fn validate(&self, steps: &[Step]) -> Result<(), FlowError> {
        for step in steps {
            match self.client.validate(step) {
                Ok(()) => {}
                Err(ValidationError::Skip(reason)) => {
                    warn!("[name: {}, id: {}] skipping validation: {}", step.name, step.id, reason);
                }
                Err(source) => {
                    return Err(FlowError::Validation {
                        name: step.name.clone(),
                        id: step.id,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn add_validated(&mut self, steps: Vec<Step>) -> Result<(), FlowError> {
        let names = step_names(&steps).join(", ");
        self.collection
            .add_steps(self.pipeline, steps)
            .map_err(|source| FlowError::AddSteps { steps: names, source })
    }

    /// Mark arguments as supplied from outside the pipeline, such as
    /// secrets held by the CI system
    pub fn external(&mut self, args: impl IntoIterator<Item = Argument>) {
        for arg in args {
            if !self.external.contains(&arg) {
                self.external.push(arg);
            }
        }
    }

    /// Build every edge, with the client's arguments and the external ones
    /// supplied by the root
    pub fn resolve(&mut self) -> Result<(), FlowError> {
        let mut args = self.client.provides();
        for arg in &self.external {
            if !args.contains(arg) {
                args.push(arg.clone());
            }
        }
        self.collection.build_edges(&args)?;
        Ok(())
    }

    /// Resolve the collection and hand it to the client.
    ///
    /// When a single step was requested the graph is not resolved; the
    /// client runs that step on its own.
    pub async fn execute(&mut self, cancel: CancellationToken) -> Result<(), FlowError> {
        if self.opts.args.step.is_none() {
            self.resolve()?;
        }

        self.client
            .done(cancel, &self.collection)
            .await
            .map_err(FlowError::Client)
    }

    /// [`Flow::execute`], stopped early on Ctrl-C
    pub async fn done(&mut self) -> Result<(), FlowError> {
        let cancel = CancellationToken::new();
        let run = self.execute(cancel.clone());
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    warn!("Interrupted, stopping running steps");
                    cancel.cancel();
                    if let Err(e) = run.await {
                        info!("Pipeline stopped: {}", e);
                    }
                    Err(FlowError::Interrupted)
                }
                Err(e) => {
                    warn!("Could not listen for interrupts: {}", e);
                    run.await
                }
            },
        }
    }
}

fn init_client(opts: &CommonOpts, registry: &ClientRegistry) -> Result<Arc<dyn Client>, FlowError> {
    info!("Initializing flow client '{}'", opts.args.client);
    let client = registry.initialize(&opts.args.client, opts)?;
    Ok(Arc::from(client))
}
