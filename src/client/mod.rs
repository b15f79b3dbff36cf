//! Clients consume a resolved collection
//!
//! A client decides what "running" a pipeline means: the `cli` client runs
//! steps on this machine, `drone` writes a CI config that calls back into
//! `flow` for each step, and `graphviz` draws the graph.

pub mod cli;
pub mod drone;
pub mod graphviz;

use crate::cli::commands::PipelineArgs;
use crate::core::argument::{client_provided_arguments, Argument, ArgumentType};
use crate::core::collection::Collection;
use crate::core::step::{Sink, Step};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a client refused a step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Not fatal; the step is registered and a warning is logged
    #[error("skipping validation: {0}")]
    Skip(String),

    #[error("{0}")]
    Invalid(String),
}

/// A backend that consumes a resolved [`Collection`]
#[async_trait]
pub trait Client: Send + Sync {
    /// Called for every step as it is added
    fn validate(&self, step: &Step) -> Result<(), ValidationError>;

    /// Arguments this client supplies before the first step runs
    fn provides(&self) -> Vec<Argument> {
        client_provided_arguments()
    }

    /// Called once, with a collection whose edges are built
    async fn done(&self, cancel: CancellationToken, collection: &Collection) -> anyhow::Result<()>;
}

/// Options every client is initialized with
#[derive(Clone)]
pub struct CommonOpts {
    pub name: String,
    pub version: String,
    pub args: PipelineArgs,

    /// Kinds of the arguments the pipeline file declares, by key
    pub argument_kinds: BTreeMap<String, ArgumentType>,

    /// Command that re-enters this program, used by clients that generate
    /// configs which run single steps later
    pub entrypoint: String,

    pub output: Sink,
}

pub type Initializer = Box<dyn Fn(&CommonOpts) -> anyhow::Result<Box<dyn Client>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown client '{name}', expected one of: {}", .known.join(", "))]
    Unknown { name: String, known: Vec<String> },

    #[error(transparent)]
    Init(#[from] anyhow::Error),
}

/// Name to initializer map, built once at program start
#[derive(Default)]
pub struct ClientRegistry {
    initializers: BTreeMap<String, Initializer>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `cli`, `drone` and `graphviz` clients
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("cli", |opts| Ok(Box::new(cli::CliClient::new(opts))));
        registry.register("drone", |opts| Ok(Box::new(drone::DroneClient::new(opts))));
        registry.register("graphviz", |opts| Ok(Box::new(graphviz::GraphvizClient::new(opts))));
        registry
    }

    /// Add or replace a client
    pub fn register<F>(&mut self, name: &str, init: F)
    where
        F: Fn(&CommonOpts) -> anyhow::Result<Box<dyn Client>> + Send + Sync + 'static,
    {
        self.initializers.insert(name.to_string(), Box::new(init));
    }

    pub fn names(&self) -> Vec<String> {
        self.initializers.keys().cloned().collect()
    }

    pub fn initialize(&self, name: &str, opts: &CommonOpts) -> Result<Box<dyn Client>, RegistryError> {
        let init = self.initializers.get(name).ok_or_else(|| RegistryError::Unknown {
            name: name.to_string(),
            known: self.names(),
        })?;

        Ok(init(opts)?)
    }
}
