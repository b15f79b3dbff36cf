//! Pipeline domain model

use crate::core::argument::Argument;
use crate::core::event::Event;
use crate::core::step::{named_step, Step};
use crate::dag::Graph;
use std::collections::HashMap;

/// ID of the synthetic root node in every step graph and in the pipeline graph
pub const ROOT_ID: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineType {
    #[default]
    Default,
    /// Declared inside another pipeline
    Sub,
}

/// A named graph of steps plus the events that trigger it
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,

    /// Steps, with the root step at [`ROOT_ID`]
    pub graph: Graph<Step>,

    /// Which step provides each argument; filled in by edge building
    pub providers: HashMap<Argument, i64>,

    pub root: Vec<i64>,
    pub events: Vec<Event>,
    pub pipeline_type: PipelineType,

    /// Arguments a parent has to satisfy before this pipeline runs
    pub required_args: Vec<Argument>,

    /// Arguments this pipeline hands to pipelines that depend on it
    pub provided_args: Vec<Argument>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, id: i64) -> Self {
        let mut graph = Graph::new();
        // a fresh graph can't hold a duplicate
        let _ = graph.add_node(ROOT_ID, root_step());

        Self {
            id,
            name: name.into(),
            graph,
            providers: HashMap::new(),
            root: vec![ROOT_ID],
            events: Vec::new(),
            pipeline_type: PipelineType::Default,
            required_args: Vec::new(),
            provided_args: Vec::new(),
        }
    }

    pub fn with_type(mut self, pipeline_type: PipelineType) -> Self {
        self.pipeline_type = pipeline_type;
        self
    }

    pub fn requires(mut self, args: impl IntoIterator<Item = Argument>) -> Self {
        for arg in args {
            if !self.required_args.contains(&arg) {
                self.required_args.push(arg);
            }
        }
        self
    }

    pub fn provides(mut self, args: impl IntoIterator<Item = Argument>) -> Self {
        for arg in args {
            if !self.provided_args.contains(&arg) {
                self.provided_args.push(arg);
            }
        }
        self
    }

    /// Declared steps, in insertion order, without the root
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.graph
            .nodes()
            .iter()
            .filter(|n| !self.root.contains(&n.id))
            .map(|n| &n.value)
    }

    /// IDs of the steps this step has to wait for
    pub fn dependencies_of(&self, step_id: i64) -> Vec<i64> {
        self.graph
            .predecessors(step_id)
            .into_iter()
            .filter(|id| !self.root.contains(id))
            .collect()
    }

    pub fn is_root(&self, id: i64) -> bool {
        self.root.contains(&id)
    }
}

fn root_step() -> Step {
    named_step("root", None)
}
