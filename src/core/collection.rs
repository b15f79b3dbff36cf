//! Collection of pipelines and dependency resolution
//!
//! A [`Collection`] owns every declared pipeline. Steps are added without any
//! edges; [`Collection::build_edges`] later wires each step to the single step
//! that provides each of its required arguments, and does the same for
//! pipelines that depend on each other.

use crate::core::argument::Argument;
use crate::core::event::Event;
use crate::core::pipeline::{Pipeline, ROOT_ID};
use crate::core::step::Step;
use crate::dag::{DagError, Graph, Node, Visit};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// ID of the pipeline a single-pipeline collection puts its steps in
pub const DEFAULT_PIPELINE_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Graph(#[from] DagError),

    #[error("pipeline not found. id: {0}")]
    PipelineNotFound(i64),

    #[error("step not found. id: {0}")]
    StepNotFound(i64),

    #[error("no steps named '{0}'")]
    NoStepsNamed(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("no step in pipeline '{pipeline}' provides argument '{argument}' required by step '{step}'")]
    NoStepProvider {
        pipeline: String,
        step: String,
        argument: Argument,
    },

    #[error("more than one step provides argument '{argument}': [{}]", .steps.join(", "))]
    AmbiguousProvider { argument: Argument, steps: Vec<String> },

    #[error("no pipeline provides argument '{argument}' required by pipeline '{pipeline}'")]
    NoPipelineProvider { pipeline: String, argument: Argument },

    #[error("cyclic dependency in '{scope}': [{}]", .members.join(" -> "))]
    CyclicDependency { scope: String, members: Vec<String> },

    #[error("collection has not been resolved; call build_edges first")]
    Unresolved,
}

/// Every pipeline of a program, and the graph between them
#[derive(Debug, Clone)]
pub struct Collection {
    /// Pipelines, with a synthetic root pipeline at [`ROOT_ID`]
    pub graph: Graph<Pipeline>,
    pub root: Vec<i64>,
    resolved: bool,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    pub fn new() -> Self {
        let mut graph = Graph::new();
        // a fresh graph can't hold a duplicate
        let _ = graph.add_node(ROOT_ID, Pipeline::new("root", ROOT_ID));

        Self {
            graph,
            root: vec![ROOT_ID],
            resolved: false,
        }
    }

    /// A collection holding one empty pipeline at [`DEFAULT_PIPELINE_ID`]
    pub fn with_default_pipeline(name: &str) -> Self {
        let mut collection = Self::new();
        let _ = collection
            .graph
            .add_node(DEFAULT_PIPELINE_ID, Pipeline::new(name, DEFAULT_PIPELINE_ID));
        collection
    }

    /// True once `build_edges` has succeeded and nothing was added since
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Add pipelines. Nothing is added if any pipeline or step ID is
    /// already taken.
    pub fn add_pipelines(&mut self, pipelines: Vec<Pipeline>) -> Result<(), CollectionError> {
        let mut batch = HashSet::new();
        for p in &pipelines {
            if self.graph.contains(p.id) || !batch.insert(p.id) {
                return Err(DagError::DuplicateId(p.id).into());
            }
        }

        let mut step_ids = HashSet::new();
        for step in pipelines.iter().flat_map(|p| p.steps()) {
            if step.id == ROOT_ID || self.step_exists(step.id) || !step_ids.insert(step.id) {
                return Err(DagError::DuplicateId(step.id).into());
            }
        }

        for p in pipelines {
            self.graph.add_node(p.id, p)?;
        }
        self.resolved = false;
        Ok(())
    }

    /// Add steps to a pipeline without wiring any edges.
    ///
    /// Step IDs are unique across the whole collection; if any ID collides,
    /// nothing is added.
    pub fn add_steps(&mut self, pipeline_id: i64, steps: Vec<Step>) -> Result<(), CollectionError> {
        self.pipeline(pipeline_id)?;

        let mut batch = HashSet::new();
        for step in &steps {
            if step.id == ROOT_ID || self.step_exists(step.id) || !batch.insert(step.id) {
                return Err(DagError::DuplicateId(step.id).into());
            }
        }

        let pipeline = self.pipeline_mut(pipeline_id)?;
        for step in steps {
            pipeline.graph.add_node(step.id, step)?;
        }
        self.resolved = false;
        Ok(())
    }

    /// Replace the events of a pipeline
    pub fn add_events(&mut self, pipeline_id: i64, events: Vec<Event>) -> Result<(), CollectionError> {
        for event in &events {
            event.validate().map_err(CollectionError::InvalidEvent)?;
        }

        self.pipeline_mut(pipeline_id)?.events = events;
        self.resolved = false;
        Ok(())
    }

    pub fn pipeline(&self, id: i64) -> Result<&Pipeline, CollectionError> {
        self.graph
            .node(id)
            .map(|n| &n.value)
            .map_err(|_| CollectionError::PipelineNotFound(id))
    }

    pub fn pipeline_mut(&mut self, id: i64) -> Result<&mut Pipeline, CollectionError> {
        self.graph
            .node_mut(id)
            .map(|n| &mut n.value)
            .map_err(|_| CollectionError::PipelineNotFound(id))
    }

    /// Declared pipelines in insertion order, without the root
    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.graph
            .nodes()
            .iter()
            .filter(|n| !self.root.contains(&n.id))
            .map(|n| &n.value)
    }

    fn step_exists(&self, id: i64) -> bool {
        self.pipelines().any(|p| p.graph.contains(id))
    }

    /// Wire every dependency edge.
    ///
    /// `external_args` are treated as provided by the root of every
    /// pipeline, together with the arguments of the pipeline's events and
    /// the pipeline's own required arguments. Previous edges are dropped
    /// first, so this can be called again after adding steps.
    pub fn build_edges(&mut self, external_args: &[Argument]) -> Result<(), CollectionError> {
        self.resolved = false;

        self.build_pipeline_edges(external_args)?;

        let ids: Vec<i64> = self.pipelines().map(|p| p.id).collect();
        for id in ids {
            build_step_edges(self.pipeline_mut(id)?, external_args)?;
        }

        if let Some(cycle) = self.graph.find_cycle() {
            return Err(CollectionError::CyclicDependency {
                scope: "pipelines".to_string(),
                members: self.node_names(&cycle),
            });
        }

        self.resolved = true;
        Ok(())
    }

    fn build_pipeline_edges(&mut self, external_args: &[Argument]) -> Result<(), CollectionError> {
        self.graph.clear_edges();

        let mut providers: HashMap<Argument, i64> = HashMap::new();
        for arg in external_args {
            providers.insert(arg.clone(), ROOT_ID);
        }

        for p in self.pipelines() {
            for arg in &p.provided_args {
                register_provider(&mut providers, arg, p.id, |id| self.pipeline_name(id))?;
            }
        }

        let mut edges = Vec::new();
        let mut rooted = Vec::new();
        for p in self.pipelines() {
            let from_events: HashSet<&Argument> = p.events.iter().flat_map(|e| e.provides.iter()).collect();

            for arg in &p.required_args {
                match providers.get(arg) {
                    Some(from) => edges.push((*from, p.id)),
                    None if from_events.contains(arg) => edges.push((ROOT_ID, p.id)),
                    None => {
                        return Err(CollectionError::NoPipelineProvider {
                            pipeline: p.name.clone(),
                            argument: arg.clone(),
                        })
                    }
                }
            }

            if p.required_args.is_empty() {
                rooted.push(p.id);
            }
        }

        edges.extend(rooted.into_iter().map(|id| (ROOT_ID, id)));
        for (from, to) in edges {
            if !self.graph.has_edge(from, to) {
                debug!("Pipeline edge: {} -> {}", self.pipeline_name(from), self.pipeline_name(to));
                self.graph.add_edge(from, to)?;
            }
        }

        Ok(())
    }

    fn pipeline_name(&self, id: i64) -> String {
        self.pipeline(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|_| id.to_string())
    }

    fn node_names(&self, ids: &[i64]) -> Vec<String> {
        ids.iter().map(|id| self.pipeline_name(*id)).collect()
    }

    /// Visit declared pipelines in insertion order
    pub fn walk_pipelines<E, F>(&self, mut visit: F) -> Result<(), E>
    where
        E: From<CollectionError>,
        F: FnMut(&Pipeline) -> Result<Visit, E>,
    {
        for p in self.pipelines() {
            if visit(p)? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Visit the steps of one pipeline in insertion order
    pub fn walk_steps<E, F>(&self, pipeline_id: i64, mut visit: F) -> Result<(), E>
    where
        E: From<CollectionError>,
        F: FnMut(&Step) -> Result<Visit, E>,
    {
        for step in self.pipeline(pipeline_id)?.steps() {
            if visit(step)? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Visit pipelines so that every pipeline comes after the pipelines it
    /// depends on. [`Visit::Stop`] skips the pipelines that depend on this one.
    pub fn traverse_pipelines<E, F>(&self, visit: F) -> Result<(), E>
    where
        E: From<CollectionError>,
        F: FnMut(&Pipeline) -> Result<Visit, E>,
    {
        if !self.resolved {
            return Err(CollectionError::Unresolved.into());
        }

        ordered(&self.graph, &self.root, visit)
    }

    /// Visit the steps of one pipeline so that every step comes after the
    /// steps that provide its arguments.
    pub fn traverse_steps<E, F>(&self, pipeline_id: i64, visit: F) -> Result<(), E>
    where
        E: From<CollectionError>,
        F: FnMut(&Step) -> Result<Visit, E>,
    {
        if !self.resolved {
            return Err(CollectionError::Unresolved.into());
        }

        let pipeline = self.pipeline(pipeline_id)?;
        ordered(&pipeline.graph, &pipeline.root, visit)
    }

    pub fn by_id(&self, id: i64) -> Result<&Step, CollectionError> {
        self.pipelines()
            .find_map(|p| p.steps().find(|s| s.id == id))
            .ok_or(CollectionError::StepNotFound(id))
    }

    pub fn by_name(&self, name: &str) -> Result<Vec<&Step>, CollectionError> {
        let steps: Vec<&Step> = self
            .pipelines()
            .flat_map(|p| p.steps())
            .filter(|s| s.name == name)
            .collect();

        if steps.is_empty() {
            return Err(CollectionError::NoStepsNamed(name.to_string()));
        }
        Ok(steps)
    }

    /// The pipeline a step was added to
    pub fn pipeline_of(&self, step_id: i64) -> Result<&Pipeline, CollectionError> {
        self.pipelines()
            .find(|p| !p.is_root(step_id) && p.graph.contains(step_id))
            .ok_or(CollectionError::StepNotFound(step_id))
    }
}

fn register_provider(
    providers: &mut HashMap<Argument, i64>,
    arg: &Argument,
    id: i64,
    name_of: impl Fn(i64) -> String,
) -> Result<(), CollectionError> {
    match providers.get(arg) {
        Some(existing) if *existing != id => Err(CollectionError::AmbiguousProvider {
            argument: arg.clone(),
            steps: vec![name_of(*existing), name_of(id)],
        }),
        _ => {
            providers.insert(arg.clone(), id);
            Ok(())
        }
    }
}

fn build_step_edges(pipeline: &mut Pipeline, external_args: &[Argument]) -> Result<(), CollectionError> {
    pipeline.graph.clear_edges();

    let mut providers: HashMap<Argument, i64> = HashMap::new();
    let from_root = external_args
        .iter()
        .chain(pipeline.events.iter().flat_map(|e| e.provides.iter()))
        .chain(pipeline.required_args.iter());
    for arg in from_root {
        providers.insert(arg.clone(), ROOT_ID);
    }

    for step in pipeline.steps() {
        for arg in &step.provided_args {
            register_provider(&mut providers, arg, step.id, |id| step_name(&pipeline.graph, id))?;
        }
    }

    let mut edges = Vec::new();
    let mut rooted = Vec::new();
    for step in pipeline.steps() {
        for arg in &step.required_args {
            let from = providers.get(arg).ok_or_else(|| CollectionError::NoStepProvider {
                pipeline: pipeline.name.clone(),
                step: step.name.clone(),
                argument: arg.clone(),
            })?;
            edges.push((*from, step.id));
        }

        if step.required_args.is_empty() || step.is_background() {
            rooted.push(step.id);
        }
    }
    edges.extend(rooted.into_iter().map(|id| (ROOT_ID, id)));

    for (from, to) in edges {
        if !pipeline.graph.has_edge(from, to) {
            debug!(
                "[{}] Step edge: {} -> {}",
                pipeline.name,
                step_name(&pipeline.graph, from),
                step_name(&pipeline.graph, to)
            );
            pipeline.graph.add_edge(from, to)?;
        }
    }
    pipeline.providers = providers;

    if let Some(cycle) = pipeline.graph.find_cycle() {
        return Err(CollectionError::CyclicDependency {
            scope: pipeline.name.clone(),
            members: cycle.into_iter().map(|id| step_name(&pipeline.graph, id)).collect(),
        });
    }

    Ok(())
}

fn step_name(graph: &Graph<Step>, id: i64) -> String {
    graph
        .node(id)
        .map(|n| n.value.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

/// Carries either a graph error or the visitor's own error out of
/// `ordered_search`, whose error type has to absorb `DagError`
enum Traversal<E> {
    Graph(DagError),
    Visit(E),
}

impl<E> From<DagError> for Traversal<E> {
    fn from(err: DagError) -> Self {
        Traversal::Graph(err)
    }
}

fn ordered<T, E, F>(graph: &Graph<T>, root: &[i64], mut visit: F) -> Result<(), E>
where
    E: From<CollectionError>,
    F: FnMut(&T) -> Result<Visit, E>,
{
    let result = graph.ordered_search(ROOT_ID, |node: &Node<T>| {
        if root.contains(&node.id) {
            return Ok(Visit::Continue);
        }
        visit(&node.value).map_err(Traversal::Visit)
    });

    match result {
        Ok(()) => Ok(()),
        Err(Traversal::Graph(err)) => Err(CollectionError::from(err).into()),
        Err(Traversal::Visit(err)) => Err(err),
    }
}
