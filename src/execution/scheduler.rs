//! Execution scheduler - determines which steps to run next

use crate::core::collection::{Collection, CollectionError};
use crate::core::step::Step;
use crate::dag::Visit;
use crate::execution::status::StepState;
use std::collections::HashMap;

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    #[default]
    Sequential,

    /// Execute all ready steps in parallel
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

/// The steps of one pipeline with their dependencies and run state
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub pipeline_id: i64,
    pub pipeline_name: String,

    /// Non-background steps in precedence order
    order: Vec<i64>,
    background: Vec<i64>,
    steps: HashMap<i64, Step>,
    deps: HashMap<i64, Vec<i64>>,
    states: HashMap<i64, StepState>,
}

impl RunPlan {
    /// Plan every step of a pipeline. The collection must be resolved.
    pub fn for_pipeline(collection: &Collection, pipeline_id: i64) -> Result<Self, CollectionError> {
        let pipeline = collection.pipeline(pipeline_id)?;

        let mut order = Vec::new();
        let mut background = Vec::new();
        let mut steps = HashMap::new();
        collection.traverse_steps::<CollectionError, _>(pipeline_id, |step| {
            if step.is_background() {
                background.push(step.id);
            } else {
                order.push(step.id);
            }
            steps.insert(step.id, step.clone());
            Ok(Visit::Continue)
        })?;

        // background steps are up for the whole pipeline, so they never hold anything back
        let deps = order
            .iter()
            .map(|id| {
                let deps = pipeline
                    .dependencies_of(*id)
                    .into_iter()
                    .filter(|dep| !background.contains(dep))
                    .collect();
                (*id, deps)
            })
            .collect();

        let states = order.iter().map(|id| (*id, StepState::Pending)).collect();

        Ok(Self {
            pipeline_id,
            pipeline_name: pipeline.name.clone(),
            order,
            background,
            steps,
            deps,
            states,
        })
    }

    /// Plan one step on its own, ignoring its dependencies.
    ///
    /// A background step planned this way runs to completion like any other.
    pub fn single(pipeline_id: i64, pipeline_name: &str, step: Step) -> Self {
        let id = step.id;
        Self {
            pipeline_id,
            pipeline_name: pipeline_name.to_string(),
            order: vec![id],
            background: Vec::new(),
            steps: HashMap::from([(id, step)]),
            deps: HashMap::from([(id, Vec::new())]),
            states: HashMap::from([(id, StepState::Pending)]),
        }
    }

    pub fn step(&self, id: i64) -> Option<&Step> {
        self.steps.get(&id)
    }

    pub fn background_steps(&self) -> Vec<&Step> {
        self.background.iter().filter_map(|id| self.steps.get(id)).collect()
    }

    pub fn order(&self) -> &[i64] {
        &self.order
    }

    pub fn state(&self, id: i64) -> Option<&StepState> {
        self.states.get(&id)
    }

    pub fn set_state(&mut self, id: i64, state: StepState) {
        self.states.insert(id, state);
    }

    /// Pending steps whose dependencies have all finished, in precedence order
    pub fn ready_steps(&self) -> Vec<i64> {
        self.order
            .iter()
            .filter(|id| matches!(self.states.get(id), Some(StepState::Pending)))
            .filter(|id| {
                self.deps.get(id).map_or(true, |deps| {
                    deps.iter()
                        .all(|dep| self.states.get(dep).is_some_and(StepState::unblocks_dependents))
                })
            })
            .copied()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, StepState::Running { .. }))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.states.values().all(StepState::is_terminal)
    }

    pub fn has_failed(&self) -> bool {
        self.states.values().any(|s| matches!(s, StepState::Failed { .. }))
    }
}

/// Scheduler for determining which steps to run
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Get the next batch of steps to start
    pub fn next_steps(&self, plan: &RunPlan) -> Vec<i64> {
        match self.strategy {
            SchedulingStrategy::Sequential => self.next_sequential(plan),
            SchedulingStrategy::Parallel => plan.ready_steps(),
            SchedulingStrategy::LimitedParallel(max) => self.next_limited_parallel(plan, max),
        }
    }

    fn next_sequential(&self, plan: &RunPlan) -> Vec<i64> {
        if plan.running_count() > 0 {
            return vec![];
        }
        plan.ready_steps().into_iter().take(1).collect()
    }

    fn next_limited_parallel(&self, plan: &RunPlan, max: usize) -> Vec<i64> {
        let remaining = max.max(1).saturating_sub(plan.running_count());
        plan.ready_steps().into_iter().take(remaining).collect()
    }
}
