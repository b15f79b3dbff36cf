//! Main execution engine - runs the steps of a pipeline plan

use crate::execution::{
    executor::{ExecutionResult, StepExecutor},
    scheduler::{ExecutionScheduler, RunPlan, SchedulingStrategy},
    status::{ExecutionStatus, RunState, StepState},
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        steps: usize,
    },
    BackgroundStarted {
        step_id: i64,
        step_name: String,
    },
    StepStarted {
        step_id: i64,
        step_name: String,
    },
    StepCompleted {
        step_id: i64,
        step_name: String,
        duration_ms: i64,
    },
    StepSkipped {
        step_id: i64,
        step_name: String,
        reason: String,
    },
    StepFailed {
        step_id: i64,
        step_name: String,
        error: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        pipeline_name: String,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Runs pipeline plans with a scheduling strategy
pub struct ExecutionEngine {
    scheduler: ExecutionScheduler,
    executor: StepExecutor,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl ExecutionEngine {
    pub fn new(executor: StepExecutor, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().push(Arc::new(handler));
    }

    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute every step of the plan.
    ///
    /// Background steps start first and are cancelled once the rest of the
    /// pipeline has finished. The first failing step stops further steps
    /// from starting; steps already running are allowed to finish.
    pub async fn execute(&self, plan: &mut RunPlan, cancel: &CancellationToken) -> anyhow::Result<RunState> {
        let mut run = RunState::new();
        let execution_id = run.execution_id;

        info!("Starting pipeline execution: {} ({})", plan.pipeline_name, execution_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: plan.pipeline_name.clone(),
            steps: plan.order().len(),
        });
        run.start(plan.order().len());

        let pipeline_cancel = cancel.child_token();
        let services = self.start_background(plan, &pipeline_cancel);

        let mut running: JoinSet<(i64, ExecutionResult)> = JoinSet::new();
        loop {
            if !plan.has_failed() && !cancel.is_cancelled() {
                for id in self.scheduler.next_steps(plan) {
                    let Some(step) = plan.step(id).cloned() else {
                        continue;
                    };

                    plan.set_state(id, StepState::Running { started_at: Utc::now() });
                    self.emit_event(ExecutionEvent::StepStarted {
                        step_id: id,
                        step_name: step.name.clone(),
                    });

                    let executor = self.executor.clone();
                    let token = pipeline_cancel.clone();
                    running.spawn(async move {
                        let result = executor.execute(&step, token).await;
                        (step.id, result)
                    });
                }
            }

            match running.join_next().await {
                Some(Ok((id, result))) => self.record(plan, &mut run, id, result),
                Some(Err(e)) => {
                    error!("Step task in {} panicked: {}", plan.pipeline_name, e);
                    pipeline_cancel.cancel();
                    running.shutdown().await;
                    stop_background(services).await;
                    anyhow::bail!("step task in pipeline '{}' panicked: {}", plan.pipeline_name, e);
                }
                None => break,
            }
        }

        pipeline_cancel.cancel();
        stop_background(services).await;

        let status = if cancel.is_cancelled() {
            ExecutionStatus::Cancelled
        } else if plan.has_failed() {
            ExecutionStatus::Failed
        } else if plan.is_complete() {
            ExecutionStatus::Completed
        } else {
            error!("No steps ready to run and none running - pipeline stuck");
            ExecutionStatus::Failed
        };
        run.finish(status);

        info!("Pipeline execution finished: {} - {:?}", plan.pipeline_name, status);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            pipeline_name: plan.pipeline_name.clone(),
            status,
        });

        Ok(run)
    }

    fn start_background(&self, plan: &RunPlan, cancel: &CancellationToken) -> JoinSet<(i64, ExecutionResult)> {
        let mut services = JoinSet::new();
        for step in plan.background_steps() {
            self.emit_event(ExecutionEvent::BackgroundStarted {
                step_id: step.id,
                step_name: step.name.clone(),
            });

            let step = step.clone();
            let executor = self.executor.clone();
            let token = cancel.clone();
            services.spawn(async move {
                let result = executor.execute(&step, token).await;
                (step.id, result)
            });
        }
        services
    }

    fn record(&self, plan: &mut RunPlan, run: &mut RunState, id: i64, result: ExecutionResult) {
        let name = plan.step(id).map(|s| s.name.clone()).unwrap_or_default();
        let started_at = match plan.state(id) {
            Some(StepState::Running { started_at }) => *started_at,
            _ => Utc::now(),
        };
        let now = Utc::now();

        match result {
            ExecutionResult::Success => {
                plan.set_state(
                    id,
                    StepState::Completed {
                        started_at,
                        completed_at: now,
                    },
                );
                run.completed_steps += 1;
                self.emit_event(ExecutionEvent::StepCompleted {
                    step_id: id,
                    step_name: name,
                    duration_ms: (now - started_at).num_milliseconds(),
                });
            }
            ExecutionResult::Skipped { reason } => {
                plan.set_state(id, StepState::Skipped { reason: reason.clone() });
                run.completed_steps += 1;
                self.emit_event(ExecutionEvent::StepSkipped {
                    step_id: id,
                    step_name: name,
                    reason,
                });
            }
            ExecutionResult::Cancelled => {
                plan.set_state(
                    id,
                    StepState::Skipped {
                        reason: "cancelled".to_string(),
                    },
                );
            }
            ExecutionResult::Failed { error } => {
                plan.set_state(
                    id,
                    StepState::Failed {
                        error: error.clone(),
                        started_at,
                        failed_at: now,
                    },
                );
                run.failed_steps += 1;
                self.emit_event(ExecutionEvent::StepFailed {
                    step_id: id,
                    step_name: name,
                    error,
                });
            }
        }
    }
}

async fn stop_background(mut services: JoinSet<(i64, ExecutionResult)>) {
    while let Some(joined) = services.join_next().await {
        match joined {
            Ok((id, ExecutionResult::Failed { error })) => warn!("Background step {} failed: {}", id, error),
            Ok(_) => {}
            Err(e) => warn!("Background step task panicked: {}", e),
        }
    }
}
