//! Step executor - runs the action of a single step

use crate::core::state::StateHandler;
use crate::core::step::{ActionOpts, Sink, Step};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Result of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success,
    Failed { error: String },
    /// The step has nothing to run locally
    Skipped { reason: String },
    /// Cancelled before or while running
    Cancelled,
}

/// Runs steps against a shared state
#[derive(Clone)]
pub struct StepExecutor {
    state: Arc<dyn StateHandler>,
    stdout: Sink,
    stderr: Sink,
    path: PathBuf,
    version: String,
}

impl StepExecutor {
    pub fn new(state: Arc<dyn StateHandler>, stdout: Sink, stderr: Sink, path: PathBuf, version: String) -> Self {
        Self {
            state,
            stdout,
            stderr,
            path,
            version,
        }
    }

    pub fn state(&self) -> &Arc<dyn StateHandler> {
        &self.state
    }

    fn opts_for(&self, span: tracing::Span) -> ActionOpts {
        ActionOpts {
            state: Arc::clone(&self.state),
            stdout: Arc::clone(&self.stdout),
            stderr: Arc::clone(&self.stderr),
            span,
            path: self.path.clone(),
            version: self.version.clone(),
        }
    }

    /// Execute a step and return the result
    pub async fn execute(&self, step: &Step, cancel: CancellationToken) -> ExecutionResult {
        let Some(action) = step.action.clone() else {
            debug!("Step {} has no action, skipping", step.id);
            return ExecutionResult::Skipped {
                reason: "no action".to_string(),
            };
        };

        if cancel.is_cancelled() {
            info!("Step {} cancelled before execution", step.id);
            return ExecutionResult::Cancelled;
        }

        for arg in &step.required_args {
            if !self.state.exists(arg) {
                warn!("Step {} requires '{}' but it has no value", step.id, arg.key);
            }
        }

        info!("Executing step: {} ({})", step.name, step.id);
        let span = info_span!("step", id = step.id, name = %step.name);
        let run = action(cancel.clone(), self.opts_for(span.clone())).instrument(span);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Step {} interrupted", step.id);
                ExecutionResult::Cancelled
            }
            result = run => match result {
                Ok(()) => {
                    for arg in &step.provided_args {
                        if !self.state.exists(arg) {
                            warn!("Step {} finished without setting '{}'", step.id, arg.key);
                        }
                    }
                    info!("Step {} completed successfully", step.id);
                    ExecutionResult::Success
                }
                Err(e) => {
                    error!("Step {} failed: {:#}", step.id, e);
                    ExecutionResult::Failed {
                        error: format!("{:#}", e),
                    }
                }
            }
        }
    }
}
