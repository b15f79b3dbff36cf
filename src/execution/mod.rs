//! Local pipeline execution

pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod status;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{ExecutionResult, StepExecutor};
pub use scheduler::{ExecutionScheduler, RunPlan, SchedulingStrategy};
pub use status::{ExecutionStatus, RunState, StepState};
