//! flow - declare pipeline steps by the data they need and produce

pub mod cli;
pub mod client;
pub mod core;
pub mod dag;
pub mod execution;
pub mod flow;

// Re-export commonly used types
pub use crate::client::{Client, ClientRegistry, CommonOpts, ValidationError};
pub use crate::core::{Argument, ArgumentType, Collection, Event, Pipeline, StateHandler, Step};
pub use crate::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
pub use crate::flow::{Flow, FlowError};
