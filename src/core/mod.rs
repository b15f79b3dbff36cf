//! Core domain models
//!
//! Arguments and the state they're stored in, steps, pipelines and the
//! collection that resolves their dependencies, trigger events, and the
//! YAML front end that declares all of them.

pub mod argument;
pub mod collection;
pub mod config;
pub mod event;
pub mod pipeline;
pub mod shell;
pub mod state;
pub mod step;

pub use argument::*;
pub use collection::*;
pub use event::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
