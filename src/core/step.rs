//! Step domain model

use crate::core::argument::Argument;
use crate::core::state::StateHandler;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Image assigned at registration to steps that don't name one
pub const DEFAULT_IMAGE: &str = "golang:1.19";

/// Shared writer handed to actions and clients
pub type Sink = Arc<Mutex<dyn Write + Send>>;

pub fn stdout_sink() -> Sink {
    Arc::new(Mutex::new(std::io::stdout()))
}

pub fn stderr_sink() -> Sink {
    Arc::new(Mutex::new(std::io::stderr()))
}

/// Everything an action gets to work with when it runs
#[derive(Clone)]
pub struct ActionOpts {
    pub state: Arc<dyn StateHandler>,
    pub stdout: Sink,
    pub stderr: Sink,

    /// Span of the running step; actions log and trace through it
    pub span: tracing::Span,

    /// Path to the pipeline, usually the `--path` argument
    pub path: PathBuf,

    /// Version of flow running the pipeline
    pub version: String,
}

/// The work a step performs
pub type Action =
    Arc<dyn Fn(CancellationToken, ActionOpts) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`Action`]
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(CancellationToken, ActionOpts) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |cancel, opts| f(cancel, opts).boxed())
}

/// How a step is meant to operate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepType {
    #[default]
    Default,
    /// Runs for the lifetime of its pipeline; nothing waits for it to finish
    Background,
}

/// An environment variable value, either literal or read from an argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvVar {
    String(String),
    Argument(Argument),
}

impl EnvVar {
    pub fn argument(&self) -> Option<&Argument> {
        match self {
            EnvVar::Argument(arg) => Some(arg),
            EnvVar::String(_) => None,
        }
    }
}

impl From<&str> for EnvVar {
    fn from(value: &str) -> Self {
        EnvVar::String(value.to_string())
    }
}

impl From<Argument> for EnvVar {
    fn from(arg: Argument) -> Self {
        EnvVar::Argument(arg)
    }
}

pub type StepEnv = BTreeMap<String, EnvVar>;

/// A single unit of work in a pipeline.
///
/// Steps are values: every builder method consumes the step and returns the
/// modified copy.
#[derive(Clone, Default)]
pub struct Step {
    /// Assigned when the step is added to a pipeline; used by `--step <id>`
    pub id: i64,

    pub name: String,

    pub step_type: StepType,

    /// Execution hint, typically a container image
    pub image: String,

    /// `None` lets a client fall back to its own default behavior (for
    /// container clients, the image's entrypoint)
    pub action: Option<Action>,

    /// Arguments that must exist before this step can run
    pub required_args: Vec<Argument>,

    /// Arguments this step makes available to others
    pub provided_args: Vec<Argument>,

    pub environment: StepEnv,
}

impl Step {
    pub fn is_background(&self) -> bool {
        self.step_type == StepType::Background
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_type(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Set one environment variable, replacing any value under the same key.
    /// An argument-bound value also becomes a requirement of the step.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<EnvVar>) -> Self {
        let value = value.into();
        if let Some(arg) = value.argument() {
            self = self.requires([arg.clone()]);
        }
        self.environment.insert(key.into(), value);
        self
    }

    /// Replace the whole environment
    pub fn with_environment(mut self, env: StepEnv) -> Self {
        let bound: Vec<Argument> = env.values().filter_map(EnvVar::argument).cloned().collect();
        self = self.requires(bound);
        self.environment = env;
        self
    }

    pub fn requires(mut self, args: impl IntoIterator<Item = Argument>) -> Self {
        append_unique(&mut self.required_args, args);
        self
    }

    pub fn provides(mut self, args: impl IntoIterator<Item = Argument>) -> Self {
        append_unique(&mut self.provided_args, args);
        self
    }

    /// Drop every required argument
    pub fn reset_arguments(mut self) -> Self {
        self.required_args.clear();
        self
    }
}

fn append_unique(list: &mut Vec<Argument>, args: impl IntoIterator<Item = Argument>) {
    for arg in args {
        if !list.contains(&arg) {
            list.push(arg);
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("step_type", &self.step_type)
            .field("image", &self.image)
            .field("action", &self.action.as_ref().map(|_| "<action>"))
            .field("required_args", &self.required_args)
            .field("provided_args", &self.provided_args)
            .field("environment", &self.environment)
            .finish()
    }
}

/// A step whose name is generated at registration
pub fn new_step(action: Option<Action>) -> Step {
    Step {
        action,
        ..Step::default()
    }
}

pub fn named_step(name: impl Into<String>, action: Option<Action>) -> Step {
    Step {
        name: name.into(),
        action,
        ..Step::default()
    }
}

/// A step that does nothing; useful to shape a graph or in tests
pub fn no_op_step() -> Step {
    named_step("no op", Some(action(|_, _| async { Ok(()) })))
}

/// Merge several steps into one.
///
/// Arguments are concatenated and actions run in order, stopping at the first
/// error. The name and image come from the first step. Returns `None` for an
/// empty list.
pub fn combine(steps: Vec<Step>) -> Option<Step> {
    let first = steps.first()?;
    let mut combined = Step {
        name: first.name.clone(),
        image: first.image.clone(),
        ..Step::default()
    };

    for step in &steps {
        combined = combined
            .requires(step.required_args.iter().cloned())
            .provides(step.provided_args.iter().cloned());
    }

    let actions: Arc<Vec<Action>> = Arc::new(steps.into_iter().filter_map(|s| s.action).collect());
    combined.action = Some(action(move |cancel, opts| {
        let actions = Arc::clone(&actions);
        async move {
            for act in actions.iter() {
                act(cancel.clone(), opts.clone()).await?;
            }
            Ok(())
        }
    }));

    Some(combined)
}

pub fn step_names(steps: &[Step]) -> Vec<String> {
    steps.iter().map(|s| s.name.clone()).collect()
}
