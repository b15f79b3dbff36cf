//! Runs pipelines on this machine

use crate::client::{Client, CommonOpts, ValidationError};
use crate::cli::output::format_execution_event;
use crate::core::argument::{
    client_provided_arguments, Argument, ArgumentType, ARGUMENT_BRANCH, ARGUMENT_BUILD_ID, ARGUMENT_COMMIT_REF, ARGUMENT_COMMIT_SHA,
    ARGUMENT_DOCKER_SOCKET_FS, ARGUMENT_REMOTE_URL, ARGUMENT_SOURCE_FS,
};
use crate::core::collection::{Collection, CollectionError};
use crate::core::state::{InMemoryState, StateHandler, StateValue};
use crate::core::step::{stderr_sink, stdout_sink, Step};
use crate::dag::Visit;
use crate::execution::{ExecutionEngine, ExecutionStatus, RunPlan, StepExecutor};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// The local runner
pub struct CliClient {
    opts: CommonOpts,
    state: Arc<InMemoryState>,
}

impl CliClient {
    pub fn new(opts: &CommonOpts) -> Self {
        Self::with_state(opts, Arc::new(InMemoryState::new()))
    }

    /// Run against an existing state, e.g. one a test wants to inspect
    pub fn with_state(opts: &CommonOpts, state: Arc<InMemoryState>) -> Self {
        Self {
            opts: opts.clone(),
            state,
        }
    }

    pub fn state(&self) -> Arc<InMemoryState> {
        Arc::clone(&self.state)
    }

    /// Fill in the root arguments, git details and `--arg` values
    async fn seed_state(&self, collection: &Collection) -> anyhow::Result<()> {
        let path = &self.opts.args.path;
        let source = tokio::fs::canonicalize(path).await.unwrap_or_else(|_| path.clone());

        if !self.state.exists(&ARGUMENT_SOURCE_FS) {
            self.state.set_directory(&ARGUMENT_SOURCE_FS, &source)?;
        }
        if !self.state.exists(&ARGUMENT_DOCKER_SOCKET_FS) {
            self.state.set_file(&ARGUMENT_DOCKER_SOCKET_FS, Path::new(DOCKER_SOCKET))?;
        }
        if !self.state.exists(&ARGUMENT_BUILD_ID) {
            self.state
                .set_string(&ARGUMENT_BUILD_ID, &uuid::Uuid::new_v4().to_string())?;
        }

        self.seed_git(&source).await?;

        let declared = declared_arguments(collection);
        for (key, raw) in &self.opts.args.arguments {
            let arg = match self.opts.argument_kinds.get(key) {
                Some(kind) => Argument::new(key.as_str(), *kind),
                None => declared
                    .iter()
                    .find(|a| a.key == key.as_str())
                    .cloned()
                    .unwrap_or_else(|| {
                        warn!("Argument '{}' is not used by any step, storing it as a string", key);
                        Argument::string(key.clone())
                    }),
            };

            let value = StateValue::parse(arg.kind, raw)
                .map_err(|e| anyhow::anyhow!("invalid value for argument '{}': {}", key, e))?;
            self.state.set(&arg, value)?;
        }

        Ok(())
    }

    async fn seed_git(&self, source: &Path) -> anyhow::Result<()> {
        let lookups: [(&Argument, &[&str]); 3] = [
            (&ARGUMENT_COMMIT_SHA, &["rev-parse", "HEAD"]),
            (&ARGUMENT_BRANCH, &["rev-parse", "--abbrev-ref", "HEAD"]),
            (&ARGUMENT_REMOTE_URL, &["config", "--get", "remote.origin.url"]),
        ];

        for (arg, git_args) in lookups {
            if self.state.exists(arg) {
                continue;
            }
            if let Some(value) = git_output(source, git_args).await {
                self.state.set_string(arg, &value)?;
            }
        }

        if !self.state.exists(&ARGUMENT_COMMIT_REF) {
            let tag = git_output(source, &["describe", "--exact-match", "--tags", "HEAD"]).await;
            let reference = match tag {
                Some(tag) => Some(format!("refs/tags/{}", tag)),
                None => git_output(source, &["symbolic-ref", "HEAD"]).await,
            };
            if let Some(reference) = reference {
                self.state.set_string(&ARGUMENT_COMMIT_REF, &reference)?;
            }
        }

        Ok(())
    }

    fn plans(&self, collection: &Collection) -> anyhow::Result<Vec<RunPlan>> {
        if let Some(id) = self.opts.args.step {
            let step = collection.by_id(id)?.clone();
            let pipeline = collection.pipeline_of(id)?;
            info!("Running single step {} of pipeline {}", id, pipeline.name);
            return Ok(vec![RunPlan::single(pipeline.id, &pipeline.name, step)]);
        }

        let mut ids = Vec::new();
        collection.traverse_pipelines::<CollectionError, _>(|p| {
            ids.push(p.id);
            Ok(Visit::Continue)
        })?;

        let plans = ids
            .into_iter()
            .map(|id| RunPlan::for_pipeline(collection, id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }
}

#[async_trait]
impl Client for CliClient {
    fn validate(&self, step: &Step) -> Result<(), ValidationError> {
        if step.action.is_none() {
            return Err(ValidationError::Skip(
                "step has no action and will not run locally".to_string(),
            ));
        }
        Ok(())
    }

    /// The usual root arguments plus one per `--arg`, typed by its declared
    /// kind or as a string
    fn provides(&self) -> Vec<Argument> {
        let mut args = client_provided_arguments();
        for (key, _) in &self.opts.args.arguments {
            let kind = self.opts.argument_kinds.get(key).copied().unwrap_or(ArgumentType::String);
            let arg = Argument::new(key.as_str(), kind);
            if !args.contains(&arg) {
                args.push(arg);
            }
        }
        args
    }

    async fn done(&self, cancel: CancellationToken, collection: &Collection) -> anyhow::Result<()> {
        self.seed_state(collection).await.context("failed to prepare pipeline state")?;

        let executor = StepExecutor::new(
            self.state(),
            stdout_sink(),
            stderr_sink(),
            PathBuf::from(&self.opts.args.path),
            self.opts.args.version.clone(),
        );
        let engine = ExecutionEngine::new(executor, self.opts.args.strategy.into());

        let output = Arc::clone(&self.opts.output);
        engine.add_event_handler(move |event| {
            let mut out = output.lock();
            if let Err(e) = writeln!(out, "{}", format_execution_event(&event)) {
                debug!("Failed to write event: {}", e);
            }
        });

        for mut plan in self.plans(collection)? {
            let run = engine.execute(&mut plan, &cancel).await?;
            match run.status {
                ExecutionStatus::Completed => {}
                ExecutionStatus::Cancelled => anyhow::bail!("pipeline '{}' was cancelled", plan.pipeline_name),
                _ => anyhow::bail!(
                    "pipeline '{}' failed ({} of {} steps failed)",
                    plan.pipeline_name,
                    run.failed_steps,
                    run.total_steps
                ),
            }
        }

        Ok(())
    }
}

/// Every argument any step, pipeline or event in the collection mentions
fn declared_arguments(collection: &Collection) -> BTreeSet<Argument> {
    let mut args = BTreeSet::new();
    for p in collection.pipelines() {
        args.extend(p.required_args.iter().cloned());
        args.extend(p.provided_args.iter().cloned());
        args.extend(p.events.iter().flat_map(|e| e.provides.iter().cloned()));
        for step in p.steps() {
            args.extend(step.required_args.iter().cloned());
            args.extend(step.provided_args.iter().cloned());
        }
    }
    args
}

async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().await.ok()?;
    if !output.status.success() {
        return None;
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
