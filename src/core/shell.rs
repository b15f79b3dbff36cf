//! Shell-command actions for steps declared in YAML

use crate::core::argument::Argument;
use crate::core::state::{StateHandler, StateValue};
use crate::core::step::{action, Action, ActionOpts};
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Environment variable naming the file steps write `key=value` outputs to
pub const OUTPUT_VAR: &str = "FLOW_OUTPUT";

/// Prefix of the variables that carry required arguments
pub const ARG_VAR_PREFIX: &str = "FLOW_ARG_";

/// Value of an environment variable set on a shell step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEnv {
    Literal(String),
    Argument(Argument),
}

/// Runs each command with `sh -c`, stopping at the first failure
#[derive(Debug, Clone)]
pub struct ShellCommand {
    commands: Vec<String>,
    requires: Vec<Argument>,
    provides: Vec<Argument>,
    environment: BTreeMap<String, ShellEnv>,
}

/// `FLOW_ARG_` + the key in upper case, with `-` and `.` as `_`
pub fn arg_var(arg: &Argument) -> String {
    let key: String = arg
        .key
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{}{}", ARG_VAR_PREFIX, key)
}

impl ShellCommand {
    pub fn new(
        commands: Vec<String>,
        requires: Vec<Argument>,
        provides: Vec<Argument>,
        environment: BTreeMap<String, ShellEnv>,
    ) -> Self {
        Self {
            commands,
            requires,
            provides,
            environment,
        }
    }

    pub fn into_action(self) -> Action {
        let shell = Arc::new(self);
        action(move |cancel, opts| {
            let shell = Arc::clone(&shell);
            async move { shell.run(cancel, opts).await }
        })
    }

    fn env(&self, state: &dyn StateHandler) -> anyhow::Result<Vec<(String, String)>> {
        let mut vars = Vec::new();
        for arg in &self.requires {
            let value = state
                .get(arg)
                .with_context(|| format!("required argument {} is not set", arg))?;
            vars.push((arg_var(arg), value.expose()));
        }

        for (key, value) in &self.environment {
            let value = match value {
                ShellEnv::Literal(v) => v.clone(),
                ShellEnv::Argument(arg) => state
                    .get(arg)
                    .with_context(|| format!("argument {} for ${} is not set", arg, key))?
                    .expose(),
            };
            vars.push((key.clone(), value));
        }

        Ok(vars)
    }

    pub async fn run(&self, cancel: CancellationToken, opts: ActionOpts) -> anyhow::Result<()> {
        let output_file = std::env::temp_dir().join(format!("flow-{}.env", uuid::Uuid::new_v4()));
        tokio::fs::write(&output_file, b"")
            .await
            .with_context(|| format!("failed to create {}", output_file.display()))?;

        let result = self.run_commands(&cancel, &opts, &output_file).await;
        let result = match result {
            Ok(()) => self.read_outputs(opts.state.as_ref(), &output_file).await,
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_file(&output_file).await {
            debug!("Failed to remove {}: {}", output_file.display(), e);
        }
        result
    }

    async fn run_commands(&self, cancel: &CancellationToken, opts: &ActionOpts, output_file: &Path) -> anyhow::Result<()> {
        let env = self.env(opts.state.as_ref())?;

        for command in &self.commands {
            debug!("Running: {}", command);

            let child = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&opts.path)
                .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .env(OUTPUT_VAR, output_file)
                .kill_on_drop(true)
                .output();

            let output = tokio::select! {
                output = child => output.with_context(|| format!("failed to spawn `{}`", command))?,
                _ = cancel.cancelled() => anyhow::bail!("cancelled while running `{}`", command),
            };

            opts.stdout.lock().write_all(&output.stdout).context("failed to write step output")?;
            opts.stderr.lock().write_all(&output.stderr).context("failed to write step output")?;

            if !output.status.success() {
                let code = output.status.code().unwrap_or(-1);
                anyhow::bail!("`{}` exited with code {}", command, code);
            }
        }

        Ok(())
    }

    async fn read_outputs(&self, state: &dyn StateHandler, output_file: &Path) -> anyhow::Result<()> {
        let content = tokio::fs::read_to_string(output_file)
            .await
            .with_context(|| format!("failed to read {}", output_file.display()))?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once('=') else {
                warn!("Ignoring output line without '=': {}", line);
                continue;
            };

            match self.provides.iter().find(|a| a.key == key.trim()) {
                Some(arg) => {
                    let value = StateValue::parse(arg.kind, raw.trim())
                        .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", arg, e))?;
                    state.set(arg, value)?;
                }
                None => debug!("Ignoring output '{}', the step doesn't provide it", key),
            }
        }

        Ok(())
    }
}
