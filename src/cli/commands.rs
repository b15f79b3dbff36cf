//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub args: PipelineArgs,
}

/// Options handed to whichever client runs the pipeline
#[derive(Debug, Args, Clone, PartialEq)]
pub struct PipelineArgs {
    /// Client that consumes the pipeline (cli, drone, graphviz)
    #[arg(long, default_value = "cli")]
    pub client: String,

    /// Path to the project the pipeline runs in
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Version reported to steps
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub version: String,

    /// Run only the step with this ID
    #[arg(long)]
    pub step: Option<i64>,

    /// Scheduling strategy for the cli client
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Argument values to set before the first step (key=value)
    #[arg(long = "arg", value_parser = parse_key_value)]
    pub arguments: Vec<(String, String)>,
}

impl Default for PipelineArgs {
    fn default() -> Self {
        Self {
            client: "cli".to_string(),
            path: PathBuf::from("."),
            version: env!("CARGO_PKG_VERSION").to_string(),
            step: None,
            strategy: SchedulingStrategyArg::Sequential,
            arguments: Vec::new(),
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(4),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
