//! Pipeline declarations from YAML

use crate::core::argument::{client_provided_arguments, Argument, ArgumentType};
use crate::core::event::{
    git_commit_event, git_tag_event, pull_request_event, Event, FilterValue, GitCommitFilters, GitTagFilters,
    PullRequestFilters,
};
use crate::core::pipeline::PipelineType;
use crate::core::shell::{ShellCommand, ShellEnv};
use crate::core::step::{named_step, Step, StepType};
use crate::flow::Flow;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no pipelines declared")]
    NoPipelines,

    #[error("duplicate pipeline name: {0}")]
    DuplicatePipeline(String),

    #[error("duplicate step name '{step}' in pipeline '{pipeline}'")]
    DuplicateStep { pipeline: String, step: String },

    #[error("{location} references undeclared argument '{argument}'")]
    UndeclaredArgument { location: String, argument: String },

    #[error("step '{step}' in pipeline '{pipeline}' has nothing to run")]
    EmptyRun { pipeline: String, step: String },

    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex { pattern: String, source: regex::Error },
}

/// Top-level pipeline file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,

    /// Arguments steps may exchange, by key. Client and event arguments
    /// such as `source` or `git-commit-sha` are always available.
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentType>,

    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    #[serde(default)]
    pub when: Vec<EventConfig>,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub provides: Vec<String>,

    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventConfig {
    GitCommit {
        #[serde(default)]
        branch: Option<FilterConfig>,
    },
    GitTag {
        #[serde(default)]
        tag: Option<FilterConfig>,
    },
    PullRequest,
}

/// `main`, `{ regex: "^release/" }` or `{ glob: "v*" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterConfig {
    Exact(String),
    Regex { regex: String },
    Glob { glob: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    #[serde(default)]
    pub image: Option<String>,

    /// Shell commands, each run with `sh -c`
    #[serde(default)]
    pub run: Vec<String>,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub provides: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, EnvConfig>,

    #[serde(default)]
    pub background: bool,
}

/// `value` or `{ argument: key }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvConfig {
    Value(String),
    Argument { argument: String },
}

impl FilterConfig {
    pub fn to_filter(&self) -> Result<FilterValue, ConfigError> {
        match self {
            FilterConfig::Exact(v) => Ok(FilterValue::string(v)),
            FilterConfig::Glob { glob } => Ok(FilterValue::glob(glob)),
            FilterConfig::Regex { regex } => FilterValue::regex(regex).map_err(|source| ConfigError::InvalidRegex {
                pattern: regex.clone(),
                source,
            }),
        }
    }
}

impl EventConfig {
    pub fn to_event(&self) -> Result<Event, ConfigError> {
        let event = match self {
            EventConfig::GitCommit { branch } => git_commit_event(GitCommitFilters {
                branch: branch.as_ref().map(FilterConfig::to_filter).transpose()?,
            }),
            EventConfig::GitTag { tag } => git_tag_event(GitTagFilters {
                name: tag.as_ref().map(FilterConfig::to_filter).transpose()?,
            }),
            EventConfig::PullRequest => pull_request_event(PullRequestFilters),
        };
        Ok(event)
    }
}

impl FlowConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("invalid pipeline file {}", path.display()))
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FlowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up an argument by key, declared or built in
    pub fn argument(&self, key: &str) -> Option<Argument> {
        if let Some(kind) = self.arguments.get(key) {
            return Some(Argument::new(key, *kind));
        }
        builtin_arguments().into_iter().find(|a| a.key == key)
    }

    fn resolve(&self, location: impl Fn() -> String, keys: &[String]) -> Result<Vec<Argument>, ConfigError> {
        keys.iter()
            .map(|key| {
                self.argument(key).ok_or_else(|| ConfigError::UndeclaredArgument {
                    location: location(),
                    argument: key.clone(),
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipelines.is_empty() {
            return Err(ConfigError::NoPipelines);
        }

        let mut pipeline_names = HashSet::new();
        for p in &self.pipelines {
            if !pipeline_names.insert(&p.name) {
                return Err(ConfigError::DuplicatePipeline(p.name.clone()));
            }

            let location = || format!("pipeline '{}'", p.name);
            self.resolve(location, &p.requires)?;
            self.resolve(location, &p.provides)?;
            for event in &p.when {
                event.to_event()?;
            }

            let mut step_names = HashSet::new();
            for step in &p.steps {
                if !step_names.insert(&step.name) {
                    return Err(ConfigError::DuplicateStep {
                        pipeline: p.name.clone(),
                        step: step.name.clone(),
                    });
                }

                let location = || format!("step '{}' in pipeline '{}'", step.name, p.name);
                self.resolve(location, &step.requires)?;
                self.resolve(location, &step.provides)?;
                for value in step.environment.values() {
                    if let EnvConfig::Argument { argument } = value {
                        self.resolve(location, std::slice::from_ref(argument))?;
                    }
                }

                // a background service may just run its image
                let is_service = step.background && step.image.is_some();
                if step.run.is_empty() && !is_service {
                    return Err(ConfigError::EmptyRun {
                        pipeline: p.name.clone(),
                        step: step.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn step(&self, pipeline: &PipelineConfig, config: &StepConfig) -> Result<Step, ConfigError> {
        let location = || format!("step '{}' in pipeline '{}'", config.name, pipeline.name);
        let requires = self.resolve(location, &config.requires)?;
        let provides = self.resolve(location, &config.provides)?;

        let mut step = named_step(&config.name, None)
            .requires(requires.clone())
            .provides(provides.clone());
        if let Some(image) = &config.image {
            step = step.with_image(image);
        }
        if config.background {
            step = step.with_type(StepType::Background);
        }

        let mut environment = BTreeMap::new();
        for (key, value) in &config.environment {
            match value {
                EnvConfig::Value(v) => {
                    step = step.with_env_var(key.clone(), v.as_str());
                    environment.insert(key.clone(), ShellEnv::Literal(v.clone()));
                }
                EnvConfig::Argument { argument } => {
                    let arg = self.resolve(location, std::slice::from_ref(argument))?.remove(0);
                    step = step.with_env_var(key.clone(), arg.clone());
                    environment.insert(key.clone(), ShellEnv::Argument(arg));
                }
            }
        }

        if !config.run.is_empty() {
            let shell = ShellCommand::new(config.run.clone(), requires, provides, environment);
            step = step.with_action(shell.into_action());
        }
        Ok(step)
    }

    /// Declare every pipeline on `flow`, which should have been created
    /// with [`Flow::new_multi`]
    pub fn build(&self, flow: &mut Flow) -> Result<()> {
        // secrets come from wherever the pipeline runs, never from a step
        flow.external(
            self.arguments
                .iter()
                .filter(|(_, kind)| **kind == ArgumentType::Secret)
                .map(|(key, kind)| Argument::new(key.as_str(), *kind)),
        );

        for p in &self.pipelines {
            // in file order, so step IDs follow the file
            let steps = p
                .steps
                .iter()
                .map(|config| self.step(p, config))
                .collect::<Result<Vec<_>, _>>()?;

            let events = p.when.iter().map(EventConfig::to_event).collect::<Result<Vec<_>, _>>()?;
            let location = || format!("pipeline '{}'", p.name);
            let requires = self.resolve(location, &p.requires)?;
            let provides = self.resolve(location, &p.provides)?;

            let pipeline = flow
                .pipeline(&p.name, move |f| {
                    f.when(events)?;
                    f.add(steps)
                })
                .with_context(|| format!("failed to declare pipeline '{}'", p.name))?
                .with_type(PipelineType::Default)
                .requires(requires)
                .provides(provides);

            flow.add_pipelines(vec![pipeline])?;
        }

        Ok(())
    }
}

/// Arguments a pipeline file can use without declaring them
fn builtin_arguments() -> Vec<Argument> {
    let mut args = client_provided_arguments();
    for event in [
        git_commit_event(GitCommitFilters::default()),
        git_tag_event(GitTagFilters::default()),
    ] {
        for arg in event.provides {
            if !args.contains(&arg) {
                args.push(arg);
            }
        }
    }
    args
}
