//! Generate a Drone CI config from a resolved collection
//!
//! Every pipeline becomes one YAML document. Steps with an action call back
//! into this program (`<entrypoint> --client cli --step <id>`) so that the
//! action runs inside the step's container; steps without one fall back to
//! the image's own entrypoint. Background steps become `services`.

use crate::client::{Client, CommonOpts, ValidationError};
use crate::core::collection::Collection;
use crate::core::event::{Event, FilterValue, EVENT_GIT_COMMIT, EVENT_GIT_TAG, EVENT_PULL_REQUEST};
use crate::core::pipeline::{Pipeline, ROOT_ID};
use crate::core::step::{EnvVar, Sink, Step};
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DronePipeline {
    pub kind: String,
    #[serde(rename = "type")]
    pub pipeline_type: String,
    pub name: String,
    pub steps: Vec<DroneStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<DroneStep>,
    #[serde(skip_serializing_if = "Trigger::is_empty")]
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneStep {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, DroneEnv>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DroneEnv {
    Value(String),
    Secret { from_secret: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trigger {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub branch: Vec<String>,
    #[serde(rename = "ref", skip_serializing_if = "Vec::is_empty")]
    pub reference: Vec<String>,
}

impl Trigger {
    pub fn is_empty(&self) -> bool {
        self.event.is_empty() && self.branch.is_empty() && self.reference.is_empty()
    }

    fn add(&mut self, event: &Event) {
        let (drone_event, filter_key) = match event.name.as_str() {
            EVENT_GIT_COMMIT => ("push", Some("branch")),
            EVENT_GIT_TAG => ("tag", Some("tag")),
            EVENT_PULL_REQUEST => ("pull_request", None),
            other => {
                warn!("Event '{}' has no drone equivalent and is ignored", other);
                return;
            }
        };
        push_unique(&mut self.event, drone_event.to_string());

        for (key, value) in &event.filters {
            if Some(key.as_str()) != filter_key {
                warn!("Filter '{}' of event '{}' is not supported by drone", key, event.name);
                continue;
            }
            if let FilterValue::Regex(r) = value {
                warn!(
                    "Drone triggers can't match regular expressions, dropping filter '{}: {}'",
                    key,
                    r.as_str()
                );
                continue;
            }

            match key.as_str() {
                "branch" => push_unique(&mut self.branch, value.to_string()),
                _ => push_unique(&mut self.reference, format!("refs/tags/{}", value)),
            }
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

pub struct DroneClient {
    entrypoint: String,
    output: Sink,
}

impl DroneClient {
    pub fn new(opts: &CommonOpts) -> Self {
        Self {
            entrypoint: opts.entrypoint.clone(),
            output: opts.output.clone(),
        }
    }

    fn step(&self, pipeline: &Pipeline, step: &Step) -> DroneStep {
        let commands = match step.action {
            Some(_) => vec![format!("{} --client cli --step {}", self.entrypoint, step.id)],
            None => Vec::new(),
        };

        let mut environment = BTreeMap::new();
        for (key, value) in &step.environment {
            match value {
                EnvVar::String(v) => {
                    environment.insert(key.clone(), DroneEnv::Value(v.clone()));
                }
                EnvVar::Argument(arg) if arg.is_secret() => {
                    environment.insert(
                        key.clone(),
                        DroneEnv::Secret {
                            from_secret: arg.key.to_string(),
                        },
                    );
                }
                // resolved from state when the step re-enters the cli client
                EnvVar::Argument(arg) => debug!("Leaving {} to the step's own run ({})", key, arg),
            }
        }

        let depends_on = if step.is_background() {
            Vec::new()
        } else {
            pipeline
                .dependencies_of(step.id)
                .into_iter()
                .filter_map(|id| pipeline.graph.node(id).ok())
                .filter(|n| !n.value.is_background())
                .map(|n| n.value.name.clone())
                .collect()
        };

        DroneStep {
            name: step.name.clone(),
            image: step.image.clone(),
            commands,
            environment,
            depends_on,
        }
    }

    /// Build the document for every pipeline
    pub fn pipelines(&self, collection: &Collection) -> Vec<DronePipeline> {
        collection
            .pipelines()
            .map(|p| {
                let (services, steps): (Vec<&Step>, Vec<&Step>) = p.steps().partition(|s| s.is_background());

                let mut trigger = Trigger::default();
                for event in &p.events {
                    trigger.add(event);
                }

                let depends_on = collection
                    .graph
                    .predecessors(p.id)
                    .into_iter()
                    .filter(|id| *id != ROOT_ID)
                    .filter_map(|id| collection.pipeline(id).ok())
                    .map(|dep| dep.name.clone())
                    .collect();

                DronePipeline {
                    kind: "pipeline".to_string(),
                    pipeline_type: "docker".to_string(),
                    name: p.name.clone(),
                    steps: steps.into_iter().map(|s| self.step(p, s)).collect(),
                    services: services.into_iter().map(|s| self.step(p, s)).collect(),
                    trigger,
                    depends_on,
                }
            })
            .collect()
    }
}

/// Serialize pipelines as a multi-document YAML stream
pub fn render(pipelines: &[DronePipeline]) -> anyhow::Result<String> {
    let mut out = String::new();
    for p in pipelines {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(p).with_context(|| format!("failed to serialize pipeline '{}'", p.name))?);
    }
    Ok(out)
}

#[async_trait]
impl Client for DroneClient {
    fn validate(&self, step: &Step) -> Result<(), ValidationError> {
        if step.image.trim().is_empty() {
            return Err(ValidationError::Invalid("drone steps need an image".to_string()));
        }
        if step.is_background() && step.action.is_some() {
            warn!("Background step '{}' will run as a drone service", step.name);
        }
        Ok(())
    }

    async fn done(&self, _cancel: CancellationToken, collection: &Collection) -> anyhow::Result<()> {
        let yaml = render(&self.pipelines(collection))?;

        let mut out = self.output.lock();
        out.write_all(yaml.as_bytes()).context("failed to write drone config")?;
        out.flush().context("failed to write drone config")?;
        Ok(())
    }
}
