//! Draw a resolved collection as a DOT digraph

use crate::client::{Client, CommonOpts, ValidationError};
use crate::core::collection::Collection;
use crate::core::pipeline::{Pipeline, ROOT_ID};
use crate::core::step::{Sink, Step};
use anyhow::Context;
use async_trait::async_trait;
use std::fmt::{self, Write as _};
use tokio_util::sync::CancellationToken;

pub struct GraphvizClient {
    output: Sink,
}

impl GraphvizClient {
    pub fn new(opts: &CommonOpts) -> Self {
        Self {
            output: opts.output.clone(),
        }
    }
}

#[async_trait]
impl Client for GraphvizClient {
    fn validate(&self, _step: &Step) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn done(&self, _cancel: CancellationToken, collection: &Collection) -> anyhow::Result<()> {
        let dot = render(collection).context("failed to render graph")?;
        let mut out = self.output.lock();
        out.write_all(dot.as_bytes()).context("failed to write graph")?;
        out.flush().context("failed to write graph")?;
        Ok(())
    }
}

fn root_node(pipeline_id: i64) -> String {
    format!("pipeline_{}_root", pipeline_id)
}

fn node_id(pipeline: &Pipeline, id: i64) -> String {
    if pipeline.is_root(id) {
        root_node(pipeline.id)
    } else {
        format!("step_{}", id)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render every pipeline as a cluster. Pipeline dependencies are drawn
/// between cluster roots.
pub fn render(collection: &Collection) -> Result<String, fmt::Error> {
    let mut dot = String::new();
    write_dot(&mut dot, collection)?;
    Ok(dot)
}

fn write_dot(dot: &mut String, collection: &Collection) -> fmt::Result {
    writeln!(dot, "digraph flow {{")?;
    writeln!(dot, "  compound=true;")?;
    writeln!(dot, "  rankdir=LR;")?;
    writeln!(dot, "  node [shape=box];")?;

    for p in collection.pipelines() {
        writeln!(dot)?;
        write_cluster(dot, p)?;
    }

    let mut wrote_header = false;
    for node in collection.graph.nodes() {
        if node.id == ROOT_ID {
            continue;
        }
        for edge in collection.graph.edges_from(node.id) {
            if !wrote_header {
                writeln!(dot)?;
                wrote_header = true;
            }
            writeln!(
                dot,
                "  {} -> {} [ltail=cluster_{}, lhead=cluster_{}];",
                root_node(edge.from),
                root_node(edge.to),
                edge.from,
                edge.to
            )?;
        }
    }

    writeln!(dot, "}}")
}

fn write_cluster(dot: &mut String, p: &Pipeline) -> fmt::Result {
    writeln!(dot, "  subgraph cluster_{} {{", p.id)?;
    writeln!(dot, "    label=\"{}\";", escape(&p.name))?;
    writeln!(dot, "    {} [shape=point];", root_node(p.id))?;

    for step in p.steps() {
        let style = if step.is_background() { ", style=dashed" } else { "" };
        writeln!(
            dot,
            "    step_{} [label=\"{} ({})\"{}];",
            step.id,
            escape(&step.name),
            step.id,
            style
        )?;
    }

    for node in p.graph.nodes() {
        for edge in p.graph.edges_from(node.id) {
            writeln!(dot, "    {} -> {};", node_id(p, edge.from), node_id(p, edge.to))?;
        }
    }
    writeln!(dot, "  }}")
}
