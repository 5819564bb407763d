// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Stage dependency graph
//!
//! The release stages and their data dependencies as a DAG. Sibling stages
//! have no path between them, so a failure only blocks what is reachable
//! from the failed node.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Walker};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{EnvironmentName, PipelineConfig};
use crate::errors::{ShipflowError, ShipflowResult};
use crate::registry::ImageVariant;

/// A stage of the release pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "stage", content = "target")]
pub enum StageKind {
    ResolveVersion,
    BuildImage(ImageVariant),
    PublishPackage,
    Test(EnvironmentName),
}

impl StageKind {
    /// Identifier safe for graph formats that restrict node names
    fn node_id(&self) -> String {
        self.to_string().replace([':', '-'], "_")
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResolveVersion => write!(f, "resolve-version"),
            Self::BuildImage(variant) => write!(f, "build-image:{}", variant),
            Self::PublishPackage => write!(f, "publish-package"),
            Self::Test(env) => write!(f, "test:{}", env),
        }
    }
}

/// Stages selected for one run and the edges between them
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    graph: DiGraph<StageKind, ()>,
    nodes: HashMap<StageKind, NodeIndex>,
}

impl PipelinePlan {
    /// Plan a run from the resolved feature flags
    pub fn from_config(config: &PipelineConfig) -> Self {
        let environments: Vec<EnvironmentName> =
            config.enabled_environments().iter().map(|t| t.name).collect();
        Self::build(config.flags.publish, &environments)
    }

    /// Plan with an explicit stage selection
    pub fn build(publish: bool, environments: &[EnvironmentName]) -> Self {
        let mut plan = Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        };

        let resolve = plan.add(StageKind::ResolveVersion);

        let images: Vec<NodeIndex> = ImageVariant::ALL
            .iter()
            .map(|variant| {
                let node = plan.add(StageKind::BuildImage(*variant));
                plan.graph.add_edge(resolve, node, ());
                node
            })
            .collect();

        if publish {
            let package = plan.add(StageKind::PublishPackage);
            plan.graph.add_edge(resolve, package, ());
        }

        for env in environments {
            let test = plan.add(StageKind::Test(*env));
            for image in &images {
                plan.graph.add_edge(*image, test, ());
            }
        }

        plan
    }

    fn add(&mut self, stage: StageKind) -> NodeIndex {
        *self
            .nodes
            .entry(stage)
            .or_insert_with(|| self.graph.add_node(stage))
    }

    pub fn contains(&self, stage: StageKind) -> bool {
        self.nodes.contains_key(&stage)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Stages in an order that respects every dependency.
    ///
    /// Ties are broken by stage order so the output is stable.
    pub fn topological_order(&self) -> ShipflowResult<Vec<StageKind>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| ShipflowError::InvalidConfig {
            reason: format!("stage graph has a cycle through {}", self.graph[cycle.node_id()]),
            help: None,
        })?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for node in &sorted {
            let level = self
                .graph
                .neighbors_directed(*node, petgraph::Direction::Incoming)
                .map(|dep| depth[&dep] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(*node, level);
        }

        let mut stages: Vec<(usize, StageKind)> = sorted
            .into_iter()
            .map(|node| (depth[&node], self.graph[node]))
            .collect();
        stages.sort();

        Ok(stages.into_iter().map(|(_, stage)| stage).collect())
    }

    /// Direct prerequisites of a stage
    pub fn dependencies(&self, stage: StageKind) -> Vec<StageKind> {
        let Some(node) = self.nodes.get(&stage) else {
            return Vec::new();
        };
        let mut out: Vec<StageKind> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|n| self.graph[n])
            .collect();
        out.sort();
        out
    }

    /// Every stage that cannot run once `failed` has failed
    pub fn blocked_by(&self, failed: StageKind) -> Vec<StageKind> {
        let Some(start) = self.nodes.get(&failed) else {
            return Vec::new();
        };
        let mut blocked: Vec<StageKind> = Dfs::new(&self.graph, *start)
            .iter(&self.graph)
            .filter(|n| n != start)
            .map(|n| self.graph[n])
            .collect();
        blocked.sort();
        blocked
    }

    /// Numbered execution order with prerequisites
    pub fn to_text(&self) -> ShipflowResult<String> {
        let mut out = String::new();
        for (i, stage) in self.topological_order()?.into_iter().enumerate() {
            out.push_str(&format!("{}. {}", i + 1, stage));

            let deps = self.dependencies(stage);
            if !deps.is_empty() {
                let names: Vec<String> = deps.iter().map(ToString::to_string).collect();
                out.push_str(&format!(" [depends: {}]", names.join(", ")));
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Graphviz rendering
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph release {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        let mut isolated: Vec<StageKind> = self
            .nodes
            .iter()
            .filter(|(_, node)| self.graph.neighbors_undirected(**node).count() == 0)
            .map(|(stage, _)| *stage)
            .collect();
        isolated.sort();
        for stage in isolated {
            out.push_str(&format!("    \"{}\";\n", stage));
        }

        out.push_str("}\n");
        out
    }

    /// Mermaid rendering
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        let mut stages: Vec<StageKind> = self.nodes.keys().copied().collect();
        stages.sort();
        for stage in stages {
            out.push_str(&format!("    {}[\"{}\"]\n", stage.node_id(), stage));
        }

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    {} --> {}\n", from.node_id(), to.node_id()));
        }

        out
    }

    fn sorted_edges(&self) -> Vec<(StageKind, StageKind)> {
        let mut edges: Vec<(StageKind, StageKind)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(from, to)| (self.graph[from], self.graph[to]))
            .collect();
        edges.sort();
        edges
    }
}
