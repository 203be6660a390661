// src/dag/graph.rs

use std::collections::HashMap;

use crate::dag::stage_info::{StageInfo, StageName};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Stages listed in this stage's `after`.
    deps: Vec<StageName>,
    /// Stages that list this one in their `after`.
    dependents: Vec<StageName>,
}

/// In-memory stage graph of one workflow, keyed by stage name.
///
/// Acyclicity is checked in `config::validate`; here we only keep adjacency
/// and declaration order for scheduling and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    order: Vec<StageName>,
    nodes: HashMap<StageName, DagNode>,
}

impl StageGraph {
    /// Build the graph from stage metadata in declaration order.
    ///
    /// Dependencies naming unknown stages are dropped.
    pub fn from_stages(stages: &[StageInfo]) -> Self {
        let mut nodes: HashMap<StageName, DagNode> = HashMap::new();
        let mut order = Vec::with_capacity(stages.len());

        for info in stages {
            order.push(info.name.clone());
            nodes.insert(
                info.name.clone(),
                DagNode {
                    deps: Vec::new(),
                    dependents: Vec::new(),
                },
            );
        }

        for info in stages {
            for dep in info.deps.iter() {
                if !nodes.contains_key(dep) {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&info.name) {
                    node.deps.push(dep.clone());
                }
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(info.name.clone());
                }
            }
        }

        Self { order, nodes }
    }

    /// Stage names in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a stage.
    pub fn dependencies_of(&self, name: &str) -> &[StageName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a stage.
    pub fn dependents_of(&self, name: &str) -> &[StageName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
