// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! DAG (Directed Acyclic Graph) builder for step dependencies
//!
//! Flattens the step tree (condition branches included) into one graph,
//! checks that every reference points at a visible step and a declared
//! output, rejects cycles, and computes a deterministic execution order.
//!
//! Visibility: a step sees every step of its own list, plus, inside a
//! condition branch, the enclosing steps declared before the condition
//! (recursively). Branch steps are never visible from outside their branch.

use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::errors::BuildError;
use crate::pipeline::{Branch, PipelineDefinition, Step};

/// Why one step must wait for another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Consumes an output through a property reference
    Data,
    /// Explicit `depends_on` entry
    Order,
    /// Member of a condition branch
    Branch(Branch),
}

/// A step in the flattened graph
#[derive(Debug, Clone)]
pub struct StepNode {
    pub step: Step,
    /// Enclosing condition step and branch
    pub parent: Option<(String, Branch)>,
}

/// Builder for step dependency DAGs
#[derive(Debug, Clone)]
pub struct DagBuilder {
    graph: DiGraph<usize, EdgeKind>,
    nodes: Vec<StepNode>,
    name_to_index: HashMap<String, NodeIndex>,
    order: Vec<usize>,
}

impl DagBuilder {
    /// Create an empty DAG builder
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: Vec::new(),
            name_to_index: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build a DAG from a pipeline definition
    pub fn build(definition: &PipelineDefinition) -> Result<Self, BuildError> {
        let mut builder = Self::new();

        // Nodes in declaration (pre-)order; this order breaks ties later
        builder.collect(&definition.steps, None)?;

        // Edges, with visibility and output checks
        builder.link(&definition.steps, &HashSet::new())?;

        builder.order = builder.sorted()?;

        Ok(builder)
    }

    fn collect(&mut self, steps: &[Step], parent: Option<(String, Branch)>) -> Result<(), BuildError> {
        for step in steps {
            if self.name_to_index.contains_key(&step.id) {
                return Err(BuildError::DuplicateStepId {
                    id: step.id.clone(),
                });
            }

            let position = self.nodes.len();
            let node = self.graph.add_node(position);
            self.name_to_index.insert(step.id.clone(), node);
            self.nodes.push(StepNode {
                step: step.clone(),
                parent: parent.clone(),
            });

            if let Some((if_steps, else_steps)) = step.branches() {
                self.collect(if_steps, Some((step.id.clone(), Branch::If)))?;
                self.collect(else_steps, Some((step.id.clone(), Branch::Else)))?;
            }
        }

        Ok(())
    }

    fn link(&mut self, steps: &[Step], inherited: &HashSet<String>) -> Result<(), BuildError> {
        let local: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();

        for (position, step) in steps.iter().enumerate() {
            let node = self.name_to_index[&step.id];

            for reference in step.references() {
                let target = self.visible(step, &reference.step, &reference.to_string(), &local, inherited)?;

                let producer = &self.nodes[self.graph[target]].step;
                if producer.output(&reference.output).is_none() {
                    return Err(BuildError::DanglingReference {
                        step: step.id.clone(),
                        target: reference.to_string(),
                        reason: format!("declares no output '{}'", reference.output),
                    });
                }

                self.add_edge(target, node, EdgeKind::Data);
            }

            for dependency in &step.depends_on {
                let target = self.visible(step, dependency, dependency, &local, inherited)?;
                self.add_edge(target, node, EdgeKind::Order);
            }

            if let Some((if_steps, else_steps)) = step.branches() {
                let mut scope = inherited.clone();
                scope.extend(steps[..position].iter().map(|s| s.id.clone()));
                scope.insert(step.id.clone());

                for (branch, members) in [(Branch::If, if_steps), (Branch::Else, else_steps)] {
                    for member in members {
                        let member_node = self.name_to_index[&member.id];
                        self.add_edge(node, member_node, EdgeKind::Branch(branch));
                    }
                    self.link(members, &scope)?;
                }
            }
        }

        Ok(())
    }

    fn visible(
        &self,
        step: &Step,
        target_id: &str,
        target_label: &str,
        local: &HashSet<&str>,
        inherited: &HashSet<String>,
    ) -> Result<NodeIndex, BuildError> {
        let dangling = |reason: &str| BuildError::DanglingReference {
            step: step.id.clone(),
            target: target_label.to_string(),
            reason: reason.to_string(),
        };

        match self.name_to_index.get(target_id) {
            None => Err(dangling("does not exist")),
            Some(index) if local.contains(target_id) || inherited.contains(target_id) => Ok(*index),
            Some(_) => Err(dangling("is not visible from this step")),
        }
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) {
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, kind);
        }
    }

    /// Kahn's algorithm; ready steps are taken in declaration order
    fn sorted(&self) -> Result<Vec<usize>, BuildError> {
        let count = self.graph.node_count();
        let mut indegree: Vec<usize> = (0..count)
            .map(|i| {
                self.graph
                    .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for next in self
                .graph
                .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            {
                let next = next.index();
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < count {
            return Err(BuildError::Cycle {
                steps: self.find_cycle_members(),
            });
        }

        Ok(order)
    }

    /// Members of the first cycle (by declaration order), first member repeated
    fn find_cycle_members(&self) -> Vec<String> {
        let cycle = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .map(|mut scc| {
                scc.sort();
                scc
            })
            .min_by_key(|scc| scc[0])
            .unwrap_or_default();

        let mut members: Vec<String> = cycle
            .iter()
            .map(|n| self.nodes[n.index()].step.id.clone())
            .collect();
        if let Some(first) = members.first().cloned() {
            members.push(first);
        }
        members
    }

    /// Topologically sorted step ids
    pub fn topological_order(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|&i| self.nodes[i].step.id.clone())
            .collect()
    }

    /// Topological order of the direct members of one condition branch
    pub fn branch_order(&self, condition: &str, branch: Branch) -> Vec<String> {
        self.order
            .iter()
            .map(|&i| &self.nodes[i])
            .filter(|n| matches!(&n.parent, Some((c, b)) if c == condition && *b == branch))
            .map(|n| n.step.id.clone())
            .collect()
    }

    /// Every step nested (at any depth) inside one condition branch
    pub fn branch_members(&self, condition: &str, branch: Branch) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| self.is_within(n, condition, branch))
            .map(|n| n.step.id.clone())
            .collect()
    }

    fn is_within(&self, node: &StepNode, condition: &str, branch: Branch) -> bool {
        let mut parent = node.parent.as_ref();
        while let Some((c, b)) = parent {
            if c == condition && *b == branch {
                return true;
            }
            parent = self.node(c).and_then(|n| n.parent.as_ref());
        }
        false
    }

    /// All nodes in declaration order
    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    /// Look up a node by step id
    pub fn node(&self, id: &str) -> Option<&StepNode> {
        let index = self.name_to_index.get(id)?;
        self.nodes.get(self.graph[*index])
    }

    /// Look up a step by id
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.node(id).map(|n| &n.step)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Option<Vec<String>> {
        let node = self.name_to_index.get(id)?;
        let mut indices: Vec<usize> = self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| self.graph[n])
            .collect();
        indices.sort();
        Some(
            indices
                .into_iter()
                .map(|i| self.nodes[i].step.id.clone())
                .collect(),
        )
    }

    /// Steps that must finish before this one (including its condition step)
    pub fn dependencies(&self, id: &str) -> Option<Vec<String>> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Check if step A depends (directly or transitively) on step B
    pub fn depends_on(&self, step_a: &str, step_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(step_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(step_b) else {
            return false;
        };

        node_a != node_b && has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    fn edges(&self) -> Vec<(String, String, EdgeKind)> {
        let mut edges: Vec<(usize, usize, EdgeKind)> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some((self.graph[from], self.graph[to], self.graph[e]))
            })
            .collect();
        edges.sort_by_key(|(from, to, _)| (*to, *from));

        edges
            .into_iter()
            .map(|(from, to, kind)| {
                (
                    self.nodes[from].step.id.clone(),
                    self.nodes[to].step.id.clone(),
                    kind,
                )
            })
            .collect()
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in &self.nodes {
            let id = mermaid_id(&node.step.id);
            if node.step.is_condition() {
                out.push_str(&format!("    {}{{\"{}\"}}\n", id, node.step.id));
            } else {
                out.push_str(&format!("    {}[\"{}\"]\n", id, node.step.id));
            }
        }

        for (from, to, kind) in self.edges() {
            let arrow = match kind {
                EdgeKind::Data => "-->".to_string(),
                EdgeKind::Order => "-.->".to_string(),
                EdgeKind::Branch(branch) => format!("-->|{}|", branch),
            };
            out.push_str(&format!("    {} {} {}\n", mermaid_id(&from), arrow, mermaid_id(&to)));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in self.nodes.iter().filter(|n| n.step.is_condition()) {
            out.push_str(&format!("    \"{}\" [shape=diamond];\n", node.step.id));
        }

        for (from, to, kind) in self.edges() {
            match kind {
                EdgeKind::Data => out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to)),
                EdgeKind::Order => {
                    out.push_str(&format!("    \"{}\" -> \"{}\" [style=dashed];\n", from, to))
                }
                EdgeKind::Branch(branch) => out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    from, to, branch
                )),
            }
        }

        // Isolated nodes (no edges)
        for node in &self.nodes {
            let index = self.name_to_index[&node.step.id];
            if self.graph.neighbors_undirected(index).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", node.step.id));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, &index) in self.order.iter().enumerate() {
            let node = &self.nodes[index];
            out.push_str(&format!("{}. {} ({})", i + 1, node.step.id, node.step.kind_name()));

            if let Some((ref condition, branch)) = node.parent {
                out.push_str(&format!(" [{} of {}]", branch, condition));
            }

            let deps: Vec<String> = self
                .dependencies(&node.step.id)
                .unwrap_or_default()
                .into_iter()
                .filter(|d| !matches!(&node.parent, Some((c, _)) if c == d))
                .collect();
            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }
}

fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
