// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Step reference graph
//!
//! An edge runs from an insert step to every later step that reads its
//! primary key. Validation already guarantees edges only point forward in
//! `idx` order, so the graph is acyclic by construction; it exists for
//! inspection and rendering.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::validated::{Binding, ValidatedPipeline};
use super::Action;

#[derive(Debug, Clone)]
struct StepNode {
    label: String,
    idx: u32,
    action: Action,
    table: String,
}

/// Reference graph of a validated pipeline
pub struct ReferenceGraph {
    graph: DiGraph<StepNode, String>,
    by_label: HashMap<String, NodeIndex>,
    /// Nodes in execution order
    order: Vec<NodeIndex>,
}

impl ReferenceGraph {
    /// Build the graph; edges carry the column the key is written into
    pub fn build(pipeline: &ValidatedPipeline) -> Self {
        let mut graph = DiGraph::new();
        let mut by_label = HashMap::new();
        let mut order = Vec::with_capacity(pipeline.steps().len());

        for step in pipeline.steps() {
            let node = graph.add_node(StepNode {
                label: step.label(),
                idx: step.idx,
                action: step.action,
                table: step.table.clone(),
            });
            by_label.insert(step.label(), node);
            order.push(node);
        }

        for (position, step) in pipeline.steps().iter().enumerate() {
            for (column, binding) in &step.values {
                if let Binding::StepResult { position: producer, .. } = binding {
                    graph.add_edge(order[*producer], order[position], column.clone());
                }
            }
        }

        Self {
            graph,
            by_label,
            order,
        }
    }

    /// Number of reference edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Steps whose keys `label` reads
    pub fn dependencies(&self, label: &str) -> Option<Vec<String>> {
        self.neighbors(label, Direction::Incoming)
    }

    /// Steps that read the key `label` produces
    pub fn dependents(&self, label: &str) -> Option<Vec<String>> {
        self.neighbors(label, Direction::Outgoing)
    }

    /// Whether `a` reads, directly or transitively, a key produced by `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        match (self.by_label.get(a), self.by_label.get(b)) {
            (Some(&a), Some(&b)) if a != b => {
                petgraph::algo::has_path_connecting(&self.graph, b, a, None)
            }
            _ => false,
        }
    }

    fn neighbors(&self, label: &str, direction: Direction) -> Option<Vec<String>> {
        let node = self.by_label.get(label)?;
        let mut found: Vec<(u32, String)> = self
            .graph
            .neighbors_directed(*node, direction)
            .map(|n| (self.graph[n].idx, self.graph[n].label.clone()))
            .collect();
        found.sort();
        found.dedup();
        Some(found.into_iter().map(|(_, label)| label).collect())
    }

    /// Plain text listing in execution order
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, node) in self.order.iter().enumerate() {
            let step = &self.graph[*node];
            out.push_str(&format!(
                "{}. {} [idx {}] {} {}",
                i + 1,
                step.label,
                step.idx,
                step.action,
                step.table
            ));

            let deps = self.dependencies(&step.label).unwrap_or_default();
            if !deps.is_empty() {
                out.push_str(&format!(" (uses: {})", deps.join(", ")));
            }
            out.push('\n');
        }

        out
    }

    /// Mermaid flowchart
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in &self.order {
            let step = &self.graph[*node];
            out.push_str(&format!(
                "    {}[\"{} ({} {})\"]\n",
                step.label, step.label, step.action, step.table
            ));
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    {} -->|{}| {}\n",
                    self.graph[from].label, self.graph[edge], self.graph[to].label
                ));
            }
        }

        out
    }

    /// Graphviz DOT
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in &self.order {
            let step = &self.graph[*node];
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n{} {}\"];\n",
                step.label, step.label, step.action, step.table
            ));
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    self.graph[from].label, self.graph[to].label, self.graph[edge]
                ));
            }
        }

        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FunctionDefinition, StepResolver};
    use serde_json::json;

    fn graph() -> ReferenceGraph {
        let definition: FunctionDefinition = serde_json::from_value(json!({
            "name": "signup",
            "functions": [
                {"idx": 1, "name": "account", "table": "accounts", "action": "insert",
                 "values": {"email": {"source": "caller"}}},
                {"idx": 2, "name": "profile", "table": "profiles", "action": "insert",
                 "values": {"account_id": {"source": "step", "step": "account"}}},
                {"idx": 3, "table": "audit", "action": "insert",
                 "values": {
                     "account_id": {"source": "step", "step": "account"},
                     "profile_id": {"source": "step", "step": "profile"}
                 }},
                {"idx": 4, "name": "welcome", "table": "accounts", "action": "fetch",
                 "columns": ["*"]}
            ]
        }))
        .unwrap();
        ReferenceGraph::build(&StepResolver::validate(&definition).unwrap())
    }

    #[test]
    fn test_edges_follow_references() {
        let graph = graph();
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(
            graph.dependents("account").unwrap(),
            vec!["profile", "step_3"]
        );
        assert_eq!(
            graph.dependencies("step_3").unwrap(),
            vec!["account", "profile"]
        );
        assert!(graph.dependencies("welcome").unwrap().is_empty());
        assert!(graph.dependencies("nope").is_none());
    }

    #[test]
    fn test_transitive_dependency() {
        let graph = graph();
        assert!(graph.depends_on("step_3", "account"));
        assert!(graph.depends_on("profile", "account"));
        assert!(!graph.depends_on("account", "profile"));
        assert!(!graph.depends_on("welcome", "account"));
    }

    #[test]
    fn test_renderings() {
        let graph = graph();

        let text = graph.to_text();
        assert!(text.starts_with("1. account [idx 1] insert accounts\n"));
        assert!(text.contains("3. step_3 [idx 3] insert audit (uses: account, profile)"));

        let mermaid = graph.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("account -->|account_id| profile"));

        let dot = graph.to_dot();
        assert!(dot.contains("\"account\" -> \"profile\" [label=\"account_id\"];"));
    }
}
