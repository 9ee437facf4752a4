//! `GraphSpec`: the full declarative graph plus loop configuration (spec §3.1).
//!
//! Validation is grounded on the teacher's `StateGraph::compile_internal`
//! (`graph/state_graph.rs`): check every edge endpoint exists, check
//! distinguished node sets reference real nodes, then accept. Unlike the
//! teacher's `StateGraph`, which must reduce to a single linear chain or a
//! conditional router, a `GraphSpec` is a general directed graph — cycles
//! are expected (retry/escalation edges, spec §9) and are bounded only by
//! `max_retries`/`max_node_visits`/`max_steps`, never rejected at compile time.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::compile_error::CompilationError;
use super::edge_spec::EdgeSpec;
use super::node_spec::{NodeKind, NodeSpec};

/// Bounds on the inner LLM-tool-use loop (spec §4.1.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoopConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_tool_calls_per_turn")]
    pub max_tool_calls_per_turn: u32,
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: u32,
    #[serde(default = "default_stall_detection_threshold")]
    pub stall_detection_threshold: u32,
}

fn default_max_iterations() -> u32 {
    15
}
fn default_max_tool_calls_per_turn() -> u32 {
    8
}
fn default_max_history_tokens() -> u32 {
    32_000
}
fn default_stall_detection_threshold() -> u32 {
    3
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tool_calls_per_turn: default_max_tool_calls_per_turn(),
            max_history_tokens: default_max_history_tokens(),
            stall_detection_threshold: default_stall_detection_threshold(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GraphSpec {
    pub id: String,
    pub goal_id: String,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    pub entry_node: String,
    #[serde(default)]
    pub entry_points: HashMap<String, String>,
    #[serde(default)]
    pub terminal_nodes: HashSet<String>,
    #[serde(default)]
    pub pause_nodes: HashSet<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub loop_config: LoopConfig,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_decision: u32,
}

fn default_max_steps() -> u32 {
    50
}
fn default_model() -> String {
    "default".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}

impl GraphSpec {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges for `source`, ordered by descending priority then by
    /// declaration order for stable ties (spec §4.1 step 13).
    pub fn outgoing_edges(&self, source: &str) -> Vec<&EdgeSpec> {
        let mut edges: Vec<&EdgeSpec> = self.edges.iter().filter(|e| e.source == source).collect();
        edges.sort_by(|a, b| b.priority.cmp(&a.priority));
        edges
    }

    /// Structural validation per spec §3.1 invariants. Mirrors the
    /// teacher's `compile_internal`: check node ids exist, then check the
    /// distinguished sets (entry/terminal/pause/entry_points).
    pub fn validate(&self) -> Result<(), CompilationError> {
        if self.nodes.is_empty() {
            return Err(CompilationError::EmptyGraph);
        }
        let node_ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();

        for edge in &self.edges {
            if !node_ids.contains(edge.source.as_str()) {
                return Err(CompilationError::NodeNotFound {
                    edge_id: edge.id.clone(),
                    node_id: edge.source.clone(),
                });
            }
            if !node_ids.contains(edge.target.as_str()) {
                return Err(CompilationError::NodeNotFound {
                    edge_id: edge.id.clone(),
                    node_id: edge.target.clone(),
                });
            }
            // Empty expressions default to true (spec §4.1.3); only a
            // wholly-missing field is rejected, not an empty string.
            if edge.condition == super::edge_spec::EdgeCondition::Conditional
                && edge.condition_expr.is_none()
            {
                return Err(CompilationError::MissingConditionExpr(edge.id.clone()));
            }
        }

        if !node_ids.contains(self.entry_node.as_str()) {
            return Err(CompilationError::UnknownEntryNode(self.entry_node.clone()));
        }
        for t in &self.terminal_nodes {
            if !node_ids.contains(t.as_str()) {
                return Err(CompilationError::UnknownTerminalNode(t.clone()));
            }
        }
        for p in &self.pause_nodes {
            if !node_ids.contains(p.as_str()) {
                return Err(CompilationError::UnknownPauseNode(p.clone()));
            }
        }
        for (name, target) in &self.entry_points {
            if !node_ids.contains(target.as_str()) {
                return Err(CompilationError::UnknownEntryPoint {
                    name: name.clone(),
                    node_id: target.clone(),
                });
            }
        }

        for node in &self.nodes {
            if node.kind == NodeKind::LlmToolUse && node.tool_names.is_empty() {
                return Err(CompilationError::ToolUseNodeWithoutTools(node.id.clone()));
            }
        }

        let mut seen = HashSet::new();
        for edge in &self.edges {
            if !seen.insert(edge.identity_key()) {
                return Err(CompilationError::DuplicateEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    condition: edge.condition,
                });
            }
        }

        Ok(())
    }

    /// Resolves `session_state.resume_from` (a symbolic entry-point name,
    /// e.g. `"<pause_id>_resume"`) to a concrete node id, per spec §4.1.7.
    pub fn resolve_resume_entry(&self, resume_from: &str) -> Option<&str> {
        self.entry_points.get(resume_from).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge_spec::EdgeCondition;

    fn node(id: &str, kind: NodeKind) -> NodeSpec {
        NodeSpec {
            id: id.into(),
            display_name: id.into(),
            kind,
            input_keys: vec![],
            output_keys: vec![],
            nullable_output_keys: vec![],
            tool_names: vec![],
            system_prompt: None,
            max_retries: 0,
            max_node_visits: u32::MAX,
            client_facing: false,
        }
    }

    fn edge(id: &str, source: &str, target: &str, condition: EdgeCondition) -> EdgeSpec {
        EdgeSpec {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition,
            condition_expr: None,
            description: None,
            priority: 0,
            input_mapping: HashMap::new(),
        }
    }

    fn base_graph() -> GraphSpec {
        GraphSpec {
            id: "g".into(),
            goal_id: "goal".into(),
            nodes: vec![node("a", NodeKind::Function), node("b", NodeKind::Function)],
            edges: vec![edge("e1", "a", "b", EdgeCondition::Always)],
            entry_node: "a".into(),
            entry_points: HashMap::new(),
            terminal_nodes: ["b".to_string()].into_iter().collect(),
            pause_nodes: HashSet::new(),
            max_steps: 50,
            loop_config: LoopConfig::default(),
            default_model: "default".into(),
            max_tokens_per_decision: 4096,
        }
    }

    #[test]
    fn empty_graph_fails_validation() {
        let mut g = base_graph();
        g.nodes.clear();
        g.edges.clear();
        assert_eq!(g.validate(), Err(CompilationError::EmptyGraph));
    }

    #[test]
    fn edge_to_unknown_node_fails() {
        let mut g = base_graph();
        g.edges.push(edge("e2", "b", "missing", EdgeCondition::Always));
        assert!(matches!(
            g.validate(),
            Err(CompilationError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn tool_use_node_without_tools_fails() {
        let mut g = base_graph();
        g.nodes.push(node("c", NodeKind::LlmToolUse));
        assert!(matches!(
            g.validate(),
            Err(CompilationError::ToolUseNodeWithoutTools(id)) if id == "c"
        ));
    }

    #[test]
    fn duplicate_edge_triple_fails() {
        let mut g = base_graph();
        g.edges.push(edge("e2", "a", "b", EdgeCondition::Always));
        assert!(matches!(
            g.validate(),
            Err(CompilationError::DuplicateEdge { .. })
        ));
    }

    #[test]
    fn valid_graph_passes() {
        assert!(base_graph().validate().is_ok());
    }

    #[test]
    fn outgoing_edges_ordered_by_descending_priority() {
        let mut g = base_graph();
        g.nodes.push(node("c", NodeKind::Function));
        g.edges.push(edge("e2", "a", "c", EdgeCondition::Always));
        g.edges[0].priority = 1;
        g.edges[1].priority = 5;
        let out = g.outgoing_edges("a");
        assert_eq!(out[0].id, "e2");
        assert_eq!(out[1].id, "e1");
    }
}
