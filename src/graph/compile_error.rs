//! Graph structural-validation errors (spec §3.1 invariants).
//!
//! Grounded on the teacher's `CompilationError` (`graph/compile_error.rs`):
//! same shape (one variant per broken invariant, `Display` naming the
//! offending id), generalized to the richer invariant set of a
//! non-linear, possibly-cyclic graph.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompilationError {
    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("edge '{edge_id}' references unknown node: {node_id}")]
    NodeNotFound { edge_id: String, node_id: String },

    #[error("entry_node '{0}' is not a registered node")]
    UnknownEntryNode(String),

    #[error("terminal node '{0}' is not a registered node")]
    UnknownTerminalNode(String),

    #[error("pause node '{0}' is not a registered node")]
    UnknownPauseNode(String),

    #[error("entry point '{name}' -> '{node_id}' is not a registered node")]
    UnknownEntryPoint { name: String, node_id: String },

    #[error("node '{0}' has kind llm_tool_use but declares no tools")]
    ToolUseNodeWithoutTools(String),

    #[error("duplicate edge (source={source}, target={target}, condition={condition:?})")]
    DuplicateEdge {
        source: String,
        target: String,
        condition: crate::graph::EdgeCondition,
    },

    #[error("edge '{0}' has condition=conditional but no condition_expr")]
    MissingConditionExpr(String),
}
