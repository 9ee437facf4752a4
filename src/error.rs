//! Top-level error type for the execution engine.
//!
//! Mirrors the teacher's `RunError`/`CompilationError` split: configuration
//! errors surface before the first step, node errors carry enough context
//! (node id, last error, retry count) for the run journal to stay
//! self-describing.

use thiserror::Error;

use crate::graph::CompilationError;
use crate::guardrail::GuardrailViolation;

/// Error returned by `GraphExecutor::execute` and its collaborators.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The graph failed structural validation (`GraphSpec::validate`).
    #[error("graph validation failed: {0}")]
    Validation(#[from] CompilationError),

    /// A node declared a tool name absent from the tool registry.
    #[error("missing tools: {missing:?} (registered: {registered:?})")]
    MissingTools {
        missing: Vec<String>,
        registered: Vec<String>,
    },

    /// A node failed after exhausting `max_retries`.
    #[error("Node '{node_id}' failed after {attempts} attempts: {last_error}")]
    NodeExhausted {
        node_id: String,
        attempts: u32,
        last_error: String,
    },

    /// `graph.max_steps` was reached.
    #[error("Max steps exceeded ({max_steps}). Agent failed to reach a conclusion")]
    MaxStepsExceeded { max_steps: u32 },

    /// A `function` node had no registration.
    #[error("function node '{0}' has no registered implementation")]
    UnregisteredFunction(String),

    /// A router node named a node id absent from the graph.
    #[error("router node '{node_id}' named unknown successor '{target}'")]
    UnknownRouterTarget { node_id: String, target: String },

    /// A guardrail pre-check blocked the action.
    #[error("guardrail blocked: {0}")]
    GuardrailBlocked(GuardrailViolation),

    /// A scoped-memory access violated the node's declared key set.
    #[error("memory permission error: {0}")]
    MemoryPermission(String),

    /// Wraps an LLM collaborator failure.
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// Wraps a tool dispatch failure that was not itself recoverable as a
    /// tool-result message (dispatcher unavailable, not a tool error).
    #[error("tool dispatch failed: {0}")]
    ToolDispatch(String),

    /// Generic execution failure, for collaborators with untyped errors.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}
