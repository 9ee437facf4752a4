//! One specific guardrail rule breach (spec §4.3). `Display`-backed so
//! `ExecutorError::GuardrailBlocked` can report it without an extra
//! conversion layer.

use thiserror::Error;

/// Distinguishes the two latency-warning severities spec §4.3's post-check
/// table calls for: crossing the hard ceiling is `Critical`, crossing the
/// earlier warn threshold is `Minor`. No other guard carries this
/// distinction in the spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Minor,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GuardrailViolation {
    #[error("tool '{tool_name}' is forbidden by policy")]
    ForbiddenTool { tool_name: String },

    #[error("tool '{tool_name}' call quota exceeded (limit {limit})")]
    ToolQuotaExceeded { tool_name: String, limit: u32 },

    /// Spec §4.3 "Tool loop": consecutive failures for one tool reach the
    /// configured max (default 3).
    #[error("tool '{tool_name}' failed {streak} times in a row (limit {limit})")]
    ToolLoopDetected { tool_name: String, streak: u32, limit: u32 },

    /// Spec §4.3 "Token-per-decision cap": a single decision's estimated
    /// tokens exceed the per-decision cap. Warn-only.
    #[error("decision estimated at {estimated} tokens exceeds per-decision cap {cap}")]
    TokenPerDecisionCapExceeded { estimated: u64, cap: u64 },

    #[error("token budget exceeded ({used}/{limit})")]
    TokenBudgetExceeded { used: u64, limit: u64 },

    #[error("retry budget exceeded for node '{node_id}' ({used}/{limit})")]
    RetryBudgetExceeded { node_id: String, used: u32, limit: u32 },

    /// Spec §4.3 "Run retries": total retries across the run reach the
    /// run-wide cap, distinct from any single node's cap.
    #[error("run retry budget exceeded ({used}/{limit})")]
    RunRetryBudgetExceeded { used: u32, limit: u32 },

    #[error("run latency {elapsed_ms}ms crossed {severity:?} ceiling {limit_ms}ms")]
    LatencyCeilingExceeded {
        elapsed_ms: u64,
        limit_ms: u64,
        severity: Severity,
    },

    #[error("loop detected at node '{node_id}'")]
    LoopDetected { node_id: String },
}
