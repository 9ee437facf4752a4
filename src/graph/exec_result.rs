//! `ExecutionResult`: what `GraphExecutor::run` returns (spec §4.1, §6.1).

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::session::SessionState;
use crate::guardrail::GuardrailViolation;
use crate::message::Message;

/// Terminal status of one run.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionStatus {
    /// Reached a terminal node.
    Completed,
    /// Paused at a `human_input` node; `SessionState` carries the resume bundle.
    Paused(SessionState),
    /// Stopped by a blocking guardrail verdict.
    GuardrailBlocked(GuardrailViolation),
    /// `max_steps` reached without a terminal node.
    MaxStepsExceeded,
    /// A node exhausted its retries without succeeding.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub memory: HashMap<String, Value>,
    pub steps_taken: u32,
    pub final_node: Option<String>,
    /// Node ids visited, in order (spec §4.1 step 2, §6.1, §8 testable
    /// property 1: every adjacent pair is linked by an edge whose
    /// condition held at that step).
    pub path: Vec<String>,
    /// Inner-loop transcript accumulated across every node visited this
    /// run (spec §6.1 `ExecutionResult.history`).
    pub history: Vec<Message>,
    /// Cumulative tokens reported by the LLM collaborator across the run.
    pub total_tokens: u64,
    /// Wall-clock time since the run (or this resume) began.
    pub total_latency_ms: u64,
}

impl ExecutionResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.status, ExecutionStatus::Paused(_))
    }
}
