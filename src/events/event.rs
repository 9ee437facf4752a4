//! Closed event-type vocabulary (spec §6.3). Grounded on the teacher's
//! `stream_event::ProtocolEvent` (`stream-event/src/event.rs`): a single
//! `#[serde(tag = "type", rename_all = "snake_case")]` enum rather than a
//! trait-object hierarchy, so the wire shape is fixed and exhaustive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::guardrail::GuardrailViolation;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted { graph_id: String },
    ExecutionCompleted { steps_taken: u32 },
    ExecutionFailed { reason: String },
    ExecutionPaused { node_id: String },
    ExecutionResumed { node_id: String },
    StateChanged { keys: Vec<String> },
    StateConflict { key: String, node_id: String },
    GoalProgress { criterion: String, met: bool },
    GoalAchieved,
    ConstraintViolation { violation: GuardrailViolation },
    StreamStarted { node_id: String },
    StreamStopped { node_id: String },
    Custom { value: Value },
}

/// Delivery priority (spec §4.4): `Critical` events bypass batching and
/// are flushed immediately; everything else is subject to adaptive
/// batching. Ordered low to high so `Ord` gives the ranking the spec's
/// priority queue needs directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl EventKind {
    /// Fixed priority mapping: failures/guardrail blocks/pauses are
    /// critical, state conflicts and resumptions are high, state/goal
    /// bookkeeping is normal, custom/stream chatter is low (spec §4.4).
    pub fn priority(&self) -> Priority {
        match self {
            EventKind::ExecutionFailed { .. }
            | EventKind::ExecutionPaused { .. }
            | EventKind::ConstraintViolation { .. } => Priority::Critical,
            EventKind::StateConflict { .. } | EventKind::ExecutionResumed { .. } => Priority::High,
            EventKind::ExecutionStarted { .. }
            | EventKind::ExecutionCompleted { .. }
            | EventKind::StateChanged { .. }
            | EventKind::GoalProgress { .. }
            | EventKind::GoalAchieved => Priority::Normal,
            EventKind::StreamStarted { .. } | EventKind::StreamStopped { .. } | EventKind::Custom { .. } => {
                Priority::Low
            }
        }
    }

    /// Discriminant name, for subscription filters that match by kind
    /// without constructing a payload (spec §4.4 subscription matching).
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ExecutionStarted { .. } => "execution_started",
            EventKind::ExecutionCompleted { .. } => "execution_completed",
            EventKind::ExecutionFailed { .. } => "execution_failed",
            EventKind::ExecutionPaused { .. } => "execution_paused",
            EventKind::ExecutionResumed { .. } => "execution_resumed",
            EventKind::StateChanged { .. } => "state_changed",
            EventKind::StateConflict { .. } => "state_conflict",
            EventKind::GoalProgress { .. } => "goal_progress",
            EventKind::GoalAchieved => "goal_achieved",
            EventKind::ConstraintViolation { .. } => "constraint_violation",
            EventKind::StreamStarted { .. } => "stream_started",
            EventKind::StreamStopped { .. } => "stream_stopped",
            EventKind::Custom { .. } => "custom",
        }
    }
}

/// One event on the bus: envelope (stream/execution identity, monotonic
/// sequence number, timestamp) plus the typed payload. Mirrors the
/// teacher's `Envelope` fields (`session_id`, `node_id`, `event_id`)
/// generalized to `stream_id`/`execution_id`/`sequence`
/// (`stream-event/src/envelope.rs`), extended with `correlation_id` per
/// spec §4.4's event shape.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Identifies the run's event stream; constant for the life of a run.
    pub stream_id: String,
    /// Identifies the specific execution (graph run) that produced this
    /// event, when the bus is shared across more than one execution.
    pub execution_id: Option<String>,
    /// Caller-supplied id for correlating an event with the request or
    /// node invocation that triggered it.
    pub correlation_id: Option<String>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn priority(&self) -> Priority {
        self.kind.priority()
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}
