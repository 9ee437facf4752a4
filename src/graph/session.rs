//! `SessionState`: the pause/resume bundle a `human_input` node hands
//! back to the embedder, and that must be supplied to resume the run
//! (spec §4.1.7).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Captured at the moment a `human_input` node pauses execution: enough
/// state to reconstruct the run later, possibly in a different process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub run_id: String,
    pub graph_id: String,
    pub paused_at_node: String,
    /// Memory snapshot at the moment of pausing.
    pub memory: HashMap<String, Value>,
    pub step_count: u32,
    /// Prompt surfaced to the human/embedder describing what input is needed.
    pub prompt: Option<String>,
    /// Symbolic resume entry point, e.g. `"{paused_at_node}_resume"`,
    /// resolved against `GraphSpec::entry_points` on resume.
    pub resume_token: String,
}

impl SessionState {
    pub fn resume_entry_name(&self) -> &str {
        &self.resume_token
    }
}

/// Input supplied by the embedder to resume a paused run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResumeInput {
    pub session: SessionState,
    /// Values to overlay onto memory before resuming, typically the
    /// human's answer keyed to the paused node's declared output keys.
    pub provided_values: HashMap<String, Value>,
}
