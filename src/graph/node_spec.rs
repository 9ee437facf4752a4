//! `NodeSpec`: declarative description of one graph node (spec §3.1).

use serde::{Deserialize, Serialize};

/// The five node kinds the executor knows how to dispatch (spec §4.1 step 4).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    LlmToolUse,
    LlmGenerate,
    Router,
    Function,
    HumanInput,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub display_name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub input_keys: Vec<String>,
    #[serde(default)]
    pub output_keys: Vec<String>,
    /// Output keys in this set may be absent/null without failing validation
    /// (spec §4.1 step 8: "non-nullable keys are non-null").
    #[serde(default)]
    pub nullable_output_keys: Vec<String>,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: u32,
    #[serde(default)]
    pub client_facing: bool,
}

fn default_max_retries() -> u32 {
    0
}

fn default_max_node_visits() -> u32 {
    u32::MAX
}

impl NodeSpec {
    /// A node's declared output key is non-nullable unless listed in
    /// `nullable_output_keys`.
    pub fn is_nullable(&self, key: &str) -> bool {
        self.nullable_output_keys.iter().any(|k| k == key)
    }
}
