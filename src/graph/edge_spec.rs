//! `EdgeSpec`: one directed, conditioned edge between two nodes (spec §3.1, §4.1.3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    Always,
    OnSuccess,
    OnFailure,
    Conditional,
    LlmDecide,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeSpec {
    pub id: String,
    pub source: String,
    pub target: String,
    pub condition: EdgeCondition,
    /// Required when `condition == Conditional`; a restricted boolean
    /// expression evaluated by `ConditionEvaluator`.
    #[serde(default)]
    pub condition_expr: Option<String>,
    /// Natural-language description used to prompt the LLM when
    /// `condition == LlmDecide`.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i32,
    /// Source output key -> renamed memory key written before entering
    /// the target node (spec §4.1 step 14).
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
}

impl EdgeSpec {
    /// Identity for the "no two edges with identical (source, target,
    /// condition, condition_expr)" invariant (spec §3.1).
    pub(crate) fn identity_key(&self) -> (String, String, EdgeCondition, Option<String>) {
        (
            self.source.clone(),
            self.target.clone(),
            self.condition,
            self.condition_expr.clone(),
        )
    }
}
