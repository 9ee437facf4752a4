//! Goal, success criteria, and constraints — immutable per run (spec §3.1).

use serde::{Deserialize, Serialize};

/// One measurable way a run is judged against the goal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SuccessCriterion {
    pub id: String,
    pub description: String,
    pub metric: String,
    pub target: f64,
    pub weight: f64,
}

/// Severity of a constraint: `Hard` constraints cannot be traded off against
/// success criteria, `Soft` constraints can.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Hard,
    Soft,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Constraint {
    pub id: String,
    pub description: String,
    pub kind: ConstraintKind,
    pub category: String,
}

/// Goal bound to a `GraphSpec`. Immutable for the lifetime of a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}
