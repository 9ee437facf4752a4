//! Structural repair rules and the shape key the pattern cache indexes
//! on (spec §4.2).

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::NodeSpec;
use crate::llm::{CompletionRequest, LlmClient, ToolChoiceMode};
use crate::message::Message;

/// Result of one `clean_output` call.
#[derive(Debug, Clone, PartialEq)]
pub enum CleanOutcome {
    AlreadyValid(HashMap<String, Value>),
    RepairedFromCache(HashMap<String, Value>),
    RepairedStructurally(HashMap<String, Value>),
    RepairedByModel(HashMap<String, Value>),
    FallbackToRaw(HashMap<String, Value>),
}

impl CleanOutcome {
    pub fn into_output(self) -> HashMap<String, Value> {
        match self {
            CleanOutcome::AlreadyValid(o)
            | CleanOutcome::RepairedFromCache(o)
            | CleanOutcome::RepairedStructurally(o)
            | CleanOutcome::RepairedByModel(o)
            | CleanOutcome::FallbackToRaw(o) => o,
        }
    }
}

/// A cheap, purely structural transformation tried before paying for a
/// model call. Cloneable/`Copy` function pointers so the pattern cache
/// can store "which rule worked last time" per shape without boxing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairRule {
    /// `{"summary": {"summary": "..."}}` -> unwrap the inner same-named value.
    UnwrapNestedSameKey,
    /// A single declared key, output is a bare JSON string that parses to
    /// an object containing it -> parse and lift.
    ParseStringAsJsonObject,
    /// Exactly one declared key, output has exactly one entry under a
    /// different name -> rename it.
    RenameSoleKey,
}

const ALL_RULES: [RepairRule; 3] = [
    RepairRule::UnwrapNestedSameKey,
    RepairRule::ParseStringAsJsonObject,
    RepairRule::RenameSoleKey,
];

pub const STRUCTURAL_RULES: &[RepairRule] = &ALL_RULES;

impl RepairRule {
    pub fn apply(
        &self,
        raw: &HashMap<String, Value>,
        declared_keys: &[String],
    ) -> Option<HashMap<String, Value>> {
        match self {
            RepairRule::UnwrapNestedSameKey => unwrap_nested_same_key(raw, declared_keys),
            RepairRule::ParseStringAsJsonObject => parse_string_as_json_object(raw, declared_keys),
            RepairRule::RenameSoleKey => rename_sole_key(raw, declared_keys),
        }
    }
}

fn unwrap_nested_same_key(
    raw: &HashMap<String, Value>,
    declared_keys: &[String],
) -> Option<HashMap<String, Value>> {
    let mut out = raw.clone();
    let mut changed = false;
    for key in declared_keys {
        if let Some(Value::Object(inner)) = raw.get(key) {
            if let Some(nested) = inner.get(key) {
                out.insert(key.clone(), nested.clone());
                changed = true;
            }
        }
    }
    changed.then_some(out)
}

fn parse_string_as_json_object(
    raw: &HashMap<String, Value>,
    declared_keys: &[String],
) -> Option<HashMap<String, Value>> {
    if declared_keys.len() != 1 {
        return None;
    }
    let key = &declared_keys[0];
    let Value::String(s) = raw.get(key)? else {
        return None;
    };
    let parsed: Value = serde_json::from_str(s).ok()?;
    let mut out = raw.clone();
    if let Some(v) = parsed.get(key) {
        out.insert(key.clone(), v.clone());
        return Some(out);
    }
    if let Value::Object(_) = parsed {
        out.insert(key.clone(), parsed);
        return Some(out);
    }
    None
}

fn rename_sole_key(
    raw: &HashMap<String, Value>,
    declared_keys: &[String],
) -> Option<HashMap<String, Value>> {
    if declared_keys.len() != 1 || raw.len() != 1 {
        return None;
    }
    let declared = &declared_keys[0];
    if raw.contains_key(declared) {
        return None;
    }
    let (_, value) = raw.iter().next()?;
    let mut out = HashMap::new();
    out.insert(declared.clone(), value.clone());
    Some(out)
}

/// Detects the canonical LLM-output trap (spec §4.2 validation check 2):
/// a declared key whose value is itself an object containing that same
/// key name one level deeper, or a JSON-encoded string that parses to
/// one. A key in this shape is technically "present" by a bare
/// presence/null check, but still needs the unwrap repair.
pub(super) fn has_same_key_wrapper(value: &Value, key: &str) -> bool {
    if let Value::Object(map) = value {
        return map.contains_key(key);
    }
    if let Value::String(s) = value {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(s) {
            return map.contains_key(key);
        }
    }
    false
}

/// Spec §4.2 validation check 3: a string value over 500 chars that does
/// not parse as JSON is suspicious enough to warn about, though it is not
/// itself a repair trigger.
pub(super) fn is_oversized_unparsed_string(value: &Value) -> bool {
    match value {
        Value::String(s) => s.len() > 500 && serde_json::from_str::<Value>(s).is_err(),
        _ => false,
    }
}

/// Coarse shape fingerprint used as the pattern-cache key: a scope label
/// (which source/target pair, or which node, this repair is for) plus
/// which required keys were present/absent/wrong-typed, not the exact
/// values (spec §4.2: the cache holds repair *strategies*, not results,
/// keyed on `(source_id, target_id, hash(sorted errors))` — the per-key
/// presence/type markers here are that hashed error signature).
pub(super) fn shape_key_for(scope: &str, required_keys: &[String], raw: &HashMap<String, Value>) -> String {
    let mut parts = vec![scope.to_string()];
    for key in required_keys {
        let marker = match raw.get(key) {
            None => "absent",
            Some(Value::Null) => "null",
            Some(Value::String(_)) => "string",
            Some(Value::Object(_)) => "object",
            Some(Value::Array(_)) => "array",
            Some(Value::Number(_)) => "number",
            Some(Value::Bool(_)) => "bool",
        };
        parts.push(format!("{key}:{marker}"));
    }
    parts.push(format!("len:{}", raw.len()));
    parts.join("|")
}

pub(super) fn shape_key(node: &NodeSpec, raw: &HashMap<String, Value>) -> String {
    shape_key_for(&node.id, &node.output_keys, raw)
}

pub(super) fn build_request_for(required_keys: &[String], raw_output: &HashMap<String, Value>) -> CompletionRequest {
    let raw_json = serde_json::to_string(raw_output).unwrap_or_default();
    let prompt = format!(
        "The following JSON object was produced for a step expecting keys {:?}. \
         Return a corrected JSON object with exactly those keys, preserving \
         the original values where they already fit. Input: {raw_json}",
        required_keys
    );
    CompletionRequest {
        messages: vec![Message::user(prompt)],
        tools: vec![],
        tool_choice: ToolChoiceMode::None,
        max_tokens: Some(1024),
        model: None,
    }
}

pub(super) fn build_request(node: &NodeSpec, raw_output: &HashMap<String, Value>) -> CompletionRequest {
    build_request_for(&node.output_keys, raw_output)
}

pub(super) async fn llm_repair_for(
    llm: &dyn LlmClient,
    required_keys: &[String],
    raw_output: &HashMap<String, Value>,
) -> Option<HashMap<String, Value>> {
    let request = build_request_for(required_keys, raw_output);
    let response = llm.complete(request).await.ok()?;
    let parsed: Value = serde_json::from_str(&response.content).ok()?;
    match parsed {
        Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}
