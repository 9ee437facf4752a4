//! Output cleaner (spec §4.2): validates a node's raw output against its
//! declared keys and, when it's malformed in a recognized way, repairs it
//! without a full model re-invocation.
//!
//! Grounded on the teacher's `Cache<K, V>` trait (`cache/mod.rs`): same
//! get/set-with-TTL shape, specialized here to a bounded, age-evicted
//! repair-pattern cache keyed on the node id and the raw output's shape
//! rather than its exact text (spec §4.2: "a cheap LLM with a pattern
//! cache", the cache holding *how* to repair, not the repaired value).

mod pattern_cache;
mod repair;

pub use pattern_cache::{PatternCache, PatternCacheConfig, PatternCacheStats};
pub use repair::{CleanOutcome, RepairRule};

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::NodeSpec;
use crate::llm::{CompletionRequest, LlmClient};

/// Checks a node's raw output against its declared `output_keys` /
/// `nullable_output_keys` (spec §4.1 step 8). Returns the offending keys,
/// empty when the output is already valid.
pub fn validate_output(node: &NodeSpec, output: &HashMap<String, Value>) -> Vec<String> {
    validate_required(&node.output_keys, &node.nullable_output_keys, output)
}

/// Generic form of [`validate_output`]: which of `required_keys` are
/// missing (absent or null) from `output`, given `nullable` exempts some
/// of them from the non-null requirement.
pub fn validate_required(required_keys: &[String], nullable: &[String], output: &HashMap<String, Value>) -> Vec<String> {
    required_keys
        .iter()
        .filter(|key| {
            let present_non_null = output.get(key.as_str()).map(|v| !v.is_null()).unwrap_or(false);
            !present_non_null && !nullable.iter().any(|n| &n == key)
        })
        .cloned()
        .collect()
}

/// The full deep-validation result spec §4.2 describes: missing/invalid
/// keys that block the node (`errors`) plus non-blocking observations
/// (`warnings`) worth journaling but not worth repairing over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs all four spec §4.2 validation checks: missing required keys,
/// the nested same-key JSON trap, oversized un-parsed strings, and
/// (implicitly, since no per-key type schema is modeled here — see
/// DESIGN.md) no type-mismatch check beyond presence/null.
pub fn validate_deep(required_keys: &[String], nullable: &[String], output: &HashMap<String, Value>) -> ValidationResult {
    let mut errors = validate_required(required_keys, nullable, output);
    let mut warnings = Vec::new();
    for key in required_keys {
        if let Some(value) = output.get(key) {
            if repair::has_same_key_wrapper(value, key) && !errors.contains(key) {
                errors.push(format!("{key}: nested same-key JSON string"));
            }
            if repair::is_oversized_unparsed_string(value) {
                warnings.push(format!("{key}: unusually large un-parsed string"));
            }
        }
    }
    ValidationResult { errors, warnings }
}

/// Whether `raw_output` needs a repair pass before it satisfies
/// `required_keys`: either a required key is missing/null, or a present
/// key is wrapped in the nested same-key JSON trap (spec §4.2 checks 1-2).
fn needs_repair(required_keys: &[String], nullable: &[String], output: &HashMap<String, Value>) -> bool {
    !validate_required(required_keys, nullable, output).is_empty()
        || required_keys
            .iter()
            .any(|key| output.get(key).map(|v| repair::has_same_key_wrapper(v, key)).unwrap_or(false))
}

/// Attempts to repair `raw_output` into a value satisfying `node`'s
/// declared keys, trying cheap structural rules before falling back to
/// a cheap-model repair call. Returns the repaired output and whether a
/// fallback-to-raw occurred (spec §4.2 "fallback_to_raw").
pub async fn clean_output(
    node: &NodeSpec,
    raw_output: HashMap<String, Value>,
    cache: &PatternCache,
    repair_llm: Option<&dyn LlmClient>,
) -> CleanOutcome {
    clean_required(&node.id, &node.output_keys, &node.nullable_output_keys, raw_output, cache, repair_llm).await
}

/// Bridges `raw_output` (a source node's just-produced output) against a
/// downstream node's declared *input* contract, the hand-off described in
/// spec §4.1.2 / §4.2: "validates that a node's output satisfies the next
/// node's input contract". Declared input keys have no nullable concept,
/// so every one of them is required.
pub async fn clean_for_target(
    source_id: &str,
    target: &NodeSpec,
    raw_output: HashMap<String, Value>,
    cache: &PatternCache,
    repair_llm: Option<&dyn LlmClient>,
) -> CleanOutcome {
    let scope = format!("{source_id}->{}", target.id);
    clean_required(&scope, &target.input_keys, &[], raw_output, cache, repair_llm).await
}

/// Shared repair pipeline: structural rules first (cache-remembered, then
/// tried fresh), falling back to a model call, then to the raw payload
/// (spec §4.2 cache-application order / fallback rule).
async fn clean_required(
    scope: &str,
    required_keys: &[String],
    nullable: &[String],
    raw_output: HashMap<String, Value>,
    cache: &PatternCache,
    repair_llm: Option<&dyn LlmClient>,
) -> CleanOutcome {
    if !needs_repair(required_keys, nullable, &raw_output) {
        return CleanOutcome::AlreadyValid(raw_output);
    }

    let shape_key = repair::shape_key_for(scope, required_keys, &raw_output);

    if let Some(rule) = cache.get(&shape_key) {
        if let Some(repaired) = rule.apply(&raw_output, required_keys) {
            if validate_required(required_keys, nullable, &repaired).is_empty() {
                cache.record_hit(&shape_key);
                return CleanOutcome::RepairedFromCache(repaired);
            }
        }
    }

    for rule in repair::STRUCTURAL_RULES {
        if let Some(repaired) = rule.apply(&raw_output, required_keys) {
            if validate_required(required_keys, nullable, &repaired).is_empty() {
                cache.insert(shape_key, *rule);
                return CleanOutcome::RepairedStructurally(repaired);
            }
        }
    }

    if let Some(llm) = repair_llm {
        if let Some(repaired) = repair::llm_repair_for(llm, required_keys, &raw_output).await {
            if validate_required(required_keys, nullable, &repaired).is_empty() {
                return CleanOutcome::RepairedByModel(repaired);
            }
        }
    }

    CleanOutcome::FallbackToRaw(raw_output)
}

/// Builds the prompt sent to the repair model, exposed for callers that
/// want to construct their own `CompletionRequest` (e.g. to set a
/// specific cheap model name).
pub fn repair_request(node: &NodeSpec, raw_output: &HashMap<String, Value>) -> CompletionRequest {
    repair::build_request(node, raw_output)
}

/// Cache occupancy and hit-count snapshot (spec §6.1 `get_stats`).
pub fn get_stats(cache: &PatternCache) -> PatternCacheStats {
    cache.stats()
}

/// Drops every cached repair pattern (spec §6.1 `clear_cache`).
pub fn clear_cache(cache: &PatternCache) {
    cache.clear();
}
