//! Static guardrail policy configuration (spec §4.3). Built once per
//! graph and shared read-only across the run.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub forbidden_tools: HashSet<String>,
    pub max_calls_per_tool: HashMap<String, u32>,
    /// Consecutive failures for the same tool before the "tool loop" guard
    /// blocks further calls to it (spec §4.3, default 3).
    pub max_consecutive_tool_failures: u32,
    /// Per-decision token estimate cap; exceeding it only warns (spec
    /// §4.3 "Token-per-decision cap").
    pub max_tokens_per_decision: Option<u64>,
    /// Run-wide token budget; a projected total over this blocks (spec
    /// §4.3 "Token run budget").
    pub max_total_tokens: Option<u64>,
    /// Fraction of `max_total_tokens` above which a projected total only
    /// warns rather than blocks (spec §4.3 "Token budget threshold").
    pub warn_threshold_percent: f64,
    pub max_retries_per_node: Option<u32>,
    /// Run-wide cap on total retries across all nodes (spec §4.3 "Run retries").
    pub max_total_retries: Option<u32>,
    /// Hard latency ceiling; crossing it is a post-check warn with
    /// `Severity::Critical` (spec §4.3 post-check table — latency never
    /// blocks, only the pre-acted decision could have, and it already
    /// happened by the time latency is known).
    pub max_run_latency: Option<Duration>,
    /// Earlier latency threshold; crossing it is a post-check warn with
    /// `Severity::Minor`.
    pub warn_run_latency: Option<Duration>,
    /// Window (in distinct cycle length) to scan for a repeating node
    /// sequence. `0` disables loop detection.
    pub loop_detection_window: usize,
    /// Whether a detected node-revisit loop blocks (`true`) or only warns (`false`).
    pub block_on_loop_detection: bool,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            forbidden_tools: HashSet::new(),
            max_calls_per_tool: HashMap::new(),
            max_consecutive_tool_failures: 3,
            max_tokens_per_decision: None,
            max_total_tokens: None,
            warn_threshold_percent: 0.8,
            max_retries_per_node: None,
            max_total_retries: None,
            max_run_latency: None,
            warn_run_latency: None,
            loop_detection_window: 3,
            block_on_loop_detection: false,
        }
    }
}

impl GuardrailConfig {
    /// No budgets, no forbidden tools, loop detection warns only —
    /// everything short of outright pathological repetition is allowed
    /// through (spec §6.1 "factory helpers for permissive ... defaults").
    /// Identical to [`GuardrailConfig::default`]; kept as a named
    /// constructor so callers can express intent at the call site.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Conservative budgets suitable for an untrusted or newly-authored
    /// graph: a modest per-decision and run-wide token ceiling, bounded
    /// retries, a latency ceiling, and loop detection that blocks rather
    /// than warns (spec §6.1 "factory helpers for ... strict defaults").
    pub fn strict() -> Self {
        Self {
            max_tokens_per_decision: Some(4_000),
            max_total_tokens: Some(100_000),
            warn_threshold_percent: 0.7,
            max_retries_per_node: Some(3),
            max_total_retries: Some(10),
            max_run_latency: Some(Duration::from_secs(300)),
            warn_run_latency: Some(Duration::from_secs(180)),
            loop_detection_window: 3,
            block_on_loop_detection: true,
            ..Self::default()
        }
    }
}
