//! Guardrail engine (spec §4.3): pre/post policy checks run around every
//! node decision. Pre-checks can block a decision before it is acted on;
//! post-checks are advisory only and can never undo an already-applied
//! effect.
//!
//! No single teacher file implements a policy engine like this one; it is
//! grounded on the teacher's general error-enum idiom (one `thiserror`
//! variant per distinct failure shape, as in `graph/compile_error.rs`) and
//! on `cache::InMemoryCache`'s bounded/TTL counter bookkeeping
//! (`cache/mod.rs`) for the run-scoped counters below.

mod config;
mod violation;

pub use config::GuardrailConfig;
pub use violation::{GuardrailViolation, Severity};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::message::ToolCall;

/// Outcome of a guardrail pass: allow the decision through, allow it but
/// surface warnings, or block it outright (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum GuardrailVerdict {
    Allow,
    Warn(Vec<GuardrailViolation>),
    Block(GuardrailViolation),
}

impl GuardrailVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardrailVerdict::Block(_))
    }

    /// Folds a set of individually-evaluated rule outcomes into one
    /// verdict: any block wins outright; otherwise any warnings are
    /// carried; otherwise allow (spec §4.3 aggregation rule).
    fn aggregate(violations: Vec<(GuardrailViolation, bool)>) -> Self {
        if let Some((v, _)) = violations.iter().find(|(_, blocking)| *blocking) {
            return GuardrailVerdict::Block(v.clone());
        }
        let warnings: Vec<GuardrailViolation> = violations.into_iter().map(|(v, _)| v).collect();
        if warnings.is_empty() {
            GuardrailVerdict::Allow
        } else {
            GuardrailVerdict::Warn(warnings)
        }
    }
}

/// Run-scoped counters the engine consults and updates. One instance per
/// execution; shared with the executor so counters persist across steps.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub total_tokens_used: u64,
    pub retries_by_node: HashMap<String, u32>,
    pub total_retries: u32,
    pub tool_call_counts: HashMap<String, u32>,
    /// Consecutive failure streak per tool; reset to 0 on any success.
    pub tool_failure_streaks: HashMap<String, u32>,
    /// Last N node ids visited, oldest first — the window loop detection
    /// scans for an exact repeating cycle.
    pub recent_node_visits: Vec<String>,
    pub run_started_at: Option<Instant>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self {
            run_started_at: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_node_visit(&mut self, node_id: &str, window: usize) {
        self.recent_node_visits.push(node_id.to_string());
        let cap = window.max(1) * 4;
        if self.recent_node_visits.len() > cap {
            let drop = self.recent_node_visits.len() - cap;
            self.recent_node_visits.drain(0..drop);
        }
    }

    pub fn record_retry(&mut self, node_id: &str) {
        *self.retries_by_node.entry(node_id.to_string()).or_insert(0) += 1;
        self.total_retries += 1;
    }

    pub fn record_tool_call(&mut self, tool_name: &str) {
        *self.tool_call_counts.entry(tool_name.to_string()).or_insert(0) += 1;
    }

    /// Updates the consecutive-failure streak for one tool after dispatch
    /// (spec §4.3 "Tool loop"): any success resets it to zero.
    pub fn record_tool_result(&mut self, tool_name: &str, success: bool) {
        let streak = self.tool_failure_streaks.entry(tool_name.to_string()).or_insert(0);
        if success {
            *streak = 0;
        } else {
            *streak += 1;
        }
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.total_tokens_used += tokens;
    }

    pub fn elapsed(&self) -> Duration {
        self.run_started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Detects an exact repeating cycle of length 2..=window in the most
    /// recent visits (spec §4.3: loop detection).
    fn detect_loop(&self, window: usize) -> bool {
        let visits = &self.recent_node_visits;
        for cycle_len in 2..=window.max(2) {
            let needed = cycle_len * 2;
            if visits.len() < needed {
                continue;
            }
            let tail = &visits[visits.len() - needed..];
            let (first, second) = tail.split_at(cycle_len);
            if first == second {
                return true;
            }
        }
        false
    }
}

/// Evaluates every configured rule before a node decision is acted on
/// (spec §4.3 pre-check table): forbidden tools, per-tool call quotas,
/// per-tool consecutive-failure loop, token-per-decision cap, run token
/// budget and its warn threshold, node and run retry budgets, and
/// node-revisit loop detection. `estimated_tokens` is the caller's
/// estimate of what the *upcoming* decision will cost, so the token
/// guards can act before the call is made, not just after.
pub fn check_before_decision(
    config: &GuardrailConfig,
    counters: &RunCounters,
    node_id: &str,
    pending_tool_calls: &[ToolCall],
    estimated_tokens: u64,
) -> GuardrailVerdict {
    let mut results = Vec::new();

    for call in pending_tool_calls {
        if config.forbidden_tools.contains(&call.name) {
            results.push((
                GuardrailViolation::ForbiddenTool {
                    tool_name: call.name.clone(),
                },
                true,
            ));
        }
        if let Some(&max) = config.max_calls_per_tool.get(&call.name) {
            let used = counters.tool_call_counts.get(&call.name).copied().unwrap_or(0);
            if used + 1 > max {
                results.push((
                    GuardrailViolation::ToolQuotaExceeded {
                        tool_name: call.name.clone(),
                        limit: max,
                    },
                    true,
                ));
            }
        }
        let streak = counters.tool_failure_streaks.get(&call.name).copied().unwrap_or(0);
        if streak >= config.max_consecutive_tool_failures {
            results.push((
                GuardrailViolation::ToolLoopDetected {
                    tool_name: call.name.clone(),
                    streak,
                    limit: config.max_consecutive_tool_failures,
                },
                true,
            ));
        }
    }

    if let Some(cap) = config.max_tokens_per_decision {
        if estimated_tokens > cap {
            results.push((
                GuardrailViolation::TokenPerDecisionCapExceeded {
                    estimated: estimated_tokens,
                    cap,
                },
                false,
            ));
        }
    }

    if let Some(budget) = config.max_total_tokens {
        let projected = counters.total_tokens_used + estimated_tokens;
        if projected > budget {
            results.push((
                GuardrailViolation::TokenBudgetExceeded { used: projected, limit: budget },
                true,
            ));
        } else if (projected as f64) > (budget as f64) * config.warn_threshold_percent {
            results.push((
                GuardrailViolation::TokenBudgetExceeded { used: projected, limit: budget },
                false,
            ));
        }
    }

    if let Some(max_retries) = config.max_retries_per_node {
        let used = counters.retries_by_node.get(node_id).copied().unwrap_or(0);
        if used >= max_retries {
            results.push((
                GuardrailViolation::RetryBudgetExceeded {
                    node_id: node_id.to_string(),
                    used,
                    limit: max_retries,
                },
                true,
            ));
        }
    }

    if let Some(max_total_retries) = config.max_total_retries {
        if counters.total_retries >= max_total_retries {
            results.push((
                GuardrailViolation::RunRetryBudgetExceeded {
                    used: counters.total_retries,
                    limit: max_total_retries,
                },
                true,
            ));
        }
    }

    if config.loop_detection_window > 0 && counters.detect_loop(config.loop_detection_window) {
        results.push((
            GuardrailViolation::LoopDetected {
                node_id: node_id.to_string(),
            },
            config.block_on_loop_detection,
        ));
    }

    GuardrailVerdict::aggregate(results)
}

/// Evaluates advisory-only rules after a node decision has already been
/// acted on (spec §4.3 post-check table): latency ceilings (critical) and
/// warn thresholds (minor), post-hoc token overruns, and a node sitting
/// one retry below its cap. A `Block` verdict is never produced here —
/// the effect already happened and cannot be undone.
pub fn check_after_decision(config: &GuardrailConfig, counters: &RunCounters, node_id: &str) -> GuardrailVerdict {
    let mut warnings = Vec::new();

    if let Some(max_latency) = config.max_run_latency {
        let elapsed = counters.elapsed();
        if elapsed >= max_latency {
            warnings.push(GuardrailViolation::LatencyCeilingExceeded {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: max_latency.as_millis() as u64,
                severity: Severity::Critical,
            });
        } else if let Some(warn_latency) = config.warn_run_latency {
            if elapsed >= warn_latency {
                warnings.push(GuardrailViolation::LatencyCeilingExceeded {
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: warn_latency.as_millis() as u64,
                    severity: Severity::Minor,
                });
            }
        }
    }

    if let Some(budget) = config.max_total_tokens {
        if counters.total_tokens_used > budget {
            warnings.push(GuardrailViolation::TokenBudgetExceeded {
                used: counters.total_tokens_used,
                limit: budget,
            });
        }
    }

    if let Some(max_retries) = config.max_retries_per_node {
        let used = counters.retries_by_node.get(node_id).copied().unwrap_or(0);
        if max_retries > 0 && used + 1 == max_retries {
            warnings.push(GuardrailViolation::RetryBudgetExceeded {
                node_id: node_id.to_string(),
                used,
                limit: max_retries,
            });
        }
    }

    if warnings.is_empty() {
        GuardrailVerdict::Allow
    } else {
        GuardrailVerdict::Warn(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: Some("1".into()),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn forbidden_tool_blocks() {
        let mut config = GuardrailConfig::default();
        config.forbidden_tools.insert("rm_rf".to_string());
        let counters = RunCounters::new();
        let verdict = check_before_decision(&config, &counters, "n1", &[call("rm_rf")], 0);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn token_budget_blocks_once_projected_over() {
        let config = GuardrailConfig {
            max_total_tokens: Some(100),
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.add_tokens(90);
        let verdict = check_before_decision(&config, &counters, "n1", &[], 20);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn token_budget_threshold_warns_before_blocking() {
        let config = GuardrailConfig {
            max_total_tokens: Some(100),
            warn_threshold_percent: 0.5,
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.add_tokens(60);
        let verdict = check_before_decision(&config, &counters, "n1", &[], 0);
        assert!(matches!(verdict, GuardrailVerdict::Warn(_)));
    }

    #[test]
    fn token_per_decision_cap_warns_only() {
        let config = GuardrailConfig {
            max_tokens_per_decision: Some(10),
            ..Default::default()
        };
        let counters = RunCounters::new();
        let verdict = check_before_decision(&config, &counters, "n1", &[], 50);
        assert!(matches!(verdict, GuardrailVerdict::Warn(_)));
        assert!(!verdict.is_blocked());
    }

    #[test]
    fn tool_loop_blocks_after_consecutive_failures() {
        let config = GuardrailConfig {
            max_consecutive_tool_failures: 3,
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.record_tool_result("search", false);
        counters.record_tool_result("search", false);
        counters.record_tool_result("search", false);
        let verdict = check_before_decision(&config, &counters, "n1", &[call("search")], 0);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn tool_success_resets_failure_streak() {
        let mut counters = RunCounters::new();
        counters.record_tool_result("search", false);
        counters.record_tool_result("search", false);
        counters.record_tool_result("search", true);
        assert_eq!(counters.tool_failure_streaks.get("search"), Some(&0));
    }

    #[test]
    fn retry_budget_blocks_once_exhausted() {
        let config = GuardrailConfig {
            max_retries_per_node: Some(2),
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.record_retry("n1");
        counters.record_retry("n1");
        let verdict = check_before_decision(&config, &counters, "n1", &[], 0);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn run_retry_budget_blocks_across_nodes() {
        let config = GuardrailConfig {
            max_total_retries: Some(2),
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.record_retry("n1");
        counters.record_retry("n2");
        let verdict = check_before_decision(&config, &counters, "n3", &[], 0);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn loop_detection_flags_alternating_cycle() {
        let config = GuardrailConfig {
            loop_detection_window: 3,
            block_on_loop_detection: true,
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        for n in ["a", "b", "a", "b", "a", "b"] {
            counters.record_node_visit(n, 3);
        }
        let verdict = check_before_decision(&config, &counters, "a", &[], 0);
        assert!(verdict.is_blocked());
    }

    #[test]
    fn strict_defaults_block_well_before_permissive_defaults() {
        let permissive = GuardrailConfig::permissive();
        let strict = GuardrailConfig::strict();
        let mut counters = RunCounters::new();
        counters.add_tokens(50_000);

        assert_eq!(check_before_decision(&permissive, &counters, "n1", &[], 60_000), GuardrailVerdict::Allow);
        assert!(check_before_decision(&strict, &counters, "n1", &[], 60_000).is_blocked());
    }

    #[test]
    fn no_violations_allows() {
        let config = GuardrailConfig::default();
        let counters = RunCounters::new();
        assert_eq!(
            check_before_decision(&config, &counters, "n1", &[], 0),
            GuardrailVerdict::Allow
        );
    }

    #[test]
    fn post_check_never_blocks() {
        let config = GuardrailConfig {
            max_total_tokens: Some(10),
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.add_tokens(50);
        let verdict = check_after_decision(&config, &counters, "n1");
        assert!(!verdict.is_blocked());
        assert!(matches!(verdict, GuardrailVerdict::Warn(_)));
    }

    #[test]
    fn post_check_warns_when_node_one_retry_below_cap() {
        let config = GuardrailConfig {
            max_retries_per_node: Some(3),
            ..Default::default()
        };
        let mut counters = RunCounters::new();
        counters.record_retry("n1");
        counters.record_retry("n1");
        let verdict = check_after_decision(&config, &counters, "n1");
        assert!(matches!(verdict, GuardrailVerdict::Warn(_)));
    }

    #[test]
    fn post_check_latency_severity_distinguishes_minor_and_critical() {
        let config = GuardrailConfig {
            max_run_latency: Some(Duration::from_secs(0)),
            ..Default::default()
        };
        let counters = RunCounters::new();
        let verdict = check_after_decision(&config, &counters, "n1");
        match verdict {
            GuardrailVerdict::Warn(violations) => {
                assert!(violations.iter().any(|v| matches!(
                    v,
                    GuardrailViolation::LatencyCeilingExceeded { severity: Severity::Critical, .. }
                )));
            }
            other => panic!("expected warn, got {other:?}"),
        }
    }
}
