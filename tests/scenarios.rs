//! End-to-end run scenarios exercised through the public API only
//! (no `crate::` access to internals), covering the executor's
//! testable properties: conditional routing, retry-then-success,
//! pause/resume, the output-cleaning trap, and a guardrail block.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;

use skein::{
    clean_output, CleanOutcome, EdgeCondition, EdgeSpec, ExecutionStatus, ExecutorConfig, FunctionRegistry, Goal,
    GraphExecutor, GraphSpec, GuardrailConfig, LlmResponse, LoopConfig, MockLlm, NodeKind, NodeRegistry, NodeSpec,
    NullJournal, PatternCache, PatternCacheConfig, ResumeInput, RunDeps, ToolRegistry,
};
use skein::events::EventBus;

fn test_goal() -> Goal {
    Goal {
        id: "goal".into(),
        name: "scenario goal".into(),
        description: "a goal used only by integration scenarios".into(),
        success_criteria: vec![],
        constraints: vec![],
        input_schema: None,
        output_schema: None,
    }
}

fn function_node(id: &str, input_keys: &[&str], output_keys: &[&str]) -> NodeSpec {
    NodeSpec {
        id: id.into(),
        display_name: id.into(),
        kind: NodeKind::Function,
        input_keys: input_keys.iter().map(|s| s.to_string()).collect(),
        output_keys: output_keys.iter().map(|s| s.to_string()).collect(),
        nullable_output_keys: vec![],
        tool_names: vec![],
        system_prompt: None,
        max_retries: 0,
        max_node_visits: u32::MAX,
        client_facing: false,
    }
}

fn llm_generate_node(id: &str, output_keys: &[&str], max_retries: u32) -> NodeSpec {
    NodeSpec {
        id: id.into(),
        display_name: id.into(),
        kind: NodeKind::LlmGenerate,
        input_keys: vec![],
        output_keys: output_keys.iter().map(|s| s.to_string()).collect(),
        nullable_output_keys: vec![],
        tool_names: vec![],
        system_prompt: Some("answer".into()),
        max_retries,
        max_node_visits: u32::MAX,
        client_facing: false,
    }
}

fn edge(id: &str, source: &str, target: &str, condition: EdgeCondition) -> EdgeSpec {
    EdgeSpec {
        id: id.into(),
        source: source.into(),
        target: target.into(),
        condition,
        condition_expr: None,
        description: None,
        priority: 0,
        input_mapping: HashMap::new(),
    }
}

fn conditional_edge(id: &str, source: &str, target: &str, expr: &str) -> EdgeSpec {
    EdgeSpec {
        condition_expr: Some(expr.to_string()),
        ..edge(id, source, target, EdgeCondition::Conditional)
    }
}

fn deps_with_functions(functions: FunctionRegistry) -> RunDeps {
    RunDeps {
        llm: Arc::new(MockLlm::text("")),
        repair_llm: None,
        tools: ToolRegistry::new(),
        functions,
        nodes: NodeRegistry::new(),
        journal: Arc::new(NullJournal),
        events: Arc::new(EventBus::new("scenario")),
    }
}

/// Spec §8 scenario 2: `A -> B` when `output['score'] > 0.8`, else `A -> C`
/// on failure. A high score routes to `B`; a middling score with no
/// matching edge ends the run successfully at `A`.
#[tokio::test]
async fn conditional_routing_picks_branch_by_score() {
    let mut functions = FunctionRegistry::new();
    let score = Arc::new(std::sync::Mutex::new(0.9_f64));
    let score_clone = score.clone();
    functions.register(
        "a",
        Arc::new(move |_input: HashMap<String, serde_json::Value>| {
            let score = score_clone.clone();
            async move {
                let mut out = HashMap::new();
                out.insert("score".to_string(), json!(*score.lock().unwrap()));
                Ok(out)
            }
            .boxed()
        }),
    );
    functions.register("b", Arc::new(|input| async move { Ok(input) }.boxed()));

    let graph = GraphSpec {
        id: "routing".into(),
        goal_id: "goal".into(),
        nodes: vec![
            function_node("a", &[], &["score"]),
            function_node("b", &["score"], &["score"]),
        ],
        edges: vec![conditional_edge("e1", "a", "b", "output['score'] > 0.8")],
        entry_node: "a".into(),
        entry_points: HashMap::new(),
        terminal_nodes: ["b".to_string()].into_iter().collect(),
        pause_nodes: HashSet::new(),
        max_steps: 10,
        loop_config: LoopConfig::default(),
        default_model: "default".into(),
        max_tokens_per_decision: 1024,
    };

    let executor = GraphExecutor::new(ExecutorConfig::default());
    let deps = deps_with_functions(functions);
    let result = executor.run(&graph, &test_goal(), &deps, "run-high".into(), HashMap::new()).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.final_node, Some("b".to_string()));

    *score.lock().unwrap() = 0.5;
    let result = executor.run(&graph, &test_goal(), &deps, "run-low".into(), HashMap::new()).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.final_node, Some("a".to_string()));
}

/// Spec §8 scenario 3: a node with `max_retries = 2` that fails twice and
/// succeeds on the third attempt completes the run at `steps_executed = 1`
/// (one step: tool-use iterations / retries do not advance the step
/// counter) while having actually been visited three times.
#[tokio::test]
async fn retry_then_success_does_not_advance_step_counter() {
    let attempt = Arc::new(AtomicU32::new(0));
    let attempt_clone = attempt.clone();

    let mut functions = FunctionRegistry::new();
    functions.register(
        "flaky",
        Arc::new(move |_input| {
            let attempt = attempt_clone.clone();
            async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("transient failure #{n}"))
                } else {
                    let mut out = HashMap::new();
                    out.insert("ok".to_string(), json!(true));
                    Ok(out)
                }
            }
            .boxed()
        }),
    );

    let mut node = function_node("flaky", &[], &["ok"]);
    node.max_retries = 2;

    let graph = GraphSpec {
        id: "retry".into(),
        goal_id: "goal".into(),
        nodes: vec![node],
        edges: vec![],
        entry_node: "flaky".into(),
        entry_points: HashMap::new(),
        terminal_nodes: ["flaky".to_string()].into_iter().collect(),
        pause_nodes: HashSet::new(),
        max_steps: 10,
        loop_config: LoopConfig::default(),
        default_model: "default".into(),
        max_tokens_per_decision: 1024,
    };

    let executor = GraphExecutor::new(ExecutorConfig::default());
    let deps = deps_with_functions(functions);
    let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.steps_taken, 1);
    assert_eq!(attempt.load(Ordering::SeqCst), 3);
}

/// Spec §8 scenario 4 / §4.1.7: a `human_input` node pauses the run; the
/// embedder later resumes with the answer overlaid on memory and the run
/// reaches the terminal node with both the original and the provided
/// memory intact.
#[tokio::test]
async fn pause_then_resume_completes_with_full_memory() {
    let mut functions = FunctionRegistry::new();
    functions.register(
        "finish",
        Arc::new(|input: HashMap<String, serde_json::Value>| async move { Ok(input) }.boxed()),
    );

    let mut entry_points = HashMap::new();
    entry_points.insert("ask_resume".to_string(), "finish".to_string());

    let graph = GraphSpec {
        id: "hitl".into(),
        goal_id: "goal".into(),
        nodes: vec![
            NodeSpec {
                id: "ask".into(),
                display_name: "ask".into(),
                kind: NodeKind::HumanInput,
                input_keys: vec![],
                output_keys: vec![],
                nullable_output_keys: vec![],
                tool_names: vec![],
                system_prompt: Some("confirm the plan?".into()),
                max_retries: 0,
                max_node_visits: u32::MAX,
                client_facing: true,
            },
            function_node("finish", &["topic", "answer"], &["topic", "answer"]),
        ],
        edges: vec![edge("e1", "ask", "finish", EdgeCondition::Always)],
        entry_node: "ask".into(),
        entry_points,
        terminal_nodes: ["finish".to_string()].into_iter().collect(),
        pause_nodes: ["ask".to_string()].into_iter().collect(),
        max_steps: 10,
        loop_config: LoopConfig::default(),
        default_model: "default".into(),
        max_tokens_per_decision: 1024,
    };

    let executor = GraphExecutor::new(ExecutorConfig::default());
    let deps = deps_with_functions(functions);

    let mut input = HashMap::new();
    input.insert("topic".to_string(), json!("weather"));
    let paused = executor.run(&graph, &test_goal(), &deps, "run-1".into(), input).await.unwrap();
    assert!(paused.is_paused());
    let ExecutionStatus::Paused(session) = paused.status else {
        panic!("expected paused status");
    };
    assert_eq!(session.paused_at_node, "ask");
    assert_eq!(session.resume_entry_name(), "ask_resume");
    assert_eq!(session.memory.get("topic"), Some(&json!("weather")));

    let mut provided_values = HashMap::new();
    provided_values.insert("answer".to_string(), json!("sunny"));
    let resumed = executor
        .resume(
            &graph,
            &test_goal(),
            &deps,
            ResumeInput {
                session,
                provided_values,
            },
        )
        .await
        .unwrap();

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.final_node, Some("finish".to_string()));
    assert_eq!(resumed.memory.get("topic"), Some(&json!("weather")));
    assert_eq!(resumed.memory.get("answer"), Some(&json!("sunny")));
}

/// Spec §8 scenario 5: a node declares a single output key, `report`,
/// but its raw output landed under a different, differently-spelled
/// key (`result`). The declared key is missing, so the cache/structural
/// repair chain kicks in before any model call: the sole-key rename
/// rule lifts the value across without needing `repair_llm`.
#[tokio::test]
async fn output_cleaning_renames_sole_mismatched_key_structurally() {
    let node = llm_generate_node("reporter", &["report"], 0);
    let mut raw_output = HashMap::new();
    raw_output.insert("result".to_string(), json!("all systems nominal"));

    let cache = PatternCache::new(PatternCacheConfig::default());
    let outcome = clean_output(&node, raw_output, &cache, None).await;

    match outcome {
        CleanOutcome::RepairedStructurally(repaired) => {
            assert_eq!(repaired.get("report"), Some(&json!("all systems nominal")));
        }
        other => panic!("expected structural repair, got {other:?}"),
    }
}

/// Spec §8 scenario 5, exercised through the real executor (not just a
/// direct `clean_output` call): the source node's own declared output
/// key is satisfied (`report` is present, non-null), so the step-8 gate
/// passes, but its value is a JSON string whose parse contains the same
/// key name — the canonical trap. The §4.1.2 hand-off at the `a -> b`
/// edge crossing checks it against `b`'s input contract, repairs it in
/// place, and `b` receives the unwrapped value.
#[tokio::test]
async fn output_cleaning_hand_off_repairs_nested_same_key_trap_across_an_edge() {
    let mut functions = FunctionRegistry::new();
    functions.register(
        "a",
        Arc::new(|_input: HashMap<String, serde_json::Value>| {
            async move {
                let mut out = HashMap::new();
                out.insert("report".to_string(), json!(r#"{"report":"ok"}"#));
                Ok(out)
            }
            .boxed()
        }),
    );
    functions.register("b", Arc::new(|input| async move { Ok(input) }.boxed()));

    let graph = GraphSpec {
        id: "clean-edge".into(),
        goal_id: "goal".into(),
        nodes: vec![
            function_node("a", &[], &["report"]),
            function_node("b", &["report"], &["report"]),
        ],
        edges: vec![edge("e1", "a", "b", EdgeCondition::Always)],
        entry_node: "a".into(),
        entry_points: HashMap::new(),
        terminal_nodes: ["b".to_string()].into_iter().collect(),
        pause_nodes: HashSet::new(),
        max_steps: 10,
        loop_config: LoopConfig::default(),
        default_model: "default".into(),
        max_tokens_per_decision: 1024,
    };

    let executor = GraphExecutor::new(ExecutorConfig::default());
    let deps = deps_with_functions(functions);
    let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.memory.get("report"), Some(&json!("ok")));
}

/// Spec §8 scenario 6: a run-wide token budget already exceeded by an
/// earlier decision blocks the *next* node before it ever reaches the
/// model. `think1` reports 500 tokens of usage against a 100-token
/// budget; `think2`'s pre-decision guardrail check then blocks and the
/// run ends in `GuardrailBlocked` without a second call to the LLM.
#[tokio::test]
async fn guardrail_blocks_next_decision_once_run_budget_is_spent() {
    let graph = GraphSpec {
        id: "budget".into(),
        goal_id: "goal".into(),
        nodes: vec![
            llm_generate_node("think1", &["a"], 0),
            llm_generate_node("think2", &["b"], 0),
        ],
        edges: vec![edge("e1", "think1", "think2", EdgeCondition::Always)],
        entry_node: "think1".into(),
        entry_points: HashMap::new(),
        terminal_nodes: ["think2".to_string()].into_iter().collect(),
        pause_nodes: HashSet::new(),
        max_steps: 10,
        loop_config: LoopConfig::default(),
        default_model: "default".into(),
        max_tokens_per_decision: 1024,
    };

    let config = ExecutorConfig {
        guardrail: GuardrailConfig {
            max_total_tokens: Some(100),
            ..GuardrailConfig::default()
        },
        ..ExecutorConfig::default()
    };

    let executor = GraphExecutor::new(config);
    let deps = RunDeps {
        llm: Arc::new(MockLlm::new(LlmResponse {
            content: r#"{"a":"done"}"#.to_string(),
            tool_calls: vec![],
            usage: Some(skein::LlmUsage {
                prompt_tokens: 400,
                completion_tokens: 100,
                total_tokens: 500,
            }),
        })),
        repair_llm: None,
        tools: ToolRegistry::new(),
        functions: FunctionRegistry::new(),
        nodes: NodeRegistry::new(),
        journal: Arc::new(NullJournal),
        events: Arc::new(EventBus::new("budget-run")),
    };

    let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await.unwrap();
    match result.status {
        ExecutionStatus::GuardrailBlocked(_) => {}
        other => panic!("expected guardrail block, got {other:?}"),
    }
    assert_eq!(result.final_node, Some("think2".to_string()));
}
