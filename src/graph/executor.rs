//! The graph executor (spec §4.1): steps a `GraphSpec` node by node,
//! drives each node kind's LLM/tool-use behavior, applies guardrails and
//! output cleaning around every decision, and emits bus events as it goes.
//!
//! Grounded on the teacher's `StateGraph::invoke`/`ReactRunner`
//! (`graph/state_graph.rs`, `agent/react/runner/runner.rs`): a
//! cooperative `while` loop stepping one node at a time, generalized from
//! the teacher's fixed think/act/observe chain to an arbitrary
//! `NodeSpec`/`EdgeSpec` graph, and from the teacher's single ReAct inner
//! loop (`agent/react/think_node.rs`) to a per-node inner loop bounded by
//! `LoopConfig`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cleaner::{clean_for_target, validate_output, PatternCache, PatternCacheConfig};
use crate::error::ExecutorError;
use crate::events::{EventBus, EventKind};
use crate::goal::Goal;
use crate::guardrail::{check_after_decision, check_before_decision, GuardrailConfig, GuardrailVerdict, RunCounters};
use crate::journal::{JournaledProblem, RuntimeJournal};
use crate::llm::{CompletionRequest, LlmClient, ToolChoiceMode, ToolDefinition};
use crate::memory::SharedMemory;
use crate::message::Message;
use crate::tools::ToolRegistry;

use super::condition::{evaluate as evaluate_condition, EvalEnv};
use super::edge_spec::{EdgeCondition, EdgeSpec};
use super::exec_result::{ExecutionResult, ExecutionStatus};
use super::node_impl::{FunctionRegistry, NodeRegistry};
use super::node_spec::{NodeKind, NodeSpec};
use super::session::{ResumeInput, SessionState};
use super::spec::GraphSpec;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub guardrail: GuardrailConfig,
    pub pattern_cache: PatternCacheConfig,
    /// Whether the §4.1.2 output-cleaning hand-off runs at edge crossings.
    /// Disabling this still applies the cheap, non-repairing step-8 check.
    pub cleaning_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            guardrail: GuardrailConfig::default(),
            pattern_cache: PatternCacheConfig::default(),
            cleaning_enabled: true,
        }
    }
}

/// Everything the executor needs to drive one run, gathered so `run`/
/// `resume` don't take a dozen positional parameters.
pub struct RunDeps {
    pub llm: Arc<dyn LlmClient>,
    /// Cheap model used for output repair; falls back to `llm` when absent.
    pub repair_llm: Option<Arc<dyn LlmClient>>,
    pub tools: ToolRegistry,
    pub functions: FunctionRegistry,
    /// Custom per-node implementations (spec §6.1 `register_node`),
    /// consulted before the kind-based dispatch in `run_node_once` for any
    /// node id present here, regardless of `NodeKind`.
    pub nodes: NodeRegistry,
    pub journal: Arc<dyn RuntimeJournal>,
    pub events: Arc<EventBus>,
}

/// Outcome of one node dispatch, before edge selection.
struct NodeOutcome {
    output: HashMap<String, Value>,
    /// Whether the node's output passed validation/cleaning. Used for
    /// `OnSuccess`/`OnFailure` edge routing (spec §4.1 step 13).
    succeeded: bool,
    /// Set only when the router resolved an `llm_decide` edge directly, or
    /// a registered `NodeImplementation` named an explicit successor.
    forced_edge_target: Option<String>,
    /// New inner-loop messages this node visit appended (spec §6.1
    /// `ExecutionResult.history`); empty for node kinds with no
    /// conversational exchange (`function`, plain `router`).
    messages: Vec<Message>,
}

pub struct GraphExecutor {
    config: ExecutorConfig,
    /// Repair-pattern cache for the output cleaner (spec §4.2), scoped to
    /// this executor instance and reused across every node visit and run
    /// it drives — recreating it per call would defeat the cache's whole
    /// point (spec §8 testable property 5: bounded size, bounded age).
    pattern_cache: PatternCache,
}

impl GraphExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let pattern_cache = PatternCache::new(config.pattern_cache);
        Self { config, pattern_cache }
    }

    /// Runs `graph` from its entry node with `input` seeded into memory.
    /// `goal` is carried into every node's context and offered to
    /// `llm_decide` edges and router nodes (spec §4.1 step 3, §6.1).
    #[instrument(skip(self, graph, goal, deps, input))]
    pub async fn run(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        run_id: String,
        input: HashMap<String, Value>,
    ) -> Result<ExecutionResult, ExecutorError> {
        graph.validate()?;
        self.check_tools_registered(graph, deps)?;

        let memory = SharedMemory::restore(None, Some(input)).await;
        deps.journal.start_run(&run_id, &graph.id).await.ok();
        deps.events
            .publish_for(Some(&run_id), None, EventKind::ExecutionStarted { graph_id: graph.id.clone() })
            .await;

        let result = self
            .drive(graph, goal, deps, &run_id, memory, graph.entry_node.clone(), 0, RunCounters::new())
            .await;

        self.finish(deps, &run_id, &result).await;
        result
    }

    /// Resumes a run paused at a `human_input` node (spec §4.1.7).
    #[instrument(skip(self, graph, goal, deps, resume))]
    pub async fn resume(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        resume: ResumeInput,
    ) -> Result<ExecutionResult, ExecutorError> {
        graph.validate()?;
        self.check_tools_registered(graph, deps)?;

        let ResumeInput { session, provided_values } = resume;
        let entry = graph
            .resolve_resume_entry(session.resume_entry_name())
            .unwrap_or(session.paused_at_node.as_str())
            .to_string();

        let memory = SharedMemory::restore(Some(session.memory.clone()), Some(provided_values)).await;
        deps.events
            .publish_for(
                Some(&session.run_id),
                None,
                EventKind::ExecutionResumed { node_id: session.paused_at_node.clone() },
            )
            .await;

        let result = self
            .drive(graph, goal, deps, &session.run_id, memory, entry, session.step_count, RunCounters::new())
            .await;

        self.finish(deps, &session.run_id, &result).await;
        result
    }

    async fn finish(&self, deps: &RunDeps, run_id: &str, result: &Result<ExecutionResult, ExecutorError>) {
        deps.events.flush_all().await;
        let status = match result {
            Ok(r) => format!("{:?}", r.status),
            Err(e) => format!("error: {e}"),
        };
        deps.journal.end_run(run_id, &status).await.ok();
    }

    fn check_tools_registered(&self, graph: &GraphSpec, deps: &RunDeps) -> Result<(), ExecutorError> {
        let declared: Vec<String> = graph
            .nodes
            .iter()
            .flat_map(|n| n.tool_names.iter().cloned())
            .collect();
        let missing = deps.tools.missing(&declared);
        if !missing.is_empty() {
            return Err(ExecutorError::MissingTools {
                missing,
                registered: deps.tools.registered_names(),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        run_id: &str,
        memory: SharedMemory,
        mut current: String,
        mut step: u32,
        mut counters: RunCounters,
    ) -> Result<ExecutionResult, ExecutorError> {
        let mut node_visits: HashMap<String, u32> = HashMap::new();
        let mut path: Vec<String> = Vec::new();
        let mut history: Vec<Message> = Vec::new();

        loop {
            if step >= graph.max_steps {
                deps.events
                    .publish_for(Some(run_id), None, EventKind::ExecutionFailed { reason: "max_steps exceeded".into() })
                    .await;
                return Ok(ExecutionResult {
                    status: ExecutionStatus::MaxStepsExceeded,
                    memory: memory.snapshot().await,
                    steps_taken: step,
                    final_node: Some(current),
                    path,
                    history,
                    total_tokens: counters.total_tokens_used,
                    total_latency_ms: counters.elapsed().as_millis() as u64,
                });
            }

            // Step 2: resolve the node and record it on the path.
            let node = graph
                .node(&current)
                .ok_or_else(|| ExecutorError::ExecutionFailed(format!("internal: node '{current}' missing after validation")))?;
            path.push(node.id.clone());

            let visits = node_visits.entry(current.clone()).or_insert(0);
            *visits += 1;
            if *visits > node.max_node_visits {
                return Err(ExecutorError::NodeExhausted {
                    node_id: node.id.clone(),
                    attempts: *visits,
                    last_error: "max_node_visits exceeded".into(),
                });
            }
            counters.record_node_visit(&node.id, self.config.guardrail.loop_detection_window);

            let pre_verdict = check_before_decision(&self.config.guardrail, &counters, &node.id, &[], 0);
            if let GuardrailVerdict::Block(violation) = pre_verdict {
                deps.events
                    .publish_for(Some(run_id), None, EventKind::ConstraintViolation { violation: violation.clone() })
                    .await;
                return Ok(ExecutionResult {
                    status: ExecutionStatus::GuardrailBlocked(violation),
                    memory: memory.snapshot().await,
                    steps_taken: step,
                    final_node: Some(node.id.clone()),
                    path,
                    history,
                    total_tokens: counters.total_tokens_used,
                    total_latency_ms: counters.elapsed().as_millis() as u64,
                });
            }

            // Steps 4-9: execute the node (with retries) regardless of kind —
            // a `human_input` node runs as a degenerate generate per §4.1.6
            // before the pause check below ever looks at it.
            let outcome = self
                .run_node_with_retries(graph, goal, deps, node, &memory, &mut counters, run_id)
                .await?;
            history.extend(outcome.messages.clone());

            if let GuardrailVerdict::Warn(warnings) = check_after_decision(&self.config.guardrail, &counters, &node.id) {
                for violation in warnings {
                    deps.events
                        .publish_for(Some(run_id), None, EventKind::ConstraintViolation { violation })
                        .await;
                }
            }

            deps.events
                .publish_for(Some(run_id), None, EventKind::StateChanged { keys: outcome.output.keys().cloned().collect() })
                .await;

            // Step 11: pause handling. `pause_nodes` is a node-set
            // independent of `NodeKind` (spec §3.1 / §4.1 step 11) — any
            // node, not only `human_input`, pauses here once it has run.
            if graph.pause_nodes.contains(&node.id) {
                let session = self.pause_session(run_id, graph, node, &memory, step).await;
                deps.events
                    .publish_for(Some(run_id), None, EventKind::ExecutionPaused { node_id: node.id.clone() })
                    .await;
                return Ok(ExecutionResult {
                    status: ExecutionStatus::Paused(session.clone()),
                    memory: memory.snapshot().await,
                    steps_taken: step,
                    final_node: Some(node.id.clone()),
                    path,
                    history,
                    total_tokens: counters.total_tokens_used,
                    total_latency_ms: counters.elapsed().as_millis() as u64,
                });
            }

            // Step 12: terminal handling. A terminal node ends the run
            // successfully without consulting its outgoing edges at all.
            if graph.terminal_nodes.contains(&node.id) {
                deps.events
                    .publish_for(Some(run_id), None, EventKind::ExecutionCompleted { steps_taken: step + 1 })
                    .await;
                return Ok(ExecutionResult {
                    status: ExecutionStatus::Completed,
                    memory: memory.snapshot().await,
                    steps_taken: step + 1,
                    final_node: Some(node.id.clone()),
                    path,
                    history,
                    total_tokens: counters.total_tokens_used,
                    total_latency_ms: counters.elapsed().as_millis() as u64,
                });
            }

            // Step 13: edge routing. If no edge's condition is satisfied,
            // the run ends successfully — "nothing more to do" (spec §4.1
            // step 13; §8 scenario 2) — regardless of whether this node was
            // declared terminal.
            let next = self
                .select_next_edge(graph, goal, deps, node, &outcome, &memory)
                .await?;

            let Some(edge) = next else {
                deps.events
                    .publish_for(Some(run_id), None, EventKind::ExecutionCompleted { steps_taken: step + 1 })
                    .await;
                return Ok(ExecutionResult {
                    status: ExecutionStatus::Completed,
                    memory: memory.snapshot().await,
                    steps_taken: step + 1,
                    final_node: Some(node.id.clone()),
                    path,
                    history,
                    total_tokens: counters.total_tokens_used,
                    total_latency_ms: counters.elapsed().as_millis() as u64,
                });
            };

            // Output cleaning hand-off (spec §4.1.2): before crossing the
            // chosen edge, check the source's output against the *target*
            // node's declared input contract and repair it if cleaning is
            // enabled. The repaired payload replaces the raw output in
            // memory, under the source's own key names, before the
            // edge's `input_mapping` renames anything across (step 14).
            let mut effective_output = outcome.output.clone();
            if self.config.cleaning_enabled {
                if let Some(target) = graph.node(&edge.target) {
                    if !target.input_keys.is_empty() {
                        let cleaned = clean_for_target(
                            &node.id,
                            target,
                            effective_output.clone(),
                            &self.pattern_cache,
                            deps.repair_llm.as_deref(),
                        )
                        .await;
                        let repaired = cleaned.into_output();
                        for key in &node.output_keys {
                            if let Some(value) = repaired.get(key) {
                                memory.set(key.clone(), value.clone()).await;
                            }
                        }
                        effective_output = repaired;
                    }
                }
            }

            for (source_key, target_key) in &edge.input_mapping {
                if let Some(value) = effective_output.get(source_key) {
                    memory.set(target_key.clone(), value.clone()).await;
                }
            }

            current = edge.target.clone();
            step += 1;
        }
    }

    async fn pause_session(
        &self,
        run_id: &str,
        graph: &GraphSpec,
        node: &NodeSpec,
        memory: &SharedMemory,
        step: u32,
    ) -> SessionState {
        SessionState {
            run_id: run_id.to_string(),
            graph_id: graph.id.clone(),
            paused_at_node: node.id.clone(),
            memory: memory.snapshot().await,
            step_count: step,
            prompt: node.system_prompt.clone(),
            resume_token: format!("{}_resume", node.id),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_node_with_retries(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        node: &NodeSpec,
        memory: &SharedMemory,
        counters: &mut RunCounters,
        run_id: &str,
    ) -> Result<NodeOutcome, ExecutorError> {
        let mut attempts = 0u32;
        loop {
            let result = self.run_node_once(graph, goal, deps, node, memory, counters, run_id).await;
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    attempts += 1;
                    counters.record_retry(&node.id);
                    deps.journal
                        .report_problem(JournaledProblem {
                            run_id: run_id.to_string(),
                            node_id: Some(node.id.clone()),
                            kind: "node_retry".to_string(),
                            detail: e.to_string(),
                            context: Value::Null,
                        })
                        .await
                        .ok();
                    if attempts > node.max_retries {
                        return Err(ExecutorError::NodeExhausted {
                            node_id: node.id.clone(),
                            attempts,
                            last_error: e.to_string(),
                        });
                    }
                    warn!(node_id = %node.id, attempts, error = %e, "retrying node");
                }
            }
        }
    }

    async fn run_node_once(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        node: &NodeSpec,
        memory: &SharedMemory,
        counters: &mut RunCounters,
        run_id: &str,
    ) -> Result<NodeOutcome, ExecutorError> {
        let scoped = memory.scoped(node.input_keys.clone(), node.output_keys.clone());
        let mut inputs = HashMap::new();
        let mut missing_inputs = Vec::new();
        for key in &node.input_keys {
            match scoped.read(key).await {
                Ok(Some(value)) => {
                    inputs.insert(key.clone(), value);
                }
                _ => missing_inputs.push(key.clone()),
            }
        }
        // Step 5: missing declared inputs are journaled as warnings, not
        // blocking errors — the node still runs with whatever it has.
        if !missing_inputs.is_empty() {
            deps.journal
                .report_problem(JournaledProblem {
                    run_id: run_id.to_string(),
                    node_id: Some(node.id.clone()),
                    kind: "missing_input_warning".to_string(),
                    detail: format!("declared input key(s) not found in memory: {}", missing_inputs.join(", ")),
                    context: Value::Null,
                })
                .await
                .ok();
        }

        // Custom per-node implementation (spec §6.1 `register_node`) takes
        // precedence over kind-based dispatch for any node id registered
        // against it, regardless of `NodeKind`.
        if let Some(implementation) = deps.nodes.get(&node.id) {
            let node_outcome = implementation.run(inputs).await.map_err(ExecutorError::ExecutionFailed)?;
            let missing = validate_output(node, &node_outcome.output);
            if !missing.is_empty() {
                return Err(ExecutorError::ExecutionFailed(format!(
                    "node '{}' output missing required key(s): {}",
                    node.id,
                    missing.join(", ")
                )));
            }
            for key in &node.output_keys {
                if let Some(value) = node_outcome.output.get(key) {
                    let _ = scoped.write(key, value.clone()).await;
                }
            }
            return Ok(NodeOutcome {
                output: node_outcome.output,
                succeeded: true,
                forced_edge_target: node_outcome.next_node,
                messages: Vec::new(),
            });
        }

        let (raw_output, messages) = match node.kind {
            NodeKind::Function => (self.run_function_node(deps, node, inputs).await?, Vec::new()),
            NodeKind::LlmGenerate => self.run_llm_generate_node(graph, goal, deps, node, &inputs, counters).await?,
            NodeKind::LlmToolUse => self.run_llm_tool_use_node(graph, goal, deps, node, &inputs, counters).await?,
            NodeKind::Router => {
                return self.run_router_node(graph, goal, deps, node, &inputs, counters).await;
            }
            NodeKind::HumanInput => (HashMap::new(), Vec::new()),
        };

        // Step 8: the node's own declared-output-keys gate. This is a
        // shallow presence/non-null check with no repair attempt — when it
        // fails the node visit itself is treated as failed and retried
        // (spec §4.1 step 8/9). Deep cross-node repair happens separately,
        // at edge-crossing time, against the *target* node's input
        // contract (spec §4.1.2), once an outgoing edge is chosen.
        let missing = validate_output(node, &raw_output);
        if !missing.is_empty() {
            return Err(ExecutorError::ExecutionFailed(format!(
                "node '{}' output missing required key(s): {}",
                node.id,
                missing.join(", ")
            )));
        }

        for key in &node.output_keys {
            if let Some(value) = raw_output.get(key) {
                let _ = scoped.write(key, value.clone()).await;
            }
        }

        Ok(NodeOutcome { output: raw_output, succeeded: true, forced_edge_target: None, messages })
    }

    async fn run_function_node(
        &self,
        deps: &RunDeps,
        node: &NodeSpec,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ExecutorError> {
        let f = deps
            .functions
            .get(&node.id)
            .ok_or_else(|| ExecutorError::UnregisteredFunction(node.id.clone()))?;
        f(inputs).await.map_err(ExecutorError::ExecutionFailed)
    }

    async fn run_llm_generate_node(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        node: &NodeSpec,
        inputs: &HashMap<String, Value>,
        counters: &mut RunCounters,
    ) -> Result<(HashMap<String, Value>, Vec<Message>), ExecutorError> {
        let mut messages = build_generate_messages(goal, node, inputs);

        let verdict = check_before_decision(&self.config.guardrail, counters, &node.id, &[], estimate_tokens(&messages));
        if let GuardrailVerdict::Block(violation) = verdict {
            return Err(ExecutorError::GuardrailBlocked(violation));
        }

        let request = CompletionRequest {
            messages: messages.clone(),
            tools: vec![],
            tool_choice: ToolChoiceMode::None,
            max_tokens: Some(graph.max_tokens_per_decision),
            model: Some(graph.default_model.clone()),
        };
        let response = deps.llm.complete(request).await.map_err(|e| ExecutorError::Llm(e.0))?;
        if let Some(usage) = response.usage {
            counters.add_tokens(usage.total_tokens as u64);
        }
        messages.push(Message::assistant(response.content.clone()));
        Ok((parse_generate_output(node, &response.content), messages))
    }

    async fn run_llm_tool_use_node(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        node: &NodeSpec,
        inputs: &HashMap<String, Value>,
        counters: &mut RunCounters,
    ) -> Result<(HashMap<String, Value>, Vec<Message>), ExecutorError> {
        let loop_config = &graph.loop_config;
        let tool_defs: Vec<ToolDefinition> = deps
            .tools
            .specs(&node.tool_names)
            .into_iter()
            .map(|s| ToolDefinition {
                name: s.name,
                description: s.description,
                input_schema: s.input_schema,
            })
            .collect();

        let mut history = build_generate_messages(goal, node, inputs);
        let mut last_calls: Vec<String> = Vec::new();
        let mut stall_count = 0u32;

        for iteration in 0..loop_config.max_iterations {
            trim_history_to_budget(&mut history, loop_config.max_history_tokens);

            let pre_call_verdict = check_before_decision(
                &self.config.guardrail,
                counters,
                &node.id,
                &[],
                estimate_tokens(&history),
            );
            if let GuardrailVerdict::Block(violation) = pre_call_verdict {
                return Err(ExecutorError::GuardrailBlocked(violation));
            }

            let request = CompletionRequest {
                messages: history.clone(),
                tools: tool_defs.clone(),
                tool_choice: ToolChoiceMode::Auto,
                max_tokens: Some(graph.max_tokens_per_decision),
                model: Some(graph.default_model.clone()),
            };
            let response = deps.llm.complete(request).await.map_err(|e| ExecutorError::Llm(e.0))?;
            if let Some(usage) = response.usage {
                counters.add_tokens(usage.total_tokens as u64);
            }

            if response.tool_calls.is_empty() {
                debug!(node_id = %node.id, iteration, "inner loop ended: no tool calls");
                history.push(Message::assistant(response.content.clone()));
                return Ok((parse_generate_output(node, &response.content), history));
            }

            if response.tool_calls.len() as u32 > loop_config.max_tool_calls_per_turn {
                return Err(ExecutorError::ExecutionFailed(format!(
                    "node '{}' requested {} tool calls, exceeding max_tool_calls_per_turn",
                    node.id,
                    response.tool_calls.len()
                )));
            }

            let verdict = check_before_decision(&self.config.guardrail, counters, &node.id, &response.tool_calls, 0);
            if let GuardrailVerdict::Block(violation) = verdict {
                return Err(ExecutorError::GuardrailBlocked(violation));
            }

            history.push(Message::assistant(response.content.clone()));

            let signature: String = response
                .tool_calls
                .iter()
                .map(|c| format!("{}:{}", c.name, c.arguments))
                .collect::<Vec<_>>()
                .join(",");
            if last_calls.last() == Some(&signature) {
                stall_count += 1;
            } else {
                stall_count = 0;
            }
            last_calls.push(signature);
            if stall_count + 1 >= loop_config.stall_detection_threshold {
                return Err(ExecutorError::ExecutionFailed(format!(
                    "node '{}' stalled: identical tool call repeated {} times",
                    node.id, loop_config.stall_detection_threshold
                )));
            }

            for call in &response.tool_calls {
                counters.record_tool_call(&call.name);
                let result = deps.tools.dispatch(call).await;
                counters.record_tool_result(&call.name, result.success);
                let call_id = result.call_id.clone().unwrap_or_else(|| call.name.clone());
                history.push(Message::tool(call_id, result.output));
            }
        }

        Err(ExecutorError::ExecutionFailed(format!(
            "node '{}' exceeded max_iterations ({}) without concluding",
            node.id, loop_config.max_iterations
        )))
    }

    async fn run_router_node(
        &self,
        graph: &GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        node: &NodeSpec,
        inputs: &HashMap<String, Value>,
        counters: &mut RunCounters,
    ) -> Result<NodeOutcome, ExecutorError> {
        let edges = graph.outgoing_edges(&node.id);
        let decide_edges: Vec<&EdgeSpec> = edges
            .iter()
            .filter(|e| e.condition == EdgeCondition::LlmDecide)
            .copied()
            .collect();

        if decide_edges.is_empty() {
            return Ok(NodeOutcome {
                output: inputs.clone(),
                succeeded: true,
                forced_edge_target: None,
                messages: Vec::new(),
            });
        }

        let options: Vec<String> = decide_edges
            .iter()
            .map(|e| format!("{}: {}", e.target, e.description.clone().unwrap_or_default()))
            .collect();
        let prompt = format!(
            "Goal: {} — {}\nChoose exactly one target node id for the next step. Options:\n{}\nRespond with only the target node id.",
            goal.name, goal.description, options.join("\n")
        );
        let messages = vec![Message::system(node.system_prompt.clone().unwrap_or_default()), Message::user(prompt)];

        let verdict = check_before_decision(&self.config.guardrail, counters, &node.id, &[], estimate_tokens(&messages));
        if let GuardrailVerdict::Block(violation) = verdict {
            return Err(ExecutorError::GuardrailBlocked(violation));
        }

        let request = CompletionRequest {
            messages,
            tools: vec![],
            tool_choice: ToolChoiceMode::None,
            max_tokens: Some(graph.max_tokens_per_decision),
            model: Some(graph.default_model.clone()),
        };
        let response = deps.llm.complete(request).await.map_err(|e| ExecutorError::Llm(e.0))?;
        if let Some(usage) = response.usage {
            counters.add_tokens(usage.total_tokens as u64);
        }
        let chosen = response.content.trim();

        let matched = decide_edges.iter().find(|e| e.target == chosen);
        match matched {
            Some(edge) => Ok(NodeOutcome {
                output: inputs.clone(),
                succeeded: true,
                forced_edge_target: Some(edge.target.clone()),
                messages: vec![Message::assistant(response.content.clone())],
            }),
            None => Err(ExecutorError::UnknownRouterTarget {
                node_id: node.id.clone(),
                target: chosen.to_string(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn select_next_edge<'a>(
        &self,
        graph: &'a GraphSpec,
        goal: &Goal,
        deps: &RunDeps,
        node: &NodeSpec,
        outcome: &NodeOutcome,
        memory: &SharedMemory,
    ) -> Result<Option<&'a EdgeSpec>, ExecutorError> {
        if let Some(target) = &outcome.forced_edge_target {
            return Ok(graph.outgoing_edges(&node.id).into_iter().find(|e| &e.target == target));
        }

        let snapshot = memory.snapshot().await;
        for edge in graph.outgoing_edges(&node.id) {
            let satisfied = match edge.condition {
                EdgeCondition::Always => true,
                EdgeCondition::OnSuccess => outcome.succeeded,
                EdgeCondition::OnFailure => !outcome.succeeded,
                EdgeCondition::Conditional => {
                    let expr = edge.condition_expr.as_deref().unwrap_or("");
                    let env = EvalEnv { output: &outcome.output, memory: &snapshot };
                    evaluate_condition(expr, &env)
                }
                EdgeCondition::LlmDecide => self.evaluate_llm_decide(goal, deps, node, edge, outcome).await,
            };
            if satisfied {
                return Ok(Some(edge));
            }
        }
        Ok(None)
    }

    /// Evaluates an `llm_decide` edge condition (spec §4.1.3): asks the
    /// LLM a structured question covering the goal, the source/target
    /// node names, the source output, and the edge's natural-language
    /// description, and parses a `{proceed, reasoning}` verdict. Any LLM
    /// failure or unparsable response falls back to `on_success`.
    async fn evaluate_llm_decide(&self, goal: &Goal, deps: &RunDeps, node: &NodeSpec, edge: &EdgeSpec, outcome: &NodeOutcome) -> bool {
        let output_json = serde_json::to_string(&outcome.output).unwrap_or_default();
        let prompt = format!(
            "Goal: {} — {}\nSource node: {}\nTarget node: {}\nSource output: {}\nEdge description: {}\n\
             Decide whether execution should proceed from the source node to the target node. \
             Respond with a single JSON object: {{\"proceed\": true|false, \"reasoning\": \"...\"}}.",
            goal.name,
            goal.description,
            node.id,
            edge.target,
            output_json,
            edge.description.as_deref().unwrap_or("")
        );
        let request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            tool_choice: ToolChoiceMode::None,
            max_tokens: Some(256),
            model: None,
        };
        match deps.llm.complete(request).await {
            Ok(response) => match serde_json::from_str::<Value>(&response.content) {
                Ok(Value::Object(map)) => match map.get("proceed").and_then(Value::as_bool) {
                    Some(proceed) => proceed,
                    None => outcome.succeeded,
                },
                _ => outcome.succeeded,
            },
            Err(_) => outcome.succeeded,
        }
    }
}

/// Builds a node's initial message history: goal context first (spec §4.1
/// step 3: every node's context includes the goal), then the node's own
/// system prompt, then its declared inputs as the user turn.
fn build_generate_messages(goal: &Goal, node: &NodeSpec, inputs: &HashMap<String, Value>) -> Vec<Message> {
    let mut messages = Vec::new();
    messages.push(Message::system(format!("Goal: {} — {}", goal.name, goal.description)));
    if let Some(prompt) = &node.system_prompt {
        messages.push(Message::system(prompt.clone()));
    }
    let input_json = serde_json::to_string(inputs).unwrap_or_default();
    messages.push(Message::user(input_json));
    messages
}

/// Parses an LLM's text content into the node's declared output keys.
/// A single declared key takes the raw content verbatim; multiple keys
/// expect a JSON object in the response, degrading gracefully (cleaning
/// repairs the rest, spec §4.2).
fn parse_generate_output(node: &NodeSpec, content: &str) -> HashMap<String, Value> {
    if node.output_keys.len() == 1 {
        let mut out = HashMap::new();
        out.insert(node.output_keys[0].clone(), Value::String(content.to_string()));
        return out;
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

/// Crude token estimate (chars / 4, matching the teacher's general
/// preference for a cheap heuristic over an exact tokenizer dependency
/// at this layer). Used both to trim history and to feed the guardrail
/// engine's token guards an estimate of the upcoming decision's cost
/// (spec §4.3 "Token-per-decision cap" / "Token run budget").
fn estimate_tokens(history: &[Message]) -> u64 {
    history.iter().map(|msg| msg.content().len() as u64 / 4).sum()
}

/// Drops oldest non-system messages until under budget.
fn trim_history_to_budget(history: &mut Vec<Message>, max_tokens: u32) {
    while estimate_tokens(history) > max_tokens as u64 {
        let drop_index = history.iter().position(|m| !matches!(m, Message::System { .. }));
        match drop_index {
            Some(idx) => {
                history.remove(idx);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::graph::{EdgeSpec, GraphSpec, LoopConfig, NodeSpec};
    use crate::journal::NullJournal;
    use crate::llm::{LlmResponse, MockLlm};
    use futures::FutureExt;
    use std::collections::HashSet;

    fn test_goal() -> Goal {
        Goal {
            id: "goal".into(),
            name: "test goal".into(),
            description: "a goal used only by unit tests".into(),
            success_criteria: vec![],
            constraints: vec![],
            input_schema: None,
            output_schema: None,
        }
    }

    fn function_node(id: &str, input_keys: Vec<&str>, output_keys: Vec<&str>) -> NodeSpec {
        NodeSpec {
            id: id.into(),
            display_name: id.into(),
            kind: NodeKind::Function,
            input_keys: input_keys.into_iter().map(String::from).collect(),
            output_keys: output_keys.into_iter().map(String::from).collect(),
            nullable_output_keys: vec![],
            tool_names: vec![],
            system_prompt: None,
            max_retries: 0,
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

    fn deps_with(functions: FunctionRegistry) -> RunDeps {
        RunDeps {
            llm: Arc::new(MockLlm::text("")),
            repair_llm: None,
            tools: ToolRegistry::new(),
            functions,
            nodes: NodeRegistry::new(),
            journal: Arc::new(NullJournal),
            events: Arc::new(EventBus::new("test-run")),
        }
    }

    #[tokio::test]
    async fn two_node_success_runs_to_completion() {
        let mut functions = FunctionRegistry::new();
        functions.register(
            "a",
            Arc::new(|input: HashMap<String, Value>| {
                async move {
                    let mut out = HashMap::new();
                    out.insert("x".to_string(), input.get("x").cloned().unwrap_or(Value::Null));
                    Ok(out)
                }
                .boxed()
            }),
        );
        functions.register(
            "b",
            Arc::new(|input: HashMap<String, Value>| {
                async move { Ok(input) }.boxed()
            }),
        );

        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal".into(),
            nodes: vec![
                function_node("a", vec!["x"], vec!["x"]),
                function_node("b", vec!["x"], vec!["x"]),
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
        let deps = deps_with(functions);
        let mut input = HashMap::new();
        input.insert("x".to_string(), serde_json::json!(1));
        let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), input).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.final_node, Some("b".to_string()));
    }

    #[tokio::test]
    async fn missing_tools_rejected_before_run() {
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal".into(),
            nodes: vec![NodeSpec {
                id: "a".into(),
                display_name: "a".into(),
                kind: NodeKind::LlmToolUse,
                input_keys: vec![],
                output_keys: vec!["y".into()],
                nullable_output_keys: vec![],
                tool_names: vec!["search".into()],
                system_prompt: None,
                max_retries: 0,
                max_node_visits: u32::MAX,
                client_facing: false,
            }],
            edges: vec![],
            entry_node: "a".into(),
            entry_points: HashMap::new(),
            terminal_nodes: ["a".to_string()].into_iter().collect(),
            pause_nodes: HashSet::new(),
            max_steps: 10,
            loop_config: LoopConfig::default(),
            default_model: "default".into(),
            max_tokens_per_decision: 1024,
        };

        let executor = GraphExecutor::new(ExecutorConfig::default());
        let deps = deps_with(FunctionRegistry::new());
        let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await;
        assert!(matches!(result, Err(ExecutorError::MissingTools { .. })));
    }

    #[tokio::test]
    async fn unregistered_function_node_fails() {
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal".into(),
            nodes: vec![function_node("a", vec![], vec![])],
            edges: vec![],
            entry_node: "a".into(),
            entry_points: HashMap::new(),
            terminal_nodes: ["a".to_string()].into_iter().collect(),
            pause_nodes: HashSet::new(),
            max_steps: 10,
            loop_config: LoopConfig::default(),
            default_model: "default".into(),
            max_tokens_per_decision: 1024,
        };

        let executor = GraphExecutor::new(ExecutorConfig::default());
        let deps = deps_with(FunctionRegistry::new());
        let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await;
        assert!(matches!(result, Err(ExecutorError::NodeExhausted { .. })));
    }

    #[tokio::test]
    async fn human_input_node_pauses_run() {
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal".into(),
            nodes: vec![NodeSpec {
                id: "ask".into(),
                display_name: "ask".into(),
                kind: NodeKind::HumanInput,
                input_keys: vec![],
                output_keys: vec![],
                nullable_output_keys: vec![],
                tool_names: vec![],
                system_prompt: Some("confirm?".into()),
                max_retries: 0,
                max_node_visits: u32::MAX,
                client_facing: true,
            }],
            edges: vec![],
            entry_node: "ask".into(),
            entry_points: HashMap::new(),
            terminal_nodes: HashSet::new(),
            pause_nodes: ["ask".to_string()].into_iter().collect(),
            max_steps: 10,
            loop_config: LoopConfig::default(),
            default_model: "default".into(),
            max_tokens_per_decision: 1024,
        };

        let executor = GraphExecutor::new(ExecutorConfig::default());
        let deps = deps_with(FunctionRegistry::new());
        let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await.unwrap();
        assert!(result.is_paused());
    }

    #[tokio::test]
    async fn llm_tool_use_without_tool_calls_completes_node() {
        let mut graph_nodes = vec![NodeSpec {
            id: "think".into(),
            display_name: "think".into(),
            kind: NodeKind::LlmToolUse,
            input_keys: vec![],
            output_keys: vec!["answer".into()],
            nullable_output_keys: vec![],
            tool_names: vec!["noop".into()],
            system_prompt: Some("answer directly".into()),
            max_retries: 0,
            max_node_visits: u32::MAX,
            client_facing: false,
        }];
        graph_nodes[0].tool_names = vec!["noop".into()];

        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal".into(),
            nodes: graph_nodes,
            edges: vec![],
            entry_node: "think".into(),
            entry_points: HashMap::new(),
            terminal_nodes: ["think".to_string()].into_iter().collect(),
            pause_nodes: HashSet::new(),
            max_steps: 10,
            loop_config: LoopConfig::default(),
            default_model: "default".into(),
            max_tokens_per_decision: 1024,
        };

        struct NoopTool;
        #[async_trait::async_trait]
        impl crate::tools::Tool for NoopTool {
            fn name(&self) -> &str {
                "noop"
            }
            fn spec(&self) -> crate::tools::ToolSpec {
                crate::tools::ToolSpec {
                    name: "noop".into(),
                    description: "".into(),
                    input_schema: serde_json::json!({}),
                }
            }
            async fn call(&self, _args: Value) -> Result<String, crate::tools::ToolError> {
                Ok("".into())
            }
        }

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(NoopTool));

        let executor = GraphExecutor::new(ExecutorConfig::default());
        let deps = RunDeps {
            llm: Arc::new(MockLlm::new(LlmResponse {
                content: "final answer".into(),
                tool_calls: vec![],
                usage: None,
            })),
            repair_llm: None,
            tools,
            functions: FunctionRegistry::new(),
            nodes: NodeRegistry::new(),
            journal: Arc::new(NullJournal),
            events: Arc::new(EventBus::new("test-run")),
        };

        let result = executor.run(&graph, &test_goal(), &deps, "run-1".into(), HashMap::new()).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.memory.get("answer"), Some(&serde_json::json!("final answer")));
    }
}
