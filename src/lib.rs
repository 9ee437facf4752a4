//! # Skein
//!
//! An agent execution runtime: compile a declarative graph of LLM and
//! function nodes, run it to completion (or to a pause point), and keep
//! the run honest along the way.
//!
//! ## Design principles
//!
//! - **Declarative graphs, not code**: a [`GraphSpec`] of [`NodeSpec`]
//!   and [`EdgeSpec`] values is validated once at compile time
//!   ([`CompilationError`]) and then driven by one [`GraphExecutor`].
//! - **Scoped memory, not a god object**: nodes only ever see the input
//!   keys they declared and can only write the output keys they
//!   declared ([`ScopedMemory`]); the full run state lives in
//!   [`SharedMemory`].
//! - **Model output is not trusted**: every node's raw output is passed
//!   through the [`cleaner`] before it reaches memory, so a model that
//!   wraps its answer in an extra key or returns a JSON string instead
//!   of an object doesn't silently break downstream nodes.
//! - **Guardrails sit outside the graph**: the [`guardrail`] engine
//!   evaluates policy (forbidden tools, token and retry budgets, tool
//!   and node loops) around every decision without the graph author
//!   having to wire it in node by node.
//! - **Everything is observable**: the [`events`] bus gives callers a
//!   priority-ordered, filterable stream of what happened during a run
//!   without coupling the executor to any particular sink.
//!
//! ## Main modules
//!
//! - [`graph`]: [`GraphSpec`], [`NodeSpec`], [`EdgeSpec`], [`GraphExecutor`],
//!   [`ExecutorConfig`], [`RunDeps`] — compile and run graphs; [`SessionState`]
//!   and [`ResumeInput`] for pause/resume.
//! - [`cleaner`]: [`clean_output`], [`CleanOutcome`], [`PatternCache`] — repair
//!   malformed node output before it lands in memory.
//! - [`guardrail`]: [`GuardrailConfig`], [`check_before_decision`],
//!   [`check_after_decision`], [`RunCounters`], [`GuardrailVerdict`] — policy
//!   checks around every node decision.
//! - [`events`]: [`EventBus`], [`EventKind`], [`Priority`] — priority-aware
//!   pub/sub over a run's lifecycle.
//! - [`memory`]: [`SharedMemory`], [`ScopedMemory`] — run-scoped key/value state
//!   with per-node read/write permissions.
//! - [`message`]: [`Message`], [`ToolCall`], [`ToolResult`] — the conversation
//!   model shared by every LLM-backed node.
//! - [`llm`]: [`LlmClient`] trait, [`MockLlm`] test double, [`CompletionRequest`].
//! - [`tools`]: [`ToolRegistry`], [`Tool`] trait — the tool-dispatch surface an
//!   `llm_tool_use` node calls into.
//! - [`goal`]: [`Goal`], [`SuccessCriterion`], [`Constraint`] — declarative
//!   run objectives, evaluated by callers against [`events::EventKind::GoalProgress`].
//! - [`journal`]: [`RuntimeJournal`] trait, [`NonFatalJournal`], [`NullJournal`] —
//!   an optional external record of run lifecycle and retried problems.
//! - [`error`]: [`ExecutorError`] — the executor's unified error type.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::collections::{HashMap, HashSet};
//! use std::sync::Arc;
//!
//! use skein::graph::{
//!     EdgeCondition, EdgeSpec, ExecutorConfig, FunctionRegistry, GraphExecutor, GraphSpec, LoopConfig, NodeKind,
//!     NodeRegistry, NodeSpec, RunDeps,
//! };
//! use skein::events::EventBus;
//! use skein::goal::Goal;
//! use skein::journal::NullJournal;
//! use skein::llm::MockLlm;
//! use skein::tools::ToolRegistry;
//! use futures::FutureExt;
//!
//! fn function_node(id: &str) -> NodeSpec {
//!     NodeSpec {
//!         id: id.into(),
//!         display_name: id.into(),
//!         kind: NodeKind::Function,
//!         input_keys: vec![],
//!         output_keys: vec![],
//!         nullable_output_keys: vec![],
//!         tool_names: vec![],
//!         system_prompt: None,
//!         max_retries: 0,
//!         max_node_visits: u32::MAX,
//!         client_facing: false,
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let graph = GraphSpec {
//!     id: "greet".into(),
//!     goal_id: "greet".into(),
//!     nodes: vec![function_node("start"), function_node("end")],
//!     edges: vec![EdgeSpec {
//!         id: "start_to_end".into(),
//!         source: "start".into(),
//!         target: "end".into(),
//!         condition: EdgeCondition::Always,
//!         condition_expr: None,
//!         description: None,
//!         priority: 0,
//!         input_mapping: HashMap::new(),
//!     }],
//!     entry_node: "start".into(),
//!     entry_points: HashMap::new(),
//!     terminal_nodes: HashSet::from(["end".to_string()]),
//!     pause_nodes: HashSet::new(),
//!     max_steps: 10,
//!     loop_config: LoopConfig::default(),
//!     default_model: "default".into(),
//!     max_tokens_per_decision: 1024,
//! };
//! graph.validate().expect("valid graph");
//!
//! let mut functions = FunctionRegistry::new();
//! functions.register(
//!     "start",
//!     Arc::new(|input: HashMap<String, serde_json::Value>| async move { Ok(input) }.boxed()),
//! );
//! functions.register(
//!     "end",
//!     Arc::new(|input: HashMap<String, serde_json::Value>| async move { Ok(input) }.boxed()),
//! );
//!
//! let executor = GraphExecutor::new(ExecutorConfig::default());
//! let deps = RunDeps {
//!     llm: Arc::new(MockLlm::text("")),
//!     repair_llm: None,
//!     tools: ToolRegistry::new(),
//!     functions,
//!     nodes: NodeRegistry::new(),
//!     journal: Arc::new(NullJournal),
//!     events: Arc::new(EventBus::new("demo")),
//! };
//!
//! let goal = Goal {
//!     id: "greet".into(),
//!     name: "greet the caller".into(),
//!     description: "say hello and finish".into(),
//!     success_criteria: vec![],
//!     constraints: vec![],
//!     input_schema: None,
//!     output_schema: None,
//! };
//!
//! let result = executor.run(&graph, &goal, &deps, "run-1".into(), HashMap::new()).await;
//! assert!(result.is_ok());
//! # }
//! ```

pub mod cleaner;
pub mod error;
pub mod events;
pub mod goal;
pub mod graph;
pub mod guardrail;
pub mod journal;
pub mod llm;
pub mod memory;
pub mod message;
pub mod tools;

pub use cleaner::{
    clean_for_target, clean_output, clear_cache, get_stats, validate_deep, validate_output, validate_required,
    CleanOutcome, PatternCache, PatternCacheConfig, PatternCacheStats, RepairRule, ValidationResult,
};
pub use error::ExecutorError;
pub use events::{BusMetrics, Event, EventBus, EventKind, Handler, Priority, SharedEventBus, SubscribeFilter};
pub use goal::{Constraint, ConstraintKind, Goal, SuccessCriterion};
pub use graph::{
    CompilationError, EdgeCondition, EdgeSpec, EvalEnv, ExecutionResult, ExecutionStatus, ExecutorConfig,
    FunctionImpl, FunctionRegistry, GraphExecutor, GraphSpec, LoopConfig, NodeImplementation, NodeKind, NodeRegistry,
    NodeRunOutcome, NodeSpec, ResumeInput, RunDeps, SessionState,
};
pub use guardrail::{check_after_decision, check_before_decision, GuardrailConfig, GuardrailVerdict, GuardrailViolation, RunCounters, Severity};
pub use journal::{JournalError, JournaledProblem, NonFatalJournal, NullJournal, RuntimeJournal};
pub use llm::{CompletionRequest, LlmClient, LlmError, LlmResponse, LlmUsage, MockLlm, ToolChoiceMode, ToolDefinition};
pub use memory::{MemoryError, ScopedMemory, SharedMemory};
pub use message::{Message, ToolCall, ToolResult};
pub use tools::{Tool, ToolError, ToolRegistry, ToolSpec};

/// Initializes tracing from `RUST_LOG` so unit tests across `src/**` can
/// print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
