//! Registry of `function` node implementations (spec §4.1 step 4,
//! `NodeKind::Function`). `llm_tool_use`/`llm_generate`/`router`/
//! `human_input` are fully generic — the executor drives them directly
//! against the `LlmClient`/`ToolRegistry` collaborators — but a
//! `function` node's behavior is arbitrary host logic the graph only
//! names by id, mirroring the teacher's pattern of a host-supplied
//! closure registered under a string key (`tool_source::mcp_adapter`'s
//! name-keyed dispatch, generalized here to graph nodes).
//!
//! Alongside `FunctionRegistry` (plain closures, `NodeKind::Function`
//! only), this module also exposes `NodeRegistry`/`NodeImplementation`
//! (spec §6.1: "`register_function(node_id, callable)` and
//! `register_node(node_id, implementation)`"): a trait-object seam for
//! embedders who need full control over a node's behavior — any kind,
//! not just `function` — rather than the bare closure shape
//! `FunctionImpl` offers. When both are registered for the same node id
//! the executor prefers the `NodeImplementation`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// A function node's implementation: takes the memory keys it declared
/// as `input_keys` and returns the keys it declared as `output_keys`.
/// Synchronous host logic can wrap itself in `block_in_place`; the
/// signature is async so host logic that needs to await I/O (a cache
/// lookup, a metered call) is not forced onto a blocking thread.
pub type FunctionImpl = Arc<
    dyn Fn(
            HashMap<String, Value>,
        ) -> futures::future::BoxFuture<'static, Result<HashMap<String, Value>, String>>
        + Send
        + Sync,
>;

/// Name-keyed table of function-node implementations, built by the
/// embedder before a run starts and handed to the executor alongside the
/// `GraphSpec` that references these names.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionImpl>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_id: impl Into<String>, f: FunctionImpl) {
        self.functions.insert(node_id.into(), f);
    }

    pub fn get(&self, node_id: &str) -> Option<&FunctionImpl> {
        self.functions.get(node_id)
    }

    pub fn has(&self, node_id: &str) -> bool {
        self.functions.contains_key(node_id)
    }
}

/// Outcome of a custom `NodeImplementation` run: the output keys it
/// produced and, for implementations standing in for a `router` node, the
/// explicit successor to route to (mirrors `RouterOutcome`'s
/// `forced_edge_target`, spec §4.1.4).
pub struct NodeRunOutcome {
    pub output: HashMap<String, Value>,
    pub next_node: Option<String>,
}

/// A fully custom node implementation, registered against a node id
/// independent of `NodeKind`. Grounded on the teacher's `Node<S>` trait
/// (`graph/node.rs`: `id`, `run`, `run_with_context`) — the executor calls
/// `run` with the node's scoped-memory inputs the same way it would call
/// a `function` node, but a `NodeImplementation` may also emit `next_node`
/// like a router.
#[async_trait]
pub trait NodeImplementation: Send + Sync {
    async fn run(&self, inputs: HashMap<String, Value>) -> Result<NodeRunOutcome, String>;
}

/// Name-keyed table of `NodeImplementation` trait objects (spec §6.1
/// `register_node`), checked by the executor before it falls back to the
/// kind-based dispatch built into `run_node_once`.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn NodeImplementation>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&mut self, node_id: impl Into<String>, implementation: Arc<dyn NodeImplementation>) {
        self.nodes.insert(node_id.into(), implementation);
    }

    pub fn get(&self, node_id: &str) -> Option<&Arc<dyn NodeImplementation>> {
        self.nodes.get(node_id)
    }

    pub fn has(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }
}
