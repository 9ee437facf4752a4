//! Tool registry and dispatcher (spec §6.2). Real tool implementations
//! (file/network/shell access) are an external collaborator concern —
//! this module only defines the `Tool` trait a host registers against and
//! the dispatch path `llm_tool_use` nodes and the guardrail engine share.
//!
//! Grounded on the teacher's `tools::Tool` trait (`tools/trait.rs`) and
//! `tools::ToolRegistry` (`tools/registry.rs`): same name/spec/call shape,
//! trimmed of the teacher's built-in tool implementations (bash, file,
//! web, ...) which are out of scope — the registry here is populated
//! entirely by the embedder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::ToolCall;

/// Declares a tool's name, description, and JSON argument schema — the
/// shape handed to the LLM provider when offering tools for a call.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Error raised by a tool's own execution. Distinct from dispatch errors
/// (unknown tool name), which the registry reports separately.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

/// One callable tool. Implementations are supplied by the embedder; this
/// crate only consumes the trait through `ToolRegistry`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> ToolSpec;
    async fn call(&self, args: Value) -> Result<String, ToolError>;
}

/// Registered tools, keyed by name. Shared across concurrent node
/// executions via `Arc`; interior tools are themselves `Send + Sync`, so
/// no additional locking is needed around the map once built.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Which of `names` are not registered, for compile-time/run-time
    /// "missing tools" checks (spec §4.1 step 2).
    pub fn missing(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|n| !self.has_tool(n))
            .cloned()
            .collect()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Specs for the named tools, in the order requested — the shape a
    /// node offers to the LLM provider (spec §4.1 step 5).
    pub fn specs(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n).map(|t| t.spec()))
            .collect()
    }

    /// Dispatches one tool call, turning any execution error into a
    /// failed `ToolResult` rather than propagating it — a single bad tool
    /// call must not abort the node's inner loop (spec §4.1.1).
    ///
    /// Spec §4.1.1 step 2: a malformed argument payload does not abort the
    /// call — it synthesizes an empty argument record and still dispatches.
    pub async fn dispatch(&self, call: &ToolCall) -> crate::message::ToolResult {
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        let Some(tool) = self.tools.get(&call.name) else {
            return crate::message::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: false,
                output: format!("unknown tool: {}", call.name),
            };
        };

        match tool.call(args).await {
            Ok(output) => crate::message::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: true,
                output,
            },
            Err(e) => crate::message::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                success: false,
                output: e.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: "echoes input".into(),
                input_schema: serde_json::json!({}),
            }
        }
        async fn call(&self, args: Value) -> Result<String, ToolError> {
            Ok(args.to_string())
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(EchoTool));
        r
    }

    #[test]
    fn missing_reports_unregistered_names() {
        let r = registry_with_echo();
        let missing = r.missing(&["echo".to_string(), "nope".to_string()]);
        assert_eq!(missing, vec!["nope".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_fails_softly() {
        let r = registry_with_echo();
        let call = ToolCall {
            id: Some("1".into()),
            name: "missing".into(),
            arguments: "{}".into(),
        };
        let result = r.dispatch(&call).await;
        assert!(!result.success);
        assert!(result.output.contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_invalid_json_synthesizes_empty_args_and_still_calls_tool() {
        let r = registry_with_echo();
        let call = ToolCall {
            id: Some("1".into()),
            name: "echo".into(),
            arguments: "not json".into(),
        };
        let result = r.dispatch(&call).await;
        assert!(result.success);
        assert_eq!(result.output, "{}");
    }

    #[tokio::test]
    async fn dispatch_success() {
        let r = registry_with_echo();
        let call = ToolCall {
            id: Some("1".into()),
            name: "echo".into(),
            arguments: "{\"x\":1}".into(),
        };
        let result = r.dispatch(&call).await;
        assert!(result.success);
        assert_eq!(result.output, "{\"x\":1}");
    }
}
