//! LLM provider collaborator (spec §6.1). The runtime never speaks to a
//! provider directly: `llm_tool_use`/`llm_generate` nodes and `llm_decide`
//! edges all go through this trait, and output cleaning invokes it for the
//! cheap repair model. Concrete providers (OpenAI, Anthropic, ...) are
//! out of scope here; only the interface the executor depends on lives
//! in this crate.
//!
//! Grounded on the teacher's `llm::LlmClient` (`llm/mod.rs`): same
//! `invoke`-shaped async trait and `LlmResponse`/`LlmUsage` pair,
//! trimmed of streaming (no chunk sender — out of scope, spec §1) and
//! extended with a `tools`/`tool_choice` parameter since tool-use is a
//! first-class node kind here rather than a single fixed ReAct loop.

use async_trait::async_trait;
use serde_json::Value;

use crate::message::{Message, ToolCall};

/// Tool choice mode for a completion request: when tools are offered,
/// controls whether the model may choose (auto), must not use (none), or
/// must use (required) one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolChoiceMode {
    #[default]
    Auto,
    None,
    Required,
}

/// One tool definition offered to the model for this call.
#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Token usage for one completion call.
#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of one completion call: assistant text, any tool calls the model
/// chose to make, and usage when the provider reports it.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// Parameters for one completion call.
#[derive(Clone, Debug, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoiceMode,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

/// Error surfaced by an `LlmClient` implementation. The executor wraps
/// this into `ExecutorError::Llm` and treats it as a retryable node failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct LlmError(pub String);

/// The provider collaborator: given a request, returns assistant content
/// and any tool calls. Implementations are supplied by the embedder; this
/// crate only consumes the trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse, LlmError>;
}

/// Fixed-response test double. Grounded on the teacher's `MockLlm`
/// (`llm/mod.rs::mock`): a canned response (or queue of responses) handed
/// back regardless of input, used across the executor's own test suite.
pub struct MockLlm {
    responses: tokio::sync::Mutex<std::collections::VecDeque<LlmResponse>>,
}

impl MockLlm {
    pub fn new(response: LlmResponse) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(std::collections::VecDeque::from([response])),
        }
    }

    pub fn sequence(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(responses.into()),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(LlmResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: None,
        })
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<LlmResponse, LlmError> {
        let mut queue = self.responses.lock().await;
        queue
            .pop_front()
            .ok_or_else(|| LlmError("MockLlm: response queue exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_llm_returns_canned_text() {
        let llm = MockLlm::text("hello");
        let resp = llm.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(resp.content, "hello");
    }

    #[tokio::test]
    async fn mock_llm_sequence_exhausts() {
        let llm = MockLlm::sequence(vec![LlmResponse {
            content: "first".into(),
            tool_calls: vec![],
            usage: None,
        }]);
        assert!(llm.complete(CompletionRequest::default()).await.is_ok());
        assert!(llm.complete(CompletionRequest::default()).await.is_err());
    }
}
