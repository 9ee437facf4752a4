//! Conversation messages flowing through a node's inner tool-use loop.
//!
//! Tool-call results are always tagged with the `Tool` role and carry the
//! originating `call_id` — resolving the role-tagging ambiguity the source
//! left open (see design notes): implementers must not fall back to a
//! `function` role.

use serde::{Deserialize, Serialize};

/// One message in a node's accumulated inner-loop history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// System prompt, usually the first message.
    System { content: String },
    /// User/goal input.
    User { content: String },
    /// Assistant reply; may have accompanying tool calls recorded
    /// separately in `ReActState`-equivalent state.
    Assistant { content: String },
    /// Result of one tool invocation, linked back to the call that produced it.
    Tool { call_id: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    /// Text content regardless of role, for crude token-estimation / trimming.
    pub fn content(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content }
            | Message::Tool { content, .. } => content,
        }
    }
}

/// A single tool invocation requested by the LLM within one turn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier the provider tags this call with; `None` for providers
    /// that don't (arguments are still dispatched, but no `tool_call_id`
    /// can be echoed back — see `Message::Tool`).
    pub id: Option<String>,
    pub name: String,
    /// Raw JSON argument payload as returned by the model.
    pub arguments: String,
}

/// Outcome of dispatching one `ToolCall` through the registry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: Option<String>,
    pub name: String,
    pub success: bool,
    pub output: String,
}
