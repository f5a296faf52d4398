//! The canonical message model shared by every backend, agent, and
//! conductor.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single function/tool call requested by the model inside an assistant
/// message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NativeToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The four message roles. `Tool` messages carry the `call_id` of the
/// assistant tool call they answer; an agent loop invariant (enforced by
/// construction, never by validation after the fact) is that this id always
/// refers to a tool call present in a preceding assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant { tool_calls: Vec<NativeToolCall> },
    Tool { call_id: String },
}

/// One message in a conversation. `content` is `Arc<str>` because the same
/// message is frequently cloned into several per-agent histories inside
/// [`SharedContext`](crate::conclave::context::SharedContext).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Assistant {
                tool_calls: Vec::new(),
            },
            content: content.into(),
        }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<Arc<str>>,
        tool_calls: Vec<NativeToolCall>,
    ) -> Self {
        Message {
            role: Role::Assistant { tool_calls },
            content: content.into(),
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: content.into(),
        }
    }

    /// The tool calls attached to this message, if it is an assistant
    /// message that requested any.
    pub fn tool_calls(&self) -> &[NativeToolCall] {
        match &self.role {
            Role::Assistant { tool_calls } => tool_calls.as_slice(),
            _ => &[],
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.role, Role::Assistant { .. })
    }
}

/// Token accounting for a single backend call or an aggregate across many.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;
    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}
