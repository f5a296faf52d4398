//! The abstract LLM backend contract consumed by the agent loop.
//!
//! Grounded on the reference toolkit's `ClientWrapper` trait: one request,
//! one response, no state retained between calls. Concrete vendor adapters
//! (OpenAI, Claude, Gemini, ...) are out of scope for this engine — callers
//! bring their own [`Backend`] implementation.

use crate::conclave::error::EngineError;
use crate::conclave::message::{Message, TokenUsage};
use crate::conclave::tool::Tool;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A backend-consumable view of a registered tool: name, description, and
/// JSON Schema parameters, without the executable body.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        ToolDefinition {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters().clone(),
        }
    }
}

/// The closed set of reasons a generate call terminated. Vendor-specific
/// stop reasons are translated into this set by the backend adapter, never
/// by the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

/// One generate request: the full message history, the tools available to
/// the model, and generation parameters. No ordering guarantee is made
/// across concurrent requests to the same backend.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
}

/// The backend's reply: exactly one assistant message (content and/or tool
/// calls), optional usage, and a finish classification.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub message: Message,
    pub usage: Option<TokenUsage>,
    pub finish_reason: FinishReason,
}

pub type ContentDeltaStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// The contract every LLM backend implements. All state (connections,
/// credentials, rate limiting) lives inside the implementation; the request/
/// response pair carries everything the agent loop needs.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, EngineError>;

    /// Incremental content-delta streaming. Part of the backend contract
    /// surface for external adapters; the agent loop never calls it
    /// (streaming responses are a non-goal of the engine itself).
    fn stream(&self, _request: GenerateRequest) -> Option<ContentDeltaStream> {
        None
    }

    fn model_name(&self) -> &str;
}

pub type SharedBackend = Arc<dyn Backend>;
