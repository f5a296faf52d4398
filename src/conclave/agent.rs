//! The bounded tool-use reasoning loop that drives a single agent to a
//! final assistant response.
//!
//! Grounded on the reference toolkit's `Agent::send` tool loop: generate,
//! inspect the finish reason, dispatch any requested tool calls back into
//! the message list, and repeat until the model stops asking for tools or
//! the iteration cap (there: a hardcoded `max_tool_iterations = 5`; here:
//! the configurable `max_iterations`, default 10) is reached. Hook firing
//! around each generate/tool call mirrors the reference `EventHandler`
//! (`onBeforeGenerate`/`onAfterGenerate`/`onBeforeToolCall`/
//! `onAfterToolCall`/`onError`), but expressed as a small trait with
//! default no-op methods rather than an enum-dispatched event stream.

use crate::conclave::backend::{
    Backend, FinishReason, GenerateRequest, GenerateResponse, ToolDefinition,
};
use crate::conclave::cancel::CancelToken;
use crate::conclave::error::{EngineError, TimeoutScope};
use crate::conclave::json_schema::validate;
use crate::conclave::message::{Message, Role, TokenUsage};
use crate::conclave::tool::ToolRegistry;
use async_trait::async_trait;
use log::{debug, trace, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ITERATIONS: u32 = 10;
const DEFAULT_MAX_INPUT_LENGTH: usize = 100_000;
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// Lifecycle hooks fired around generate and tool-call steps. All methods
/// default to no-ops; a panicking or erroring hook is caught and logged
/// rather than allowed to corrupt the run's outcome.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_before_generate(&self, _agent_id: &str, _messages: &[Message]) {}
    async fn on_after_generate(&self, _agent_id: &str, _response: &GenerateResponse) {}
    async fn on_before_tool_call(&self, _agent_id: &str, _tool_name: &str, _arguments: &serde_json::Value) {}
    async fn on_after_tool_call(&self, _agent_id: &str, _tool_name: &str, _result: &Result<serde_json::Value, EngineError>) {}
    async fn on_error(&self, _agent_id: &str, _error: &EngineError) {}
}

struct NoopHooks;

#[async_trait]
impl AgentHooks for NoopHooks {}

/// Construction-time parameters for an [`Agent`].
#[derive(Clone)]
pub struct AgentConfig {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
    pub max_input_length: usize,
    pub tool_timeout: Duration,
}

/// An LLM-powered worker: identity, a bound backend, a tool registry, and
/// the loop parameters in [`AgentConfig`].
pub struct Agent {
    pub config: AgentConfig,
    backend: Arc<dyn Backend>,
    tools: ToolRegistry,
    hooks: Arc<dyn AgentHooks>,
}

/// The outcome of one call to [`Agent::run`].
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub response: String,
    pub messages: Vec<Message>,
    pub iterations: u32,
    pub usage: TokenUsage,
}

/// Builder for [`Agent`]. Mirrors the reference toolkit's chained
/// `with_*` methods, but validates eagerly in a fallible `build()` rather
/// than returning an always-valid struct, since this engine's required
/// fields (`name`, `system_prompt`, `backend`) are real build-time
/// invariants.
pub struct AgentBuilder {
    name: Option<String>,
    description: Option<String>,
    system_prompt: Option<String>,
    backend: Option<Arc<dyn Backend>>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_iterations: u32,
    max_input_length: usize,
    tool_timeout: Duration,
    tools: ToolRegistry,
    hooks: Option<Arc<dyn AgentHooks>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        AgentBuilder {
            name: None,
            description: None,
            system_prompt: None,
            backend: None,
            model: None,
            temperature: None,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            tool_timeout: Duration::from_millis(DEFAULT_TOOL_TIMEOUT_MS),
            tools: ToolRegistry::new(),
            hooks: None,
        }
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn max_input_length(mut self, max_input_length: usize) -> Self {
        self.max_input_length = max_input_length;
        self
    }

    pub fn tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<Agent, EngineError> {
        let name = self
            .name
            .ok_or_else(|| EngineError::MissingRequired("name".to_string()))?;
        let system_prompt = self
            .system_prompt
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::MissingRequired("system_prompt".to_string()))?;
        let backend = self
            .backend
            .ok_or_else(|| EngineError::MissingRequired("backend".to_string()))?;

        Ok(Agent {
            config: AgentConfig {
                name,
                description: self.description,
                system_prompt,
                model: self.model,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                max_iterations: self.max_iterations,
                max_input_length: self.max_input_length,
                tool_timeout: self.tool_timeout,
            },
            backend,
            tools: self.tools,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
        })
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The backend this agent was built with, for conductors (e.g. the
    /// hierarchical conductor) that need to rebuild an equivalent agent
    /// with an extended tool set.
    pub fn backend_handle(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// This agent's registered tools, for conductors that rebuild an
    /// equivalent agent with additional tools appended.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Drive the bounded tool-use loop to completion for a single `input`.
    pub async fn run(&self, input: &str, cancel: &CancelToken) -> Result<AgentResult, EngineError> {
        if input.len() > self.config.max_input_length {
            let err = EngineError::InvalidInput(format!(
                "input length {} exceeds max_input_length {}",
                input.len(),
                self.config.max_input_length
            ));
            self.hooks.on_error(self.name(), &err).await;
            return Err(err);
        }

        let mut messages = vec![
            Message::system(self.config.system_prompt.clone()),
            Message::user(input.to_string()),
        ];
        let mut usage = TokenUsage::default();
        let mut iterations: u32 = 0;
        let tool_defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|t| ToolDefinition::from_tool(t.as_ref()))
            .collect();

        loop {
            if cancel.is_cancelled() {
                let err = EngineError::Cancelled;
                self.hooks.on_error(self.name(), &err).await;
                return Err(err);
            }
            if iterations >= self.config.max_iterations {
                warn!(
                    "agent '{}' reached max_iterations ({}) without a terminal response",
                    self.name(),
                    self.config.max_iterations
                );
                break;
            }
            iterations += 1;
            trace!("agent '{}' iteration {}", self.name(), iterations);

            self.hooks.on_before_generate(self.name(), &messages).await;

            let request = GenerateRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                model: self.config.model.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                stop: Vec::new(),
            };

            let response = match self.backend.generate(request).await {
                Ok(r) => r,
                Err(e) => {
                    self.hooks.on_error(self.name(), &e).await;
                    return Err(e);
                }
            };

            if let Some(delta) = response.usage {
                usage.add(&delta);
            }
            messages.push(response.message.clone());
            self.hooks.on_after_generate(self.name(), &response).await;

            match response.finish_reason {
                FinishReason::ToolCalls => {
                    let calls = response.message.tool_calls().to_vec();
                    for call in calls {
                        let tool_message = self.dispatch_tool_call(&call).await;
                        messages.push(tool_message);
                    }
                    continue;
                }
                FinishReason::Stop | FinishReason::Length | FinishReason::Error => {
                    break;
                }
            }
        }

        let response_text = messages
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .map(|m| m.content.to_string())
            .unwrap_or_default();

        debug!(
            "agent '{}' finished after {} iteration(s), {} total tokens",
            self.name(),
            iterations,
            usage.total_tokens
        );

        Ok(AgentResult {
            response: response_text,
            messages,
            iterations,
            usage,
        })
    }

    async fn dispatch_tool_call(&self, call: &crate::conclave::message::NativeToolCall) -> Message {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("agent '{}' requested unknown tool '{}'", self.name(), call.name);
            return Message::tool(
                call.id.clone(),
                json!({ "error": format!("Tool '{}' not found", call.name) }).to_string(),
            );
        };

        if let Err(reason) = validate(tool.parameters(), &call.arguments) {
            return Message::tool(call.id.clone(), json!({ "error": reason }).to_string());
        }

        self.hooks
            .on_before_tool_call(self.name(), &call.name, &call.arguments)
            .await;

        let result = tokio::time::timeout(
            self.config.tool_timeout,
            tool.execute(call.arguments.clone()),
        )
        .await;

        let outcome: Result<serde_json::Value, EngineError> = match result {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::Timeout {
                scope: TimeoutScope::Tool,
                millis: self.config.tool_timeout.as_millis() as u64,
            }),
        };

        if outcome.is_ok() {
            self.hooks
                .on_after_tool_call(self.name(), &call.name, &outcome)
                .await;
        }

        match outcome {
            Ok(value) => {
                let content = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Message::tool(call.id.clone(), content)
            }
            Err(e) => Message::tool(
                call.id.clone(),
                json!({ "error": e.sanitized_message() }).to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conclave::backend::GenerateResponse;
    use crate::conclave::message::NativeToolCall;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockBackend {
        responses: Mutex<Vec<GenerateResponse>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(EngineError::BackendFailure("no more canned responses".into()));
            }
            Ok(responses.remove(0))
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    fn one_shot(content: &str) -> MockBackend {
        MockBackend {
            responses: Mutex::new(vec![GenerateResponse {
                message: Message::assistant(content.to_string()),
                usage: Some(TokenUsage::new(10, 5)),
                finish_reason: FinishReason::Stop,
            }]),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn one_shot_agent_returns_single_iteration() {
        let backend = Arc::new(one_shot("Hello!"));
        let agent = Agent::builder()
            .name("greeter")
            .system_prompt("You are friendly.")
            .backend(backend)
            .build()
            .unwrap();

        let result = agent.run("hi", &CancelToken::never()).await.unwrap();
        assert_eq!(result.response, "Hello!");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn tool_calling_agent_resolves_across_two_iterations() {
        let backend = MockBackend {
            responses: Mutex::new(vec![
                GenerateResponse {
                    message: Message::assistant_with_tool_calls(
                        "",
                        vec![NativeToolCall {
                            id: "c1".to_string(),
                            name: "get_weather".to_string(),
                            arguments: json!({"location": "SF"}),
                        }],
                    ),
                    usage: Some(TokenUsage::new(20, 5)),
                    finish_reason: FinishReason::ToolCalls,
                },
                GenerateResponse {
                    message: Message::assistant("72F and sunny."),
                    usage: Some(TokenUsage::new(30, 10)),
                    finish_reason: FinishReason::Stop,
                },
            ]),
            calls: AtomicUsize::new(0),
        };

        let mut tools = ToolRegistry::new();
        tools
            .register(Arc::new(crate::conclave::tool::FunctionTool::new(
                "get_weather",
                "gets the weather",
                json!({"type": "object", "properties": {"location": {"type": "string"}}, "required": ["location"]}),
                |_args| async move { Ok(json!({"temp": 72})) },
            )))
            .unwrap();

        let agent = Agent::builder()
            .name("weatherbot")
            .system_prompt("You answer weather questions.")
            .backend(Arc::new(backend))
            .tools(tools)
            .build()
            .unwrap();

        let result = agent.run("weather SF?", &CancelToken::never()).await.unwrap();
        assert_eq!(result.response, "72F and sunny.");
        assert_eq!(result.iterations, 2);
        let tool_msg = result
            .messages
            .iter()
            .find(|m| matches!(&m.role, Role::Tool { call_id } if call_id == "c1"))
            .expect("tool message present");
        assert!(tool_msg.content.contains("72"));
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort_the_loop() {
        let backend = MockBackend {
            responses: Mutex::new(vec![
                GenerateResponse {
                    message: Message::assistant_with_tool_calls(
                        "",
                        vec![NativeToolCall {
                            id: "c1".to_string(),
                            name: "does_not_exist".to_string(),
                            arguments: json!({}),
                        }],
                    ),
                    usage: None,
                    finish_reason: FinishReason::ToolCalls,
                },
                GenerateResponse {
                    message: Message::assistant("handled"),
                    usage: None,
                    finish_reason: FinishReason::Stop,
                },
            ]),
            calls: AtomicUsize::new(0),
        };

        let agent = Agent::builder()
            .name("a")
            .system_prompt("s")
            .backend(Arc::new(backend))
            .build()
            .unwrap();

        let result = agent.run("go", &CancelToken::never()).await.unwrap();
        assert_eq!(result.response, "handled");
    }

    #[tokio::test]
    async fn builder_requires_system_prompt() {
        let backend = Arc::new(one_shot("x"));
        let err = Agent::builder()
            .name("a")
            .backend(backend)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::MissingRequired);
    }

    #[tokio::test]
    async fn input_exceeding_max_length_is_rejected() {
        let backend = Arc::new(one_shot("x"));
        let agent = Agent::builder()
            .name("a")
            .system_prompt("s")
            .backend(backend)
            .max_input_length(4)
            .build()
            .unwrap();
        let err = agent.run("too long", &CancelToken::never()).await.unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::InvalidInput);
    }
}
