//! Agent-to-agent task transfer, modeled as a tool rather than a
//! conductor: any agent with the handoff tool registered can hand its
//! current task to a declared peer.
//!
//! Grounded on the reference toolkit's `delegate_task`-style tool
//! injection (see [`crate::conclave::conductor::hierarchical`]), pulled out
//! into its own protocol because handoff is peer-to-peer — any agent can
//! invoke it, not just a manager — and the target agent is resolved by a
//! pluggable [`HandoffHandler`] rather than a fixed worker directory.

use crate::conclave::agent::Agent;
use crate::conclave::cancel::CancelToken;
use crate::conclave::error::EngineError;
use crate::conclave::tool::{FunctionTool, Tool};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// An agent-originated request to transfer a task to a declared peer.
#[derive(Debug, Clone)]
pub struct HandoffRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    pub task: String,
    pub context: Option<JsonValue>,
    pub history: Option<Vec<crate::conclave::message::Message>>,
    pub priority: Option<i32>,
}

/// The target's response to a [`HandoffRequest`].
#[derive(Debug, Clone)]
pub struct HandoffResponse {
    pub accepted: bool,
    pub rejection_reason: Option<String>,
    pub result: Option<String>,
    pub data: Option<JsonValue>,
}

impl HandoffResponse {
    pub fn accept(result: impl Into<String>) -> Self {
        HandoffResponse {
            accepted: true,
            rejection_reason: None,
            result: Some(result.into()),
            data: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        HandoffResponse {
            accepted: false,
            rejection_reason: Some(reason.into()),
            result: None,
            data: None,
        }
    }
}

/// Resolves a [`HandoffRequest`] into a [`HandoffResponse`]. Implementations
/// that genuinely fail (e.g. the target agent's own run errors) should
/// return `Err` — the handoff tool catches it and serializes a structured
/// `{success:false, error}` result rather than letting it propagate, since a
/// handoff failure is reported back to the requesting model like any other
/// tool outcome.
#[async_trait]
pub trait HandoffHandler: Send + Sync {
    async fn handle(&self, request: HandoffRequest, cancel: &CancelToken) -> Result<HandoffResponse, EngineError>;
}

/// A name-keyed set of agents a [`HandoffHandler`] may dispatch to.
pub type HandoffRegistry = HashMap<String, Arc<Agent>>;

/// Resolves the target by id and runs its agent with the task, or with a
/// `Context: …\n\nTask: …` preamble when `request.context` is present.
pub struct SimpleHandoffHandler {
    registry: HandoffRegistry,
}

impl SimpleHandoffHandler {
    pub fn new(registry: HandoffRegistry) -> Self {
        SimpleHandoffHandler { registry }
    }
}

#[async_trait]
impl HandoffHandler for SimpleHandoffHandler {
    async fn handle(&self, request: HandoffRequest, cancel: &CancelToken) -> Result<HandoffResponse, EngineError> {
        let Some(agent) = self.registry.get(&request.to_agent) else {
            return Ok(HandoffResponse::reject(format!(
                "unknown handoff target '{}'",
                request.to_agent
            )));
        };
        let input = match &request.context {
            Some(ctx) => format!("Context: {ctx}\n\nTask: {}", request.task),
            None => request.task.clone(),
        };
        let result = agent.run(&input, cancel).await?;
        Ok(HandoffResponse::accept(result.response))
    }
}

/// Input/output string transforms applied around an
/// [`AdvancedHandoffHandler`]'s delegation.
pub type HandoffTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Short-circuits acceptance: `Ok(())` proceeds, `Err(reason)` rejects
/// before the target agent ever runs.
pub type HandoffValidator = Arc<dyn Fn(&HandoffRequest) -> Result<(), String> + Send + Sync>;

/// Lifecycle callbacks around a successful delegation.
#[async_trait]
pub trait HandoffLifecycle: Send + Sync {
    async fn on_handoff(&self, _request: &HandoffRequest) {}
    async fn on_complete(&self, _request: &HandoffRequest, _response: &HandoffResponse) {}
}

struct NoopLifecycle;

#[async_trait]
impl HandoffLifecycle for NoopLifecycle {}

/// [`SimpleHandoffHandler`] plus optional validation, input/output
/// transforms, and `onHandoff`/`onComplete` lifecycle callbacks.
pub struct AdvancedHandoffHandler {
    registry: HandoffRegistry,
    validator: Option<HandoffValidator>,
    input_transform: Option<HandoffTransform>,
    output_transform: Option<HandoffTransform>,
    lifecycle: Arc<dyn HandoffLifecycle>,
}

pub struct AdvancedHandoffBuilder {
    registry: HandoffRegistry,
    validator: Option<HandoffValidator>,
    input_transform: Option<HandoffTransform>,
    output_transform: Option<HandoffTransform>,
    lifecycle: Option<Arc<dyn HandoffLifecycle>>,
}

impl AdvancedHandoffBuilder {
    pub fn new(registry: HandoffRegistry) -> Self {
        AdvancedHandoffBuilder {
            registry,
            validator: None,
            input_transform: None,
            output_transform: None,
            lifecycle: None,
        }
    }

    pub fn validator(mut self, validator: HandoffValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn input_transform(mut self, transform: HandoffTransform) -> Self {
        self.input_transform = Some(transform);
        self
    }

    pub fn output_transform(mut self, transform: HandoffTransform) -> Self {
        self.output_transform = Some(transform);
        self
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn HandoffLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn build(self) -> AdvancedHandoffHandler {
        AdvancedHandoffHandler {
            registry: self.registry,
            validator: self.validator,
            input_transform: self.input_transform,
            output_transform: self.output_transform,
            lifecycle: self.lifecycle.unwrap_or_else(|| Arc::new(NoopLifecycle)),
        }
    }
}

impl AdvancedHandoffHandler {
    pub fn builder(registry: HandoffRegistry) -> AdvancedHandoffBuilder {
        AdvancedHandoffBuilder::new(registry)
    }
}

#[async_trait]
impl HandoffHandler for AdvancedHandoffHandler {
    async fn handle(&self, request: HandoffRequest, cancel: &CancelToken) -> Result<HandoffResponse, EngineError> {
        if let Some(validator) = &self.validator {
            if let Err(reason) = validator(&request) {
                return Ok(HandoffResponse::reject(reason));
            }
        }

        let Some(agent) = self.registry.get(&request.to_agent) else {
            return Ok(HandoffResponse::reject(format!(
                "unknown handoff target '{}'",
                request.to_agent
            )));
        };

        let raw_input = match &request.context {
            Some(ctx) => format!("Context: {ctx}\n\nTask: {}", request.task),
            None => request.task.clone(),
        };
        let input = match &self.input_transform {
            Some(transform) => transform(&raw_input),
            None => raw_input,
        };

        self.lifecycle.on_handoff(&request).await;

        let result = agent.run(&input, cancel).await?;
        let response_text = match &self.output_transform {
            Some(transform) => transform(&result.response),
            None => result.response,
        };

        let response = HandoffResponse::accept(response_text);
        self.lifecycle.on_complete(&request, &response).await;
        Ok(response)
    }
}

/// Build the `handoff` tool for `from_agent`, restricted to `targets` and
/// resolved through `handler`. Invalid targets and handler rejections never
/// propagate as [`EngineError`] — they are reported back to the model as
/// structured tool content, per the handoff protocol.
pub fn handoff_tool(
    from_agent: impl Into<String>,
    targets: Vec<String>,
    handler: Arc<dyn HandoffHandler>,
    cancel: CancelToken,
) -> Arc<dyn Tool> {
    let from_agent = from_agent.into();
    let parameters = json!({
        "type": "object",
        "properties": {
            "target_agent": {"type": "string", "enum": targets},
            "task": {"type": "string"},
            "reason": {"type": "string"},
            "context": {"type": "object"},
            "priority": {"type": "integer"}
        },
        "required": ["target_agent", "task", "reason"],
        "additionalProperties": false
    });

    Arc::new(FunctionTool::new(
        "handoff",
        "Hand off the current task to another agent.",
        parameters,
        move |args: JsonValue| {
            let from_agent = from_agent.clone();
            let targets = targets.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            async move {
                let to_agent = args["target_agent"].as_str().unwrap_or_default().to_string();
                if !targets.contains(&to_agent) {
                    return Ok(json!({
                        "success": false,
                        "rejected": true,
                        "reason": format!("Invalid target '{to_agent}'")
                    }));
                }

                let request = HandoffRequest {
                    from_agent,
                    to_agent: to_agent.clone(),
                    reason: args["reason"].as_str().unwrap_or_default().to_string(),
                    task: args["task"].as_str().unwrap_or_default().to_string(),
                    context: args.get("context").cloned(),
                    history: None,
                    priority: args.get("priority").and_then(|p| p.as_i64()).map(|p| p as i32),
                };

                match handler.handle(request, &cancel).await {
                    Ok(response) if response.accepted => Ok(json!({
                        "success": true,
                        "agent": to_agent,
                        "result": response.result,
                        "data": response.data
                    })),
                    Ok(response) => Ok(json!({
                        "success": false,
                        "rejected": true,
                        "reason": response.rejection_reason
                    })),
                    Err(e) => Ok(json!({
                        "success": false,
                        "error": e.sanitized_message()
                    })),
                }
            }
        },
    ))
}

/// One link in a [`HandoffChain`]: an agent and the policy that decides
/// whether its response should jump the chain to another link.
pub struct HandoffChainStep {
    pub id: String,
    pub agent: Arc<Agent>,
    pub should_handoff: Option<Arc<dyn Fn(&str) -> Option<String> + Send + Sync>>,
}

impl HandoffChainStep {
    pub fn new(id: impl Into<String>, agent: Arc<Agent>) -> Self {
        HandoffChainStep {
            id: id.into(),
            agent,
            should_handoff: None,
        }
    }

    pub fn with_should_handoff(mut self, f: Arc<dyn Fn(&str) -> Option<String> + Send + Sync>) -> Self {
        self.should_handoff = Some(f);
        self
    }
}

/// The outcome of running a [`HandoffChain`]: every agent id visited, in
/// order, plus the final agent's response.
#[derive(Debug, Clone)]
pub struct HandoffChainResult {
    pub visited: Vec<String>,
    pub response: String,
}

/// Iterates a list of `{id, agent, should_handoff?}` links: runs the
/// current link, asks its `should_handoff` for a next link id, and jumps
/// there if valid; otherwise the chain terminates. A misconfigured
/// `should_handoff` that always returns a valid next id would loop forever,
/// so jumps are capped at `max_jumps` (default: chain length × 2).
pub struct HandoffChain {
    steps: Vec<HandoffChainStep>,
    max_jumps: usize,
}

impl HandoffChain {
    pub fn new(steps: Vec<HandoffChainStep>) -> Result<Self, EngineError> {
        if steps.is_empty() {
            return Err(EngineError::MissingRequired("at least one chain step".to_string()));
        }
        let max_jumps = steps.len() * 2;
        Ok(HandoffChain { steps, max_jumps })
    }

    pub fn with_max_jumps(mut self, max_jumps: usize) -> Self {
        self.max_jumps = max_jumps;
        self
    }

    pub async fn run(&self, initial_input: &str, cancel: &CancelToken) -> Result<HandoffChainResult, EngineError> {
        let mut current_index = 0usize;
        let mut current_input = initial_input.to_string();
        let mut visited = Vec::new();
        let mut jumps = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let step = &self.steps[current_index];
            visited.push(step.id.clone());
            let result = step.agent.run(&current_input, cancel).await?;
            let response = result.response;

            let Some(should_handoff) = &step.should_handoff else {
                return Ok(HandoffChainResult { visited, response });
            };
            let Some(next_id) = should_handoff(&response) else {
                return Ok(HandoffChainResult { visited, response });
            };

            jumps += 1;
            if jumps > self.max_jumps {
                return Err(EngineError::MaxDelegations(self.max_jumps));
            }

            match self.steps.iter().position(|s| s.id == next_id) {
                Some(idx) => {
                    current_index = idx;
                    current_input = response;
                }
                None => return Ok(HandoffChainResult { visited, response }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conclave::backend::{Backend, FinishReason, GenerateRequest, GenerateResponse};
    use crate::conclave::message::{Message, TokenUsage};

    struct FixedBackend {
        reply: String,
    }

    #[async_trait]
    impl Backend for FixedBackend {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
            Ok(GenerateResponse {
                message: Message::assistant(self.reply.clone()),
                usage: Some(TokenUsage::new(1, 1)),
                finish_reason: FinishReason::Stop,
            })
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn agent(reply: &str) -> Arc<Agent> {
        Arc::new(
            Agent::builder()
                .name("target")
                .system_prompt("s")
                .backend(Arc::new(FixedBackend {
                    reply: reply.to_string(),
                }))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn handoff_tool_rejects_target_not_in_declared_set() {
        let mut registry = HandoffRegistry::new();
        registry.insert("b".to_string(), agent("hi from b"));
        let handler = Arc::new(SimpleHandoffHandler::new(registry));
        let tool = handoff_tool("a", vec!["b".to_string()], handler, CancelToken::never());

        let result = tool
            .execute(json!({"target_agent": "c", "task": "do it", "reason": "testing"}))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(false));
        assert_eq!(result["rejected"], json!(true));
    }

    #[tokio::test]
    async fn handoff_tool_accepts_a_declared_target() {
        let mut registry = HandoffRegistry::new();
        registry.insert("b".to_string(), agent("hi from b"));
        let handler = Arc::new(SimpleHandoffHandler::new(registry));
        let tool = handoff_tool("a", vec!["b".to_string()], handler, CancelToken::never());

        let result = tool
            .execute(json!({"target_agent": "b", "task": "do it", "reason": "testing"}))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["result"], json!("hi from b"));
    }

    #[tokio::test]
    async fn chain_terminates_when_should_handoff_returns_none() {
        let steps = vec![HandoffChainStep::new("a", agent("done"))];
        let chain = HandoffChain::new(steps).unwrap();
        let result = chain.run("start", &CancelToken::never()).await.unwrap();
        assert_eq!(result.visited, vec!["a".to_string()]);
        assert_eq!(result.response, "done");
    }

    #[tokio::test]
    async fn chain_jumps_between_steps() {
        let steps = vec![
            HandoffChainStep::new("a", agent("go to b")).with_should_handoff(Arc::new(|_resp| Some("b".to_string()))),
            HandoffChainStep::new("b", agent("final")),
        ];
        let chain = HandoffChain::new(steps).unwrap();
        let result = chain.run("start", &CancelToken::never()).await.unwrap();
        assert_eq!(result.visited, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.response, "final");
    }

    #[tokio::test]
    async fn chain_caps_runaway_jumps() {
        let steps = vec![
            HandoffChainStep::new("a", agent("loop")).with_should_handoff(Arc::new(|_resp| Some("b".to_string()))),
            HandoffChainStep::new("b", agent("loop")).with_should_handoff(Arc::new(|_resp| Some("a".to_string()))),
        ];
        let chain = HandoffChain::new(steps).unwrap();
        let err = chain.run("start", &CancelToken::never()).await.unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::MaxDelegations);
    }
}
