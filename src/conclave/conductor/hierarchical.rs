//! A manager agent delegates sub-tasks to worker agents via a synthesized
//! `delegate_task` tool.
//!
//! Grounded on the reference toolkit's `OrchestrationMode::Hierarchical`
//! (`layers: Vec<Vec<String>>`) combined with its `delegate_task`-style
//! tool-injection pattern from the multi-participant session's
//! supervisor/worker roles: the manager's tool list is extended at
//! orchestration time, not mutated on the user-registered [`Agent`].

use super::{check_cancel, require_role, run_agent_step_with_hooks, Conductor, SharedTrace};
use crate::conclave::agent::{Agent, AgentBuilder};
use crate::conclave::backend::Backend;
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::{AgentRole, Ensemble};
use crate::conclave::error::{EngineError, TimeoutScope};
use crate::conclave::tool::{FunctionTool, Tool, ToolRegistry};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_DELEGATIONS: usize = 10;

pub struct HierarchicalConductor {
    manager_id: String,
    workers: Vec<String>,
    max_delegations: usize,
    manager_timeout: Option<Duration>,
}

pub struct HierarchicalBuilder {
    manager_id: Option<String>,
    workers: Vec<String>,
    max_delegations: usize,
    manager_timeout: Option<Duration>,
}

impl Default for HierarchicalBuilder {
    fn default() -> Self {
        HierarchicalBuilder {
            manager_id: None,
            workers: Vec::new(),
            max_delegations: DEFAULT_MAX_DELEGATIONS,
            manager_timeout: None,
        }
    }
}

impl HierarchicalBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manager(mut self, manager_id: impl Into<String>) -> Self {
        self.manager_id = Some(manager_id.into());
        self
    }

    /// Worker ids the manager may delegate to. Empty means "every other
    /// agent in the ensemble".
    pub fn workers(mut self, workers: Vec<String>) -> Self {
        self.workers = workers;
        self
    }

    pub fn max_delegations(mut self, max_delegations: usize) -> Self {
        self.max_delegations = max_delegations;
        self
    }

    /// Bounds the manager's own top-level run. Worker delegations (driven
    /// by the `delegate_task` tool's own agent call) are bounded by the
    /// manager agent's per-tool `tool_timeout` instead, since each
    /// delegation is itself a tool call from the manager's perspective.
    pub fn manager_timeout(mut self, manager_timeout: Duration) -> Self {
        self.manager_timeout = Some(manager_timeout);
        self
    }

    pub fn build(self) -> Result<HierarchicalConductor, EngineError> {
        let manager_id = self
            .manager_id
            .ok_or_else(|| EngineError::MissingRequired("manager_id".to_string()))?;
        Ok(HierarchicalConductor {
            manager_id,
            workers: self.workers,
            max_delegations: self.max_delegations,
            manager_timeout: self.manager_timeout,
        })
    }
}

impl HierarchicalConductor {
    pub fn builder() -> HierarchicalBuilder {
        HierarchicalBuilder::new()
    }
}

/// Shared delegation counter for one hierarchical run, enforced by the
/// injected `delegate_task` tool closure.
struct DelegateRuntime {
    delegation_count: AtomicUsize,
    max_delegations: usize,
}

#[async_trait]
impl Conductor for HierarchicalConductor {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        check_cancel(cancel)?;
        let manager_role = require_role(ensemble, &self.manager_id)?;

        let worker_ids: Vec<String> = if self.workers.is_empty() {
            ensemble
                .roles()
                .map(|r| r.id.clone())
                .filter(|id| id != &self.manager_id)
                .collect()
        } else {
            self.workers.clone()
        };
        for id in &worker_ids {
            require_role(ensemble, id)?;
        }

        let directory = worker_ids
            .iter()
            .filter_map(|id| ensemble.role(id))
            .map(|r| {
                format!(
                    "- {} ({}){}",
                    r.id,
                    r.role.as_deref().unwrap_or("worker"),
                    if r.tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", r.tags.join(", "))
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let runtime = Arc::new(DelegateRuntime {
            delegation_count: AtomicUsize::new(0),
            max_delegations: self.max_delegations,
        });

        // Clone the worker roles (an `Arc<Agent>` clone each) so the
        // `delegate_task` closure below owns everything it needs and never
        // has to borrow back into `ensemble` across an await point.
        let worker_roles: HashMap<String, AgentRole> = worker_ids
            .iter()
            .filter_map(|id| ensemble.role(id).map(|r| (id.clone(), r.clone())))
            .collect();

        // Start from the manager's own registered tools — the synthesized
        // delegate_task tool is appended, not substituted.
        let mut tools = manager_role.agent.tools().clone();
        let worker_ids_for_tool = worker_ids.clone();
        let worker_roles_for_tool = Arc::new(worker_roles);
        let hooks_for_tool = ensemble.hooks();
        let context_for_tool = context.clone();
        let trace_for_tool = trace.clone();
        let cancel_for_tool = cancel.clone();
        let runtime_for_tool = runtime.clone();

        tools
            .register(Arc::new(FunctionTool::new(
                "delegate_task",
                format!(
                    "Delegate a task to a worker agent. Available workers:\n{directory}"
                ),
                json!({
                    "type": "object",
                    "properties": {
                        "worker_id": {"type": "string", "enum": worker_ids_for_tool},
                        "task": {"type": "string"}
                    },
                    "required": ["worker_id", "task"],
                    "additionalProperties": false
                }),
                move |args: serde_json::Value| {
                    let worker_ids_for_tool = worker_ids_for_tool.clone();
                    let worker_roles_for_tool = worker_roles_for_tool.clone();
                    let hooks_for_tool = hooks_for_tool.clone();
                    let context_for_tool = context_for_tool.clone();
                    let trace_for_tool = trace_for_tool.clone();
                    let cancel_for_tool = cancel_for_tool.clone();
                    let runtime_for_tool = runtime_for_tool.clone();
                    async move {
                        let count = runtime_for_tool.delegation_count.fetch_add(1, Ordering::SeqCst) + 1;
                        if count > runtime_for_tool.max_delegations {
                            return Err(EngineError::MaxDelegations(runtime_for_tool.max_delegations));
                        }

                        let worker_id = args["worker_id"].as_str().unwrap_or_default().to_string();
                        let task = args["task"].as_str().unwrap_or_default().to_string();

                        if !worker_ids_for_tool.contains(&worker_id) {
                            return Ok(json!({
                                "success": false,
                                "error": format!("unknown worker '{worker_id}'")
                            }));
                        }

                        let worker_role = worker_roles_for_tool
                            .get(&worker_id)
                            .ok_or_else(|| EngineError::NotFound(format!("agent '{worker_id}'")))?;

                        let result = run_agent_step_with_hooks(
                            worker_role,
                            hooks_for_tool.clone(),
                            &task,
                            &context_for_tool,
                            &trace_for_tool,
                            &cancel_for_tool,
                            None,
                        )
                        .await;

                        match result {
                            Ok(agent_result) => Ok(json!({
                                "success": true,
                                "worker": worker_id,
                                "response": agent_result.response
                            })),
                            Err(e) => Ok(json!({
                                "success": false,
                                "error": e.sanitized_message()
                            })),
                        }
                    }
                },
            )))
            .expect("delegate_task name is unique per run");

        let enhanced_manager = rebuild_with_tools(&manager_role.agent, tools)?;

        let prompt = format!(
            "You are coordinating a team of workers to accomplish the following request.\n\nWorkers available:\n{directory}\n\nRequest: {input}\n\nUse the delegate_task tool to assign work to the appropriate worker(s), then summarize the combined result."
        );

        let index = {
            let mut t = trace.lock().await;
            t.start_step(self.manager_id.clone(), prompt.clone())
        };

        let manager_result = match self.manager_timeout {
            Some(duration) => match tokio::time::timeout(duration, enhanced_manager.run(&prompt, cancel)).await {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::Timeout {
                    scope: TimeoutScope::Agent,
                    millis: duration.as_millis() as u64,
                }),
            },
            None => enhanced_manager.run(&prompt, cancel).await,
        };

        match manager_result {
            Ok(agent_result) => {
                let mut t = trace.lock().await;
                t.complete_step(index, agent_result.response.clone());
                if let Ok(usage_value) = serde_json::to_value(agent_result.usage) {
                    t.annotate_step(index, "usage", usage_value);
                }
                Ok(agent_result.response)
            }
            Err(e) => {
                let mut t = trace.lock().await;
                t.fail_step(index, &e);
                Err(e)
            }
        }
    }
}

/// Re-build a manager agent with its existing configuration and backend,
/// but with `tools` as its tool registry — never mutating the
/// user-registered [`Agent`] the ensemble owns.
fn rebuild_with_tools(manager: &Arc<Agent>, tools: ToolRegistry) -> Result<Agent, EngineError> {
    let cfg = manager.config.clone();
    let backend: Arc<dyn Backend> = manager_backend(manager);
    let mut builder: AgentBuilder = Agent::builder()
        .name(cfg.name)
        .system_prompt(cfg.system_prompt)
        .backend(backend)
        .max_iterations(cfg.max_iterations)
        .max_input_length(cfg.max_input_length)
        .tool_timeout(cfg.tool_timeout)
        .tools(tools);
    if let Some(description) = cfg.description {
        builder = builder.description(description);
    }
    if let Some(model) = cfg.model {
        builder = builder.model(model);
    }
    if let Some(temperature) = cfg.temperature {
        builder = builder.temperature(temperature);
    }
    if let Some(max_tokens) = cfg.max_tokens {
        builder = builder.max_tokens(max_tokens);
    }
    builder.build()
}

fn manager_backend(manager: &Arc<Agent>) -> Arc<dyn Backend> {
    manager.backend_handle()
}
