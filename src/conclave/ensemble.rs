//! A named collection of agent roles with a default conductor.
//!
//! Grounded on the reference toolkit's `Orchestration` struct (agents keyed
//! by id, an `agent_order` vector fixing round-robin/debate iteration
//! order) generalized so the coordination policy itself is a pluggable
//! [`Conductor`](crate::conclave::conductor::Conductor) rather than a single
//! built-in mode enum.

use crate::conclave::agent::Agent;
use crate::conclave::cancel::CancelToken;
use crate::conclave::conductor::Conductor;
use crate::conclave::context::SharedContext;
use crate::conclave::error::EngineError;
use crate::conclave::message::TokenUsage;
use crate::conclave::trace::ExecutionTrace;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lifecycle hooks fired by a conductor around each agent step. Forwarded
/// into the trace by [`Ensemble::run`]: a `before` call opens a step, the
/// matching `after`/`error` call closes it.
#[async_trait]
pub trait EnsembleHooks: Send + Sync {
    async fn on_before_agent(&self, _agent_id: &str, _input: &str) {}
    async fn on_after_agent(&self, _agent_id: &str, _output: &str) {}
    async fn on_agent_error(&self, _agent_id: &str, _error: &EngineError) {}
}

struct NoopEnsembleHooks;

#[async_trait]
impl EnsembleHooks for NoopEnsembleHooks {}

/// An agent's binding inside an ensemble: a stable id, the agent itself,
/// and optional descriptive metadata used by the hierarchical conductor's
/// worker directory and by debate/voting labeling.
#[derive(Clone)]
pub struct AgentRole {
    pub id: String,
    pub agent: Arc<Agent>,
    pub role: Option<String>,
    pub priority: Option<i32>,
    pub tags: Vec<String>,
}

impl AgentRole {
    pub fn new(id: impl Into<String>, agent: Arc<Agent>) -> Self {
        AgentRole {
            id: id.into(),
            agent,
            role: None,
            priority: None,
            tags: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// The outcome of one [`Ensemble::run`] call.
#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub response: String,
    pub trace: ExecutionTrace,
    pub usage: TokenUsage,
}

/// The outcome of one [`Ensemble::run_traced`] call: the trace and
/// aggregated usage are always present, even when the conductor itself
/// failed (e.g. cancellation, or an agent error under `fail-fast`) — every
/// step that actually ran stays observable.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub result: Result<String, EngineError>,
    pub trace: ExecutionTrace,
    pub usage: TokenUsage,
}

pub struct Ensemble {
    pub name: String,
    pub(crate) roles: HashMap<String, AgentRole>,
    pub(crate) order: Vec<String>,
    default_conductor: Option<Arc<dyn Conductor>>,
    hooks: Arc<dyn EnsembleHooks>,
}

pub struct EnsembleBuilder {
    name: Option<String>,
    roles: HashMap<String, AgentRole>,
    order: Vec<String>,
    default_conductor: Option<Arc<dyn Conductor>>,
    hooks: Option<Arc<dyn EnsembleHooks>>,
}

impl Default for EnsembleBuilder {
    fn default() -> Self {
        EnsembleBuilder {
            name: None,
            roles: HashMap::new(),
            order: Vec::new(),
            default_conductor: None,
            hooks: None,
        }
    }
}

impl EnsembleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_agent(mut self, role: AgentRole) -> Result<Self, EngineError> {
        if self.roles.contains_key(&role.id) {
            return Err(EngineError::DuplicateId(role.id));
        }
        self.order.push(role.id.clone());
        self.roles.insert(role.id.clone(), role);
        Ok(self)
    }

    pub fn default_conductor(mut self, conductor: Arc<dyn Conductor>) -> Self {
        self.default_conductor = Some(conductor);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn EnsembleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<Ensemble, EngineError> {
        let name = self
            .name
            .ok_or_else(|| EngineError::MissingRequired("name".to_string()))?;
        if self.roles.is_empty() {
            return Err(EngineError::MissingRequired("at least one agent".to_string()));
        }
        Ok(Ensemble {
            name,
            roles: self.roles,
            order: self.order,
            default_conductor: self.default_conductor,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopEnsembleHooks)),
        })
    }
}

impl Ensemble {
    pub fn builder() -> EnsembleBuilder {
        EnsembleBuilder::new()
    }

    pub fn roles(&self) -> impl Iterator<Item = &AgentRole> {
        self.order.iter().filter_map(move |id| self.roles.get(id))
    }

    pub fn role(&self, id: &str) -> Option<&AgentRole> {
        self.roles.get(id)
    }

    pub fn hooks(&self) -> Arc<dyn EnsembleHooks> {
        self.hooks.clone()
    }

    /// Run `input` against `conductor` (or the ensemble's default
    /// conductor when `None`), producing an [`EnsembleResult`] bound to a
    /// fresh [`SharedContext`] and [`ExecutionTrace`].
    ///
    /// Fails if the conductor itself fails (e.g. cancellation, a fail-fast
    /// agent error, a quorum miss). Callers that need the trace of a failed
    /// run — every step that actually completed before the failure — should
    /// use [`Ensemble::run_traced`] instead.
    pub async fn run(
        &self,
        input: &str,
        conductor: Option<&Arc<dyn Conductor>>,
        cancel: &CancelToken,
    ) -> Result<EnsembleResult, EngineError> {
        let outcome = self.run_traced(input, conductor, cancel).await?;
        let response = outcome.result?;
        Ok(EnsembleResult {
            response,
            trace: outcome.trace,
            usage: outcome.usage,
        })
    }

    /// Run `input` the same way as [`Ensemble::run`], but always return the
    /// trace and aggregated usage accumulated up to the point of failure
    /// instead of discarding them. Only a missing conductor fails before any
    /// step runs; every other failure is reported via `outcome.result` with
    /// `outcome.trace` left observable.
    pub async fn run_traced(
        &self,
        input: &str,
        conductor: Option<&Arc<dyn Conductor>>,
        cancel: &CancelToken,
    ) -> Result<EnsembleOutcome, EngineError> {
        let conductor = conductor
            .or(self.default_conductor.as_ref())
            .ok_or_else(|| EngineError::MissingRequired("conductor".to_string()))?;

        let context = SharedContext::new();
        context.set("ensemble:input", json!(input)).await;
        context.set("ensemble:name", json!(self.name)).await;

        let trace = Arc::new(Mutex::new(ExecutionTrace::new()));

        let result = conductor
            .run(self, input, &context, trace.clone(), cancel)
            .await;

        let mut trace = trace.lock().await.clone();
        trace.finish();

        let usage = aggregate_usage_from_trace(&trace);

        Ok(EnsembleOutcome {
            result,
            trace,
            usage,
        })
    }
}

/// Sum the per-step `"usage"` metadata every conductor records when it
/// completes an agent step, giving `ensemble.usage == Σ agentResults.usage`
/// element-wise without threading a separate accumulator through every
/// strategy implementation.
fn aggregate_usage_from_trace(trace: &ExecutionTrace) -> TokenUsage {
    let mut total = TokenUsage::default();
    for step in &trace.steps {
        if let Some(usage_value) = step.metadata.get("usage") {
            if let Ok(usage) = serde_json::from_value::<TokenUsage>(usage_value.clone()) {
                total = total + usage;
            }
        }
    }
    total
}
