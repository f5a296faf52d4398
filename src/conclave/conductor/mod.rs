//! The conductor family: pluggable orchestration strategies sharing a
//! common step-execution, trace-binding, and usage-aggregation substrate.
//!
//! Grounded on the reference toolkit's `OrchestrationMode` enum
//! (`Parallel`/`RoundRobin`/`Moderated`/`Hierarchical`/`Debate`/`Ralph`),
//! generalized from a single mode-dispatching `Orchestration::run` into six
//! independent [`Conductor`] implementations sharing the helpers in this
//! module — mirroring the reference's own `runAgent`/event-firing pattern
//! that every mode branch goes through.

pub mod custom;
pub mod debate;
pub mod hierarchical;
pub mod parallel;
pub mod sequential;
pub mod voting;

use crate::conclave::agent::AgentResult;
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::{AgentRole, Ensemble, EnsembleHooks};
use crate::conclave::error::{EngineError, TimeoutScope};
use crate::conclave::trace::ExecutionTrace;
use async_trait::async_trait;
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub use custom::CustomConductor;
pub use debate::{AgreementPredicate, ConsensusStrategy, DebateConductor, DebateHooks, RoundStatements};
pub use hierarchical::HierarchicalConductor;
pub use parallel::{Merger, ParallelConductor};
pub use sequential::{SequentialConductor, Transform};
pub use voting::{Vote, VoteMethod, VotingConductor, VotingHooks};

/// Common error-mode every conductor respects when one of its agent steps
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    FailFast,
    Continue,
    Retry,
}

impl Default for ErrorMode {
    fn default() -> Self {
        ErrorMode::FailFast
    }
}

pub type SharedTrace = Arc<Mutex<ExecutionTrace>>;

/// An orchestration policy: given the ensemble's roles, drive some subset
/// of them against `input` and return the ensemble's final response text.
#[async_trait]
pub trait Conductor: Send + Sync {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError>;
}

/// Raise [`EngineError::Cancelled`] if `cancel` has tripped. Every conductor
/// calls this before starting a new agent step, per the cancellation
/// liveness invariant.
pub fn check_cancel(cancel: &CancelToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

pub fn require_role<'a>(ensemble: &'a Ensemble, id: &str) -> Result<&'a AgentRole, EngineError> {
    ensemble
        .role(id)
        .ok_or_else(|| EngineError::NotFound(format!("agent '{id}'")))
}

/// Run one agent step: opens a trace step, appends the input to the
/// agent's shared-context message log, invokes the agent, then closes the
/// step with the output or a sanitized error and records the step's token
/// usage so [`Ensemble::run`](crate::conclave::ensemble::Ensemble::run) can
/// aggregate it. Fires the ensemble's before/after/error hooks around the
/// call, exactly the reference toolkit's `runAgent` helper.
pub async fn run_agent_step(
    ensemble: &Ensemble,
    role: &AgentRole,
    input: &str,
    context: &SharedContext,
    trace: &SharedTrace,
    cancel: &CancelToken,
) -> Result<AgentResult, EngineError> {
    run_agent_step_timed(ensemble, role, input, context, trace, cancel, None).await
}

/// Like [`run_agent_step`], but bounds the agent call by `agent_timeout`
/// when given. A timeout fails the step with [`EngineError::Timeout`]
/// (scope [`TimeoutScope::Agent`]) exactly as a backend error would,
/// leaving it subject to the conductor's `errorMode` like any other agent
/// failure.
pub async fn run_agent_step_timed(
    ensemble: &Ensemble,
    role: &AgentRole,
    input: &str,
    context: &SharedContext,
    trace: &SharedTrace,
    cancel: &CancelToken,
    agent_timeout: Option<Duration>,
) -> Result<AgentResult, EngineError> {
    run_agent_step_with_hooks(role, ensemble.hooks(), input, context, trace, cancel, agent_timeout).await
}

/// Core of [`run_agent_step_timed`], parameterized over an explicit hooks
/// handle instead of a full `&Ensemble`. Lets callers that only have an
/// owned [`AgentRole`] on hand (e.g. the hierarchical conductor's
/// `delegate_task` tool closure, which cannot hold a borrow of `Ensemble`
/// across an `async move`) drive a step without reconstructing one.
pub async fn run_agent_step_with_hooks(
    role: &AgentRole,
    hooks: Arc<dyn EnsembleHooks>,
    input: &str,
    context: &SharedContext,
    trace: &SharedTrace,
    cancel: &CancelToken,
    agent_timeout: Option<Duration>,
) -> Result<AgentResult, EngineError> {
    hooks.on_before_agent(&role.id, input).await;

    let index = {
        let mut t = trace.lock().await;
        t.start_step(role.id.clone(), input.to_string())
    };

    context
        .push_agent_message(&role.id, crate::conclave::message::Message::user(input.to_string()))
        .await;

    let result = match agent_timeout {
        Some(duration) => match tokio::time::timeout(duration, role.agent.run(input, cancel)).await {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::Timeout {
                scope: TimeoutScope::Agent,
                millis: duration.as_millis() as u64,
            }),
        },
        None => role.agent.run(input, cancel).await,
    };

    match &result {
        Ok(agent_result) => {
            let mut t = trace.lock().await;
            t.complete_step(index, agent_result.response.clone());
            if let Ok(usage_value) = serde_json::to_value(agent_result.usage) {
                t.annotate_step(index, "usage", usage_value);
            }
            drop(t);
            context
                .push_agent_message(
                    &role.id,
                    crate::conclave::message::Message::assistant(agent_result.response.clone()),
                )
                .await;
            hooks.on_after_agent(&role.id, &agent_result.response).await;
        }
        Err(e) => {
            let mut t = trace.lock().await;
            t.fail_step(index, e);
            drop(t);
            hooks.on_agent_error(&role.id, e).await;
        }
    }

    result
}

/// Apply a conductor's `error_mode` to a single agent step: under
/// [`ErrorMode::Retry`], re-run the step (each attempt its own trace step,
/// per the reference toolkit's own step-per-attempt logging) up to
/// `retry_count` times before giving up and behaving like `fail-fast`.
/// Any other mode runs the step exactly once.
#[allow(clippy::too_many_arguments)]
pub async fn run_agent_step_with_policy(
    ensemble: &Ensemble,
    role: &AgentRole,
    input: &str,
    context: &SharedContext,
    trace: &SharedTrace,
    cancel: &CancelToken,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
) -> Result<AgentResult, EngineError> {
    let attempts = if matches!(error_mode, ErrorMode::Retry) {
        retry_count.max(1)
    } else {
        1
    };

    let mut last_err = None;
    for attempt in 0..attempts {
        check_cancel(cancel)?;
        match run_agent_step_timed(ensemble, role, input, context, trace, cancel, agent_timeout).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt + 1 < attempts {
                    warn!(
                        "agent '{}' step failed (attempt {}/{}), retrying: {}",
                        role.id,
                        attempt + 1,
                        attempts,
                        e.sanitized_message()
                    );
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("attempts >= 1 guarantees at least one error on this path"))
}
