//! Concurrent fan-out over a subset of agents with a pluggable merger.
//!
//! Grounded on the reference toolkit's `OrchestrationMode::Parallel`
//! (`tokio::spawn` per agent, gathered with `join_all`), generalized with a
//! `tokio::sync::Semaphore`-bounded concurrency limiter (the "keep N in
//! flight, await any on saturation" design called out in this engine's own
//! design notes) and four merge strategies instead of one fixed
//! concatenation.

use super::{check_cancel, require_role, run_agent_step, run_agent_step_with_policy, Conductor, ErrorMode, SharedTrace};
use crate::conclave::agent::AgentResult;
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::Ensemble;
use crate::conclave::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_RETRY_COUNT: u32 = 3;

type Selector = Arc<dyn Fn(&HashMap<String, AgentResult>) -> String + Send + Sync>;
type CustomMerge = Arc<dyn Fn(&HashMap<String, AgentResult>) -> String + Send + Sync>;

/// How per-agent results are fused into the ensemble's final response.
#[derive(Clone)]
pub enum Merger {
    /// Join each agent's response, prefixed by its role label, with
    /// `separator` (default `"\n\n---\n\n"`).
    Concatenate { separator: String },
    /// Feed a labeled concatenation of results to `summarizer_id`'s agent;
    /// its response becomes the final response.
    Summarize { summarizer_id: String },
    /// Apply a caller-provided selector over the id-keyed results map.
    SelectBest(Selector),
    /// Apply a caller-provided merge function over the id-keyed results
    /// map.
    Custom(CustomMerge),
}

pub struct ParallelConductor {
    selected: Vec<String>,
    concurrency: Option<usize>,
    merger: Merger,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
}

pub struct ParallelBuilder {
    selected: Vec<String>,
    concurrency: Option<usize>,
    merger: Option<Merger>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
}

impl Default for ParallelBuilder {
    fn default() -> Self {
        ParallelBuilder {
            selected: Vec::new(),
            concurrency: None,
            merger: None,
            error_mode: ErrorMode::Continue,
            retry_count: DEFAULT_RETRY_COUNT,
            agent_timeout: None,
        }
    }
}

impl ParallelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agents to dispatch. Empty means "every agent in the ensemble".
    pub fn selected(mut self, selected: Vec<String>) -> Self {
        self.selected = selected;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn merger(mut self, merger: Merger) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn agent_timeout(mut self, agent_timeout: Duration) -> Self {
        self.agent_timeout = Some(agent_timeout);
        self
    }

    pub fn build(self) -> Result<ParallelConductor, EngineError> {
        let merger = self
            .merger
            .ok_or_else(|| EngineError::MissingRequired("merger".to_string()))?;
        Ok(ParallelConductor {
            selected: self.selected,
            concurrency: self.concurrency,
            merger,
            error_mode: self.error_mode,
            retry_count: self.retry_count,
            agent_timeout: self.agent_timeout,
        })
    }
}

impl ParallelConductor {
    pub fn builder() -> ParallelBuilder {
        ParallelBuilder::new()
    }
}

#[async_trait]
impl Conductor for ParallelConductor {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        check_cancel(cancel)?;

        let ids: Vec<String> = if self.selected.is_empty() {
            ensemble.roles().map(|r| r.id.clone()).collect()
        } else {
            self.selected.clone()
        };
        for id in &ids {
            require_role(ensemble, id)?;
        }

        let concurrency = self.concurrency.unwrap_or(ids.len().max(1));
        let semaphore = Semaphore::new(concurrency);

        // No spawning: each agent's future is polled concurrently by
        // `join_all` within this single task, bounded to `concurrency`
        // simultaneous in-flight backend calls by the semaphore. This keeps
        // the whole engine's scheduling model cooperative and
        // single-threaded, matching the concurrency model this conductor
        // family is specified against.
        let futures = ids.iter().map(|id| async {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let role = require_role(ensemble, id)?;
            let result = run_agent_step_with_policy(
                ensemble,
                role,
                input,
                context,
                &trace,
                cancel,
                self.error_mode,
                self.retry_count,
                self.agent_timeout,
            )
            .await;
            Ok::<(String, Result<AgentResult, EngineError>), EngineError>((id.clone(), result))
        });

        let outcomes = futures_util::future::try_join_all(futures).await?;

        let mut results: HashMap<String, AgentResult> = HashMap::new();
        let mut first_error: Option<EngineError> = None;

        for (id, result) in outcomes {
            match result {
                Ok(agent_result) => {
                    results.insert(id, agent_result);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        // Under `continue`, a partial failure never aborts the run — the
        // merger runs over whatever results did land, and the failures stay
        // visible as failed steps in the trace. `fail-fast` and `retry`
        // (which has already exhausted its attempts by this point) always
        // propagate the first failure. But a *total* fan-out failure raises
        // regardless of mode: merging over an empty results map would paper
        // over every agent having errored.
        if !matches!(self.error_mode, ErrorMode::Continue) || results.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        merge(&self.merger, ensemble, &results, context, &trace, cancel).await
    }
}

async fn merge(
    merger: &Merger,
    ensemble: &Ensemble,
    results: &HashMap<String, AgentResult>,
    context: &SharedContext,
    trace: &SharedTrace,
    cancel: &CancelToken,
) -> Result<String, EngineError> {
    match merger {
        Merger::Concatenate { separator } => Ok(ensemble
            .roles()
            .filter_map(|role| {
                results
                    .get(&role.id)
                    .map(|r| format!("[{}] {}", role.role.as_deref().unwrap_or(&role.id), r.response))
            })
            .collect::<Vec<_>>()
            .join(separator)),
        Merger::Summarize { summarizer_id } => {
            let labeled = ensemble
                .roles()
                .filter_map(|role| results.get(&role.id).map(|r| format!("[{}] {}", role.id, r.response)))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n");
            let summarizer = require_role(ensemble, summarizer_id)?;
            let summary = run_agent_step(ensemble, summarizer, &labeled, context, trace, cancel).await?;
            Ok(summary.response)
        }
        Merger::SelectBest(selector) => Ok(selector(results)),
        Merger::Custom(f) => Ok(f(results)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conclave::agent::Agent;
    use crate::conclave::backend::{Backend, FinishReason, GenerateRequest, GenerateResponse};
    use crate::conclave::ensemble::AgentRole;
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

    struct FailingBackend;

    #[async_trait]
    impl Backend for FailingBackend {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
            Err(EngineError::BackendFailure("offline".to_string()))
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn failing_agent(id: &str) -> AgentRole {
        let agent = Agent::builder()
            .name(id)
            .system_prompt("s")
            .backend(Arc::new(FailingBackend))
            .build()
            .unwrap();
        AgentRole::new(id, Arc::new(agent))
    }

    fn fixed_agent(id: &str, role: &str, reply: &str) -> AgentRole {
        let agent = Agent::builder()
            .name(id)
            .system_prompt("s")
            .backend(Arc::new(FixedBackend {
                reply: reply.to_string(),
            }))
            .build()
            .unwrap();
        AgentRole::new(id, Arc::new(agent)).with_role(role.to_string())
    }

    #[tokio::test]
    async fn concatenate_merger_includes_every_agent_regardless_of_completion_order() {
        let ensemble = Ensemble::builder()
            .name("panel")
            .add_agent(fixed_agent("alpha_id", "alpha", "A"))
            .unwrap()
            .add_agent(fixed_agent("beta_id", "beta", "B"))
            .unwrap()
            .default_conductor(Arc::new(
                ParallelConductor::builder()
                    .merger(Merger::Concatenate {
                        separator: " | ".to_string(),
                    })
                    .build()
                    .unwrap(),
            ))
            .build()
            .unwrap();

        let result = ensemble.run("topic", None, &CancelToken::never()).await.unwrap();
        assert!(result.response.contains("[alpha]"));
        assert!(result.response.contains("[beta]"));
        assert!(result.response.contains(" | "));
    }

    #[tokio::test]
    async fn parallel_all_agents_failing_still_raises_under_continue() {
        let ensemble = Ensemble::builder()
            .name("panel")
            .add_agent(failing_agent("alpha_id"))
            .unwrap()
            .add_agent(failing_agent("beta_id"))
            .unwrap()
            .default_conductor(Arc::new(
                ParallelConductor::builder()
                    .error_mode(ErrorMode::Continue)
                    .merger(Merger::Concatenate {
                        separator: " | ".to_string(),
                    })
                    .build()
                    .unwrap(),
            ))
            .build()
            .unwrap();

        let err = ensemble.run("topic", None, &CancelToken::never()).await.unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::BackendFailure);
    }
}
