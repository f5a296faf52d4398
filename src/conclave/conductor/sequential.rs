//! Pipe outputs through an ordered list of agents.
//!
//! Grounded on the reference toolkit's `OrchestrationMode::RoundRobin`
//! single-pass form: each agent's response becomes the next agent's input,
//! walked in `agent_order`.

use super::{check_cancel, require_role, run_agent_step_with_policy, Conductor, ErrorMode, SharedTrace};
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::Ensemble;
use crate::conclave::error::EngineError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_COUNT: u32 = 3;

/// Applied between every pair of steps (never before the first) to reshape
/// one agent's output into the next agent's input.
pub type Transform = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

pub struct SequentialConductor {
    order: Vec<String>,
    transform: Option<Transform>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
}

pub struct SequentialBuilder {
    order: Vec<String>,
    transform: Option<Transform>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
}

impl Default for SequentialBuilder {
    fn default() -> Self {
        SequentialBuilder {
            order: Vec::new(),
            transform: None,
            error_mode: ErrorMode::FailFast,
            retry_count: DEFAULT_RETRY_COUNT,
            agent_timeout: None,
        }
    }
}

impl SequentialBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit agent order. When omitted, [`SequentialConductor::run`]
    /// uses the ensemble's registration order.
    pub fn order(mut self, order: Vec<String>) -> Self {
        self.order = order;
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
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

    pub fn build(self) -> Result<SequentialConductor, EngineError> {
        Ok(SequentialConductor {
            order: self.order,
            transform: self.transform,
            error_mode: self.error_mode,
            retry_count: self.retry_count,
            agent_timeout: self.agent_timeout,
        })
    }
}

impl SequentialConductor {
    pub fn builder() -> SequentialBuilder {
        SequentialBuilder::new()
    }
}

#[async_trait]
impl Conductor for SequentialConductor {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        let order: Vec<String> = if self.order.is_empty() {
            ensemble.roles().map(|r| r.id.clone()).collect()
        } else {
            self.order.clone()
        };

        let mut current_input = input.to_string();
        let mut last_response = String::new();

        for (i, id) in order.iter().enumerate() {
            check_cancel(cancel)?;
            let role = require_role(ensemble, id)?;

            let step_input = if i == 0 {
                current_input.clone()
            } else if let Some(transform) = &self.transform {
                transform(&current_input, id)
            } else {
                current_input.clone()
            };

            let result = run_agent_step_with_policy(
                ensemble,
                role,
                &step_input,
                context,
                &trace,
                cancel,
                self.error_mode,
                self.retry_count,
                self.agent_timeout,
            )
            .await;
            match result {
                Ok(agent_result) => {
                    last_response = agent_result.response.clone();
                    current_input = agent_result.response;
                }
                Err(e) => match self.error_mode {
                    ErrorMode::FailFast | ErrorMode::Retry => return Err(e),
                    ErrorMode::Continue => continue,
                },
            }
        }

        Ok(last_response)
    }
}
