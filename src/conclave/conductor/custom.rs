//! The escape hatch: a caller-supplied orchestration function, given the
//! same substrate (ensemble, context, trace, cancel token) every built-in
//! conductor receives.
//!
//! Grounded on the reference toolkit's design note that the orchestration
//! modes are a closed enum internally, but callers who need a policy the
//! built-ins don't cover still need a first-class escape hatch — modeled
//! here the same way [`super::parallel::Merger::Custom`] escapes the
//! built-in mergers.

use super::{Conductor, SharedTrace};
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::Ensemble;
use crate::conclave::error::EngineError;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type OrchestrateFuture = Pin<Box<dyn Future<Output = Result<String, EngineError>> + Send>>;

/// A caller-supplied orchestration policy. Receives exactly what every
/// built-in [`Conductor`] receives and must return the ensemble's final
/// response.
pub type OrchestrateFn =
    Arc<dyn Fn(&Ensemble, &str, &SharedContext, SharedTrace, &CancelToken) -> OrchestrateFuture + Send + Sync>;

pub struct CustomConductor {
    orchestrate: OrchestrateFn,
}

pub struct CustomBuilder {
    orchestrate: Option<OrchestrateFn>,
}

impl Default for CustomBuilder {
    fn default() -> Self {
        CustomBuilder { orchestrate: None }
    }
}

impl CustomBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orchestrate(mut self, orchestrate: OrchestrateFn) -> Self {
        self.orchestrate = Some(orchestrate);
        self
    }

    pub fn build(self) -> Result<CustomConductor, EngineError> {
        let orchestrate = self
            .orchestrate
            .ok_or_else(|| EngineError::MissingRequired("orchestrate".to_string()))?;
        Ok(CustomConductor { orchestrate })
    }
}

impl CustomConductor {
    pub fn builder() -> CustomBuilder {
        CustomBuilder::new()
    }
}

#[async_trait]
impl Conductor for CustomConductor {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        (self.orchestrate)(ensemble, input, context, trace, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conclave::agent::Agent;
    use crate::conclave::backend::{Backend, FinishReason, GenerateRequest, GenerateResponse};
    use crate::conclave::ensemble::AgentRole;
    use crate::conclave::message::{Message, TokenUsage};

    struct FixedBackend;

    #[async_trait]
    impl Backend for FixedBackend {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
            Ok(GenerateResponse {
                message: Message::assistant("ok"),
                usage: Some(TokenUsage::new(1, 1)),
                finish_reason: FinishReason::Stop,
            })
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn build_fails_without_an_orchestrate_function() {
        let err = CustomConductor::builder().build().unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::MissingRequired);
    }

    #[tokio::test]
    async fn custom_conductor_runs_the_supplied_closure() {
        let agent = Agent::builder()
            .name("a")
            .system_prompt("s")
            .backend(Arc::new(FixedBackend))
            .build()
            .unwrap();
        let ensemble = Ensemble::builder()
            .name("custom")
            .add_agent(AgentRole::new("a", Arc::new(agent)))
            .unwrap()
            .default_conductor(Arc::new(
                CustomConductor::builder()
                    .orchestrate(Arc::new(|_ensemble, input, _ctx, _trace, _cancel| {
                        let input = input.to_string();
                        Box::pin(async move { Ok(format!("custom: {input}")) })
                    }))
                    .build()
                    .unwrap(),
            ))
            .build()
            .unwrap();

        let result = ensemble.run("X", None, &CancelToken::never()).await.unwrap();
        assert_eq!(result.response, "custom: X");
    }
}
