//! Cancellation liveness: once the signal trips, no new agent step starts,
//! and the trace still shows every step that actually ran.

use async_trait::async_trait;
use conclave::{
    cancel_pair, Agent, AgentRole, Backend, CancelHandle, EngineError, Ensemble, ErrorKind,
    FinishReason, GenerateRequest, GenerateResponse, Message, SequentialConductor, TokenUsage,
};
use std::sync::Arc;

/// Trips the shared cancel signal as a side effect of generating, standing
/// in for a slow backend call that gets cancelled mid-flight by another
/// part of the system.
struct CancelOnGenerateBackend {
    handle: Arc<CancelHandle>,
    reply: String,
}

#[async_trait]
impl Backend for CancelOnGenerateBackend {
    async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
        self.handle.cancel();
        Ok(GenerateResponse {
            message: Message::assistant(self.reply.clone()),
            usage: Some(TokenUsage::new(1, 1)),
            finish_reason: FinishReason::Stop,
        })
    }

    fn model_name(&self) -> &str {
        "cancel-on-generate"
    }
}

struct NeverCalledBackend;

#[async_trait]
impl Backend for NeverCalledBackend {
    async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
        panic!("this backend must never be invoked once cancellation has tripped");
    }

    fn model_name(&self) -> &str {
        "never-called"
    }
}

#[tokio::test]
async fn cancellation_stops_the_run_before_the_next_step_and_keeps_the_partial_trace() {
    let (handle, token) = cancel_pair();
    let handle = Arc::new(handle);

    let a = Agent::builder()
        .name("a")
        .system_prompt("s")
        .backend(Arc::new(CancelOnGenerateBackend {
            handle: handle.clone(),
            reply: "a done".to_string(),
        }))
        .build()
        .unwrap();
    let b = Agent::builder()
        .name("b")
        .system_prompt("s")
        .backend(Arc::new(NeverCalledBackend))
        .build()
        .unwrap();

    let ensemble = Ensemble::builder()
        .name("pipeline")
        .add_agent(AgentRole::new("a", Arc::new(a)))
        .unwrap()
        .add_agent(AgentRole::new("b", Arc::new(b)))
        .unwrap()
        .default_conductor(Arc::new(
            SequentialConductor::builder().order(vec!["a".into(), "b".into()]).build().unwrap(),
        ))
        .build()
        .unwrap();

    let outcome = ensemble.run_traced("go", None, &token).await.unwrap();
    let err = outcome.result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    assert_eq!(outcome.trace.steps.len(), 1);
    let step = &outcome.trace.steps[0];
    assert_eq!(step.agent_id, "a");
    assert_eq!(step.output.as_deref(), Some("a done"));
    assert!(step.error.is_none());
}
