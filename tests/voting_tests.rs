//! End-to-end voting scenarios drawn from the engine's testable-properties
//! table: majority tallying and ranked-choice instant runoff.

use async_trait::async_trait;
use conclave::{
    Agent, AgentRole, CancelToken, Backend, EngineError, Ensemble, ErrorKind, FinishReason,
    GenerateRequest, GenerateResponse, Message, TokenUsage, VoteMethod, VotingConductor,
};
use std::sync::Arc;

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

fn absent_voter(id: &str) -> AgentRole {
    let agent = Agent::builder()
        .name(id)
        .system_prompt("voter")
        .backend(Arc::new(FailingBackend))
        .build()
        .unwrap();
    AgentRole::new(id, Arc::new(agent))
}

fn voter(id: &str, reply: &str) -> AgentRole {
    let agent = Agent::builder()
        .name(id)
        .system_prompt("voter")
        .backend(Arc::new(FixedBackend {
            reply: reply.to_string(),
        }))
        .build()
        .unwrap();
    AgentRole::new(id, Arc::new(agent))
}

#[tokio::test]
async fn majority_vote_names_the_winner_with_a_breakdown() {
    let ensemble = Ensemble::builder()
        .name("panel")
        .add_agent(voter("v1", "2"))
        .unwrap()
        .add_agent(voter("v2", "I'll go with option 2"))
        .unwrap()
        .add_agent(voter("v3", "2, definitely"))
        .unwrap()
        .add_agent(voter("v4", "1"))
        .unwrap()
        .default_conductor(Arc::new(
            VotingConductor::builder()
                .options(vec!["red".into(), "blue".into()])
                .method(VoteMethod::Majority)
                .build()
                .unwrap(),
        ))
        .build()
        .unwrap();

    let result = ensemble.run("pick a color", None, &CancelToken::never()).await.unwrap();
    assert!(result.response.contains("blue"));
}

#[tokio::test]
async fn ranked_choice_runoff_eliminates_the_weakest_option() {
    // Three options; ballots: [3,1,2]x2, [1,2,3]x2, [2,3,1]x1 — option 3 has
    // only one first-place vote and is eliminated first, its ballot
    // transfers to option 1, which then wins the runoff 3/5.
    let ensemble = Ensemble::builder()
        .name("panel")
        .add_agent(voter("v1", "3, 1, 2"))
        .unwrap()
        .add_agent(voter("v2", "3, 1, 2"))
        .unwrap()
        .add_agent(voter("v3", "1, 2, 3"))
        .unwrap()
        .add_agent(voter("v4", "1, 2, 3"))
        .unwrap()
        .add_agent(voter("v5", "2, 3, 1"))
        .unwrap()
        .default_conductor(Arc::new(
            VotingConductor::builder()
                .options(vec!["alpha".into(), "beta".into(), "gamma".into()])
                .method(VoteMethod::Ranked)
                .build()
                .unwrap(),
        ))
        .build()
        .unwrap();

    let result = ensemble.run("rank the options", None, &CancelToken::never()).await.unwrap();
    assert!(result.response.contains("alpha"));
}

#[tokio::test]
async fn quorum_not_met_when_too_few_voters_are_declared_active() {
    // Four declared voters, quorum 0.75 (need 3 active); three of them are
    // unreachable, so only one vote actually lands and the tally never runs.
    let ensemble = Ensemble::builder()
        .name("panel")
        .add_agent(voter("v1", "1"))
        .unwrap()
        .add_agent(absent_voter("v2"))
        .unwrap()
        .add_agent(absent_voter("v3"))
        .unwrap()
        .add_agent(absent_voter("v4"))
        .unwrap()
        .default_conductor(Arc::new(
            VotingConductor::builder()
                .options(vec!["a".into(), "b".into()])
                .voters(vec!["v1".into(), "v2".into(), "v3".into(), "v4".into()])
                .quorum(0.75)
                .build()
                .unwrap(),
        ))
        .build()
        .unwrap();

    let err = ensemble.run("pick", None, &CancelToken::never()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuorumNotMet);
}

#[tokio::test]
async fn build_rejects_a_single_explicit_option() {
    let err = VotingConductor::builder().options(vec!["only".into()]).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientOptions);
}
