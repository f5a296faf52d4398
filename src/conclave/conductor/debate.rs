//! Multi-round adversarial debate with a pluggable consensus/resolution
//! strategy.
//!
//! Grounded on the reference toolkit's `OrchestrationMode::Debate`
//! (`rounds: u32`, sequential per-debater turns each seeing the prior
//! round's transcript) generalized with three ways to resolve the final
//! response instead of always concatenating the transcript, and an early
//! agreement exit lifted from the reference's own keyword-based consensus
//! check in `debate_consensus.rs`.

use super::{check_cancel, require_role, run_agent_step_with_policy, Conductor, ErrorMode, SharedTrace};
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::Ensemble;
use crate::conclave::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ROUNDS: u32 = 10;
const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.8;
const DEFAULT_RETRY_COUNT: u32 = 3;

/// Case-insensitive substring markers the default agreement predicate looks
/// for in a round's statements. English-only and locale-specific by
/// design — see the pluggable `AgreementPredicate` below for translated or
/// domain-specific content.
const AGREEMENT_KEYWORDS: &[&str] = &[
    "i agree",
    "you're right",
    "good point",
    "consensus",
    "we all",
    "common ground",
];

/// A debate round's statements, keyed by debater id.
pub type RoundStatements = HashMap<String, String>;

/// Fired once per completed round with the full round's statement mapping.
#[async_trait]
pub trait DebateHooks: Send + Sync {
    async fn on_debate_round(&self, _round: u32, _statements: &RoundStatements) {}
}

struct NoopDebateHooks;

#[async_trait]
impl DebateHooks for NoopDebateHooks {}

/// Whether a round's statements count as having reached agreement. Default
/// is [`default_agreement_predicate`]; override for non-English content or a
/// different convergence signal.
pub type AgreementPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub fn default_agreement_predicate() -> AgreementPredicate {
    Arc::new(|statement: &str| {
        let lower = statement.to_lowercase();
        AGREEMENT_KEYWORDS.iter().any(|kw| lower.contains(kw))
    })
}

/// How the debate's final response is determined once rounds complete (or
/// agreement is reached early).
#[derive(Clone)]
pub enum ConsensusStrategy {
    /// Feed `judge_id`'s agent a summary of every debater's initial and
    /// final statements; its response is the final response.
    Judge { judge_id: String },
    /// Emit a labeled concatenation of final statements. Also the
    /// mandatory resolution when early agreement exit fires.
    Agreement,
    /// Each debater votes for another debater's position by mentioning
    /// their id; most-mentioned id wins. Ties or no matches fall back to a
    /// labeled concatenation.
    Voting,
}

pub struct DebateConductor {
    debaters: Vec<String>,
    max_rounds: u32,
    consensus: ConsensusStrategy,
    consensus_threshold: f64,
    agreement_predicate: AgreementPredicate,
    hooks: Arc<dyn DebateHooks>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
}

pub struct DebateBuilder {
    debaters: Vec<String>,
    max_rounds: u32,
    consensus: Option<ConsensusStrategy>,
    consensus_threshold: f64,
    agreement_predicate: AgreementPredicate,
    hooks: Option<Arc<dyn DebateHooks>>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
}

impl Default for DebateBuilder {
    fn default() -> Self {
        DebateBuilder {
            debaters: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            consensus: None,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            agreement_predicate: default_agreement_predicate(),
            hooks: None,
            error_mode: ErrorMode::FailFast,
            retry_count: DEFAULT_RETRY_COUNT,
            agent_timeout: None,
        }
    }
}

impl DebateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debaters(mut self, debaters: Vec<String>) -> Self {
        self.debaters = debaters;
        self
    }

    pub fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn consensus(mut self, consensus: ConsensusStrategy) -> Self {
        self.consensus = Some(consensus);
        self
    }

    pub fn consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    pub fn agreement_predicate(mut self, predicate: AgreementPredicate) -> Self {
        self.agreement_predicate = predicate;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn DebateHooks>) -> Self {
        self.hooks = Some(hooks);
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

    pub fn build(self) -> Result<DebateConductor, EngineError> {
        if self.debaters.len() < 2 {
            return Err(EngineError::MissingRequired(
                "debate requires at least 2 debaters".to_string(),
            ));
        }
        let consensus = self
            .consensus
            .unwrap_or(ConsensusStrategy::Agreement);
        if let ConsensusStrategy::Judge { judge_id } = &consensus {
            if judge_id.is_empty() {
                return Err(EngineError::MissingRequired("judge_id".to_string()));
            }
        }
        Ok(DebateConductor {
            debaters: self.debaters,
            max_rounds: self.max_rounds,
            consensus,
            consensus_threshold: self.consensus_threshold,
            agreement_predicate: self.agreement_predicate,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopDebateHooks)),
            error_mode: self.error_mode,
            retry_count: self.retry_count,
            agent_timeout: self.agent_timeout,
        })
    }
}

impl DebateConductor {
    pub fn builder() -> DebateBuilder {
        DebateBuilder::new()
    }
}

fn opening_prompt(topic: &str) -> String {
    format!(
        "You are participating in a structured debate on the following topic:\n\n{topic}\n\nState your opening position clearly and concisely, with your strongest supporting argument."
    )
}

fn round_prompt(topic: &str, own_previous: &str, others: &[(&String, &String)]) -> String {
    let others_block = others
        .iter()
        .map(|(id, statement)| format!("{id}: {statement}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Debate topic: {topic}\n\nYour previous statement:\n{own_previous}\n\nThe other participants' latest statements:\n{others_block}\n\nRespond to their points: defend your position, refine it in light of what they said, or converge toward common ground if you find their argument convincing."
    )
}

fn judge_prompt(topic: &str, initial: &RoundStatements, finals: &RoundStatements, debaters: &[String]) -> String {
    let summary = debaters
        .iter()
        .map(|id| {
            format!(
                "{id}:\n  opening: {}\n  final: {}",
                initial.get(id).map(String::as_str).unwrap_or(""),
                finals.get(id).map(String::as_str).unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are judging a debate on the topic: {topic}\n\nHere is each participant's opening and final position:\n\n{summary}\n\nDeclare a winner (or a synthesis) and explain your reasoning."
    )
}

fn labeled_concatenation(debaters: &[String], statements: &RoundStatements) -> String {
    debaters
        .iter()
        .map(|id| format!("[{id}] {}", statements.get(id).map(String::as_str).unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Counts which debater id is mentioned the most across every other
/// debater's final statement, excluding self-mentions.
fn tally_votes(debaters: &[String], finals: &RoundStatements) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for voter in debaters {
        let statement = finals.get(voter).map(String::as_str).unwrap_or("");
        let lower = statement.to_lowercase();
        for candidate in debaters {
            if candidate == voter {
                continue;
            }
            if lower.contains(&candidate.to_lowercase()) {
                *counts.entry(candidate.as_str()).or_insert(0) += 1;
            }
        }
    }
    if counts.is_empty() {
        return None;
    }
    let max_count = *counts.values().max().unwrap();
    let winners: Vec<&&str> = counts
        .iter()
        .filter(|(_, c)| **c == max_count)
        .map(|(id, _)| id)
        .collect();
    if winners.len() == 1 {
        Some(winners[0].to_string())
    } else {
        None
    }
}

#[async_trait]
impl Conductor for DebateConductor {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        check_cancel(cancel)?;
        for id in &self.debaters {
            require_role(ensemble, id)?;
        }

        let mut initial: RoundStatements = HashMap::new();
        for id in &self.debaters {
            let role = require_role(ensemble, id)?;
            let prompt = opening_prompt(input);
            let result = run_agent_step_with_policy(
                ensemble, role, &prompt, context, &trace, cancel,
                self.error_mode, self.retry_count, self.agent_timeout,
            )
            .await?;
            initial.insert(id.clone(), result.response);
        }
        let mut latest = initial.clone();

        for round in 1..=self.max_rounds {
            check_cancel(cancel)?;
            let mut round_statements: RoundStatements = HashMap::new();

            for id in &self.debaters {
                let role = require_role(ensemble, id)?;
                let own_previous = latest.get(id).map(String::as_str).unwrap_or("");
                let others: Vec<(&String, &String)> = self
                    .debaters
                    .iter()
                    .filter(|other| *other != id)
                    .filter_map(|other| latest.get(other).map(|s| (other, s)))
                    .collect();
                let prompt = round_prompt(input, own_previous, &others);
                let result = run_agent_step_with_policy(
                    ensemble, role, &prompt, context, &trace, cancel,
                    self.error_mode, self.retry_count, self.agent_timeout,
                )
                .await?;
                round_statements.insert(id.clone(), result.response);
            }

            for (id, statement) in &round_statements {
                latest.insert(id.clone(), statement.clone());
            }

            self.hooks.on_debate_round(round, &round_statements).await;

            if matches!(self.consensus, ConsensusStrategy::Agreement) {
                let agreeing = round_statements
                    .values()
                    .filter(|s| (self.agreement_predicate)(s))
                    .count();
                let ratio = agreeing as f64 / round_statements.len().max(1) as f64;
                if ratio >= self.consensus_threshold {
                    break;
                }
            }
        }

        match &self.consensus {
            ConsensusStrategy::Judge { judge_id } => {
                let judge_role = require_role(ensemble, judge_id)?;
                let prompt = judge_prompt(input, &initial, &latest, &self.debaters);
                let result = run_agent_step_with_policy(
                    ensemble, judge_role, &prompt, context, &trace, cancel,
                    self.error_mode, self.retry_count, self.agent_timeout,
                )
                .await?;
                Ok(result.response)
            }
            ConsensusStrategy::Agreement => Ok(labeled_concatenation(&self.debaters, &latest)),
            ConsensusStrategy::Voting => match tally_votes(&self.debaters, &latest) {
                Some(winner) => Ok(format!(
                    "{winner} wins by peer vote.\n\n{}",
                    labeled_concatenation(&self.debaters, &latest)
                )),
                None => Ok(labeled_concatenation(&self.debaters, &latest)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conclave::agent::Agent;
    use crate::conclave::backend::{Backend, FinishReason, GenerateRequest, GenerateResponse};
    use crate::conclave::ensemble::AgentRole;
    use crate::conclave::message::{Message, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        replies: Vec<String>,
        call: AtomicUsize,
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, EngineError> {
            let i = self.call.fetch_add(1, Ordering::SeqCst);
            let reply = self.replies.get(i).cloned().unwrap_or_else(|| self.replies.last().cloned().unwrap());
            Ok(GenerateResponse {
                message: Message::assistant(reply),
                usage: Some(TokenUsage::new(1, 1)),
                finish_reason: FinishReason::Stop,
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn scripted_agent(id: &str, replies: Vec<&str>) -> AgentRole {
        let backend = ScriptedBackend {
            replies: replies.into_iter().map(String::from).collect(),
            call: AtomicUsize::new(0),
        };
        let agent = Agent::builder()
            .name(id)
            .system_prompt("debater")
            .backend(Arc::new(backend))
            .build()
            .unwrap();
        AgentRole::new(id, Arc::new(agent))
    }

    #[tokio::test]
    async fn agreement_strategy_concatenates_final_statements() {
        let ensemble = Ensemble::builder()
            .name("debate")
            .add_agent(scripted_agent("a", vec!["A opens", "A agrees with B, good point"]))
            .unwrap()
            .add_agent(scripted_agent("b", vec!["B opens", "B holds firm"]))
            .unwrap()
            .default_conductor(Arc::new(
                DebateConductor::builder()
                    .debaters(vec!["a".into(), "b".into()])
                    .max_rounds(1)
                    .consensus(ConsensusStrategy::Agreement)
                    .build()
                    .unwrap(),
            ))
            .build()
            .unwrap();

        let result = ensemble.run("topic", None, &CancelToken::never()).await.unwrap();
        assert!(result.response.contains("[a]"));
        assert!(result.response.contains("[b]"));
    }

    #[tokio::test]
    async fn judge_strategy_requires_judge_id() {
        let err = DebateConductor::builder()
            .debaters(vec!["a".into(), "b".into()])
            .consensus(ConsensusStrategy::Judge {
                judge_id: String::new(),
            })
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::MissingRequired);
    }

    #[tokio::test]
    async fn build_requires_at_least_two_debaters() {
        let err = DebateConductor::builder().debaters(vec!["a".into()]).build().unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::MissingRequired);
    }
}
