//! Democratic voting: option generation (or caller-supplied options), a
//! per-voter vote, and a pluggable tally.
//!
//! Grounded on the reference toolkit's `OrchestrationMode::Ralph` panel
//! pattern (every agent answers independently, responses are collected and
//! reduced) generalized into four tally rules, defensive free-text vote
//! parsing, and a quorum gate the reference implementation does not have.

use super::{check_cancel, require_role, run_agent_step_with_policy, Conductor, ErrorMode, SharedTrace};
use crate::conclave::cancel::CancelToken;
use crate::conclave::context::SharedContext;
use crate::conclave::ensemble::Ensemble;
use crate::conclave::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_QUORUM: f64 = 0.5;
const DEFAULT_RETRY_COUNT: u32 = 3;

fn integer_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"-?\d+").expect("static regex"))
}

/// One voter's parsed ballot.
#[derive(Debug, Clone)]
pub enum Vote {
    /// A single 1-based option index, clamped into range.
    Single(usize),
    /// The rank this voter assigned to each option, indexed by option
    /// position: `ranks[i]` is the preference rank (1 = most preferred)
    /// given to option `i + 1`. Used for instant-runoff tallying.
    Ranked(Vec<usize>),
}

/// Fired once per voter once their ballot is parsed.
#[async_trait]
pub trait VotingHooks: Send + Sync {
    async fn on_vote(&self, _voter_id: &str, _vote: &Vote) {}
}

struct NoopVotingHooks;

#[async_trait]
impl VotingHooks for NoopVotingHooks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteMethod {
    Majority,
    Unanimous,
    Weighted,
    Ranked,
}

pub struct VotingConductor {
    voters: Vec<String>,
    options: Option<Vec<String>>,
    quorum: f64,
    method: VoteMethod,
    weights: HashMap<String, f64>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
    hooks: Arc<dyn VotingHooks>,
}

pub struct VotingBuilder {
    voters: Vec<String>,
    options: Option<Vec<String>>,
    quorum: f64,
    method: VoteMethod,
    weights: HashMap<String, f64>,
    error_mode: ErrorMode,
    retry_count: u32,
    agent_timeout: Option<Duration>,
    hooks: Option<Arc<dyn VotingHooks>>,
}

impl Default for VotingBuilder {
    fn default() -> Self {
        VotingBuilder {
            voters: Vec::new(),
            options: None,
            quorum: DEFAULT_QUORUM,
            method: VoteMethod::Majority,
            weights: HashMap::new(),
            error_mode: ErrorMode::Continue,
            retry_count: DEFAULT_RETRY_COUNT,
            agent_timeout: None,
            hooks: None,
        }
    }
}

impl VotingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Voters. Empty means "every agent in the ensemble".
    pub fn voters(mut self, voters: Vec<String>) -> Self {
        self.voters = voters;
        self
    }

    /// Explicit options. When omitted, options are generated at run time by
    /// polling each voter for one concise proposal.
    pub fn options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn quorum(mut self, quorum: f64) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn method(mut self, method: VoteMethod) -> Self {
        self.method = method;
        self
    }

    pub fn weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn VotingHooks>) -> Self {
        self.hooks = Some(hooks);
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

    pub fn build(self) -> Result<VotingConductor, EngineError> {
        if let Some(options) = &self.options {
            if options.len() < 2 {
                return Err(EngineError::InsufficientOptions(options.len()));
            }
        }
        Ok(VotingConductor {
            voters: self.voters,
            options: self.options,
            quorum: self.quorum,
            method: self.method,
            weights: self.weights,
            error_mode: self.error_mode,
            retry_count: self.retry_count,
            agent_timeout: self.agent_timeout,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopVotingHooks)),
        })
    }
}

impl VotingConductor {
    pub fn builder() -> VotingBuilder {
        VotingBuilder::new()
    }
}

fn options_prompt(topic: &str) -> String {
    format!("Given the following topic, propose one concise option to vote on:\n\n{topic}\n\nReply with only the option, no explanation.")
}

fn ballot_prompt(topic: &str, options: &[String], ranked: bool) -> String {
    let numbered = options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}. {}", i + 1, o))
        .collect::<Vec<_>>()
        .join("\n");
    if ranked {
        let n = options.len();
        format!(
            "Topic: {topic}\n\nOptions:\n{numbered}\n\nReply with {n} numbers separated by commas, one per option in the order listed above, each number giving the rank you assign that option (1 = most preferred, {n} = least preferred)."
        )
    } else {
        format!("Topic: {topic}\n\nOptions:\n{numbered}\n\nReply with the number of the option you vote for.")
    }
}

/// Take every integer substring in `text`, clamped into `[1, n]`.
fn parse_integers(text: &str, n: usize) -> Vec<usize> {
    integer_re()
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .map(|v| v.clamp(1, n as i64) as usize)
        .collect()
}

/// Parse a ballot. For ranked voting, `text` is expected to carry `n`
/// integers in option order, each the rank assigned to that option; short
/// replies are padded with the worst rank and excess integers are dropped,
/// so a voter that names only a few options still casts a valid ballot.
fn parse_vote(text: &str, n: usize, ranked: bool) -> Vote {
    let ints = parse_integers(text, n);
    if ranked {
        if ints.is_empty() {
            Vote::Ranked((1..=n).collect())
        } else {
            let mut ranks: Vec<usize> = ints.into_iter().take(n).collect();
            while ranks.len() < n {
                ranks.push(n);
            }
            Vote::Ranked(ranks)
        }
    } else {
        Vote::Single(*ints.first().unwrap_or(&1))
    }
}

fn tally_weighted(votes: &[(String, usize)], weights: &HashMap<String, f64>, options: &[String]) -> (usize, HashMap<usize, f64>) {
    let mut totals: HashMap<usize, f64> = HashMap::new();
    for (voter, choice) in votes {
        let weight = weights.get(voter).copied().unwrap_or(1.0);
        *totals.entry(*choice).or_insert(0.0) += weight;
    }
    // Ties are broken by first option encountered: fold left-to-right and
    // only replace the incumbent on a strictly greater total.
    let mut winner = 1usize;
    let mut best = totals.get(&1).copied().unwrap_or(0.0);
    for i in 2..=options.len() {
        let score = totals.get(&i).copied().unwrap_or(0.0);
        if score > best {
            best = score;
            winner = i;
        }
    }
    (winner, totals)
}

fn breakdown(totals: &HashMap<usize, f64>, options: &[String]) -> String {
    (1..=options.len())
        .map(|i| format!("{}: {:.0}", options[i - 1], totals.get(&i).copied().unwrap_or(0.0)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `ballots[i]` is a rank vector as described on [`Vote::Ranked`]: index
/// `o - 1` holds the rank the voter gave option `o`. A ballot shorter than
/// `n_options` treats the missing options as unranked (worst).
fn instant_runoff(ballots: &[Vec<usize>], n_options: usize) -> usize {
    let mut eliminated: std::collections::HashSet<usize> = std::collections::HashSet::new();
    loop {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        let mut cast = 0usize;
        for ballot in ballots {
            let choice = (1..=n_options)
                .filter(|o| !eliminated.contains(o))
                .min_by_key(|o| ballot.get(o - 1).copied().unwrap_or(usize::MAX));
            if let Some(choice) = choice {
                *counts.entry(choice).or_insert(0) += 1;
                cast += 1;
            }
        }
        let remaining: Vec<usize> = (1..=n_options).filter(|o| !eliminated.contains(o)).collect();
        if remaining.len() == 1 {
            return remaining[0];
        }
        if cast > 0 {
            if let Some((winner, count)) = counts.iter().max_by_key(|(_, c)| **c) {
                if *count * 2 > cast {
                    return *winner;
                }
            }
        }
        // Eliminate the lowest-count option, ties broken by first
        // encountered in option order.
        let loser = remaining
            .iter()
            .min_by_key(|o| counts.get(*o).copied().unwrap_or(0))
            .copied();
        match loser {
            Some(l) => {
                eliminated.insert(l);
            }
            None => return remaining[0],
        }
    }
}

#[async_trait]
impl Conductor for VotingConductor {
    async fn run(
        &self,
        ensemble: &Ensemble,
        input: &str,
        context: &SharedContext,
        trace: SharedTrace,
        cancel: &CancelToken,
    ) -> Result<String, EngineError> {
        check_cancel(cancel)?;

        let voter_ids: Vec<String> = if self.voters.is_empty() {
            ensemble.roles().map(|r| r.id.clone()).collect()
        } else {
            self.voters.clone()
        };
        for id in &voter_ids {
            require_role(ensemble, id)?;
        }
        let total_voters = voter_ids.len();

        let options: Vec<String> = match &self.options {
            Some(opts) => opts.clone(),
            None => {
                let mut generated = Vec::new();
                for id in &voter_ids {
                    check_cancel(cancel)?;
                    let role = require_role(ensemble, id)?;
                    let prompt = options_prompt(input);
                    let outcome = run_agent_step_with_policy(
                        ensemble, role, &prompt, context, &trace, cancel,
                        self.error_mode, self.retry_count, self.agent_timeout,
                    )
                    .await;
                    match outcome {
                        Ok(result) => {
                            let option = result.response.trim().to_string();
                            if !option.is_empty() && !generated.contains(&option) {
                                generated.push(option);
                            }
                        }
                        Err(e) => {
                            if matches!(self.error_mode, ErrorMode::FailFast | ErrorMode::Retry) {
                                return Err(e);
                            }
                        }
                    }
                }
                if generated.len() < 2 {
                    return Err(EngineError::InsufficientOptions(generated.len()));
                }
                generated
            }
        };

        let ranked = matches!(self.method, VoteMethod::Ranked);
        let mut votes: Vec<(String, Vote)> = Vec::new();

        for id in &voter_ids {
            check_cancel(cancel)?;
            let role = require_role(ensemble, id)?;
            let prompt = ballot_prompt(input, &options, ranked);
            match run_agent_step_with_policy(
                ensemble, role, &prompt, context, &trace, cancel,
                self.error_mode, self.retry_count, self.agent_timeout,
            )
            .await
            {
                Ok(result) => {
                    let vote = parse_vote(&result.response, options.len(), ranked);
                    self.hooks.on_vote(id, &vote).await;
                    votes.push((id.clone(), vote));
                }
                Err(e) => {
                    if matches!(self.error_mode, ErrorMode::FailFast | ErrorMode::Retry) {
                        return Err(e);
                    }
                }
            }
        }

        let active = votes.len();
        let required = (total_voters as f64 * self.quorum).ceil() as usize;
        if active < required {
            return Err(EngineError::QuorumNotMet { active, required });
        }

        match self.method {
            VoteMethod::Majority => {
                let singles: Vec<(String, usize)> = votes
                    .iter()
                    .map(|(id, v)| (id.clone(), single_choice(v)))
                    .collect();
                let no_weights = HashMap::new();
                let (winner, totals) = tally_weighted(&singles, &no_weights, &options);
                Ok(format!(
                    "Winner: {} ({}/{} votes). Breakdown: {}",
                    options[winner - 1],
                    totals.get(&winner).copied().unwrap_or(0.0) as usize,
                    active,
                    breakdown(&totals, &options)
                ))
            }
            VoteMethod::Weighted => {
                let singles: Vec<(String, usize)> = votes
                    .iter()
                    .map(|(id, v)| (id.clone(), single_choice(v)))
                    .collect();
                let (winner, totals) = tally_weighted(&singles, &self.weights, &options);
                Ok(format!(
                    "Winner: {} (weighted score {:.1}). Breakdown: {}",
                    options[winner - 1],
                    totals.get(&winner).copied().unwrap_or(0.0),
                    breakdown(&totals, &options)
                ))
            }
            VoteMethod::Unanimous => {
                let choices: Vec<usize> = votes.iter().map(|(_, v)| single_choice(v)).collect();
                let first = choices.first().copied().unwrap_or(1);
                if choices.iter().all(|c| *c == first) {
                    Ok(format!("Unanimous winner: {} ({} votes)", options[first - 1], active))
                } else {
                    let singles: Vec<(String, usize)> = votes
                        .iter()
                        .map(|(id, v)| (id.clone(), single_choice(v)))
                        .collect();
                    let no_weights = HashMap::new();
                    let (_, totals) = tally_weighted(&singles, &no_weights, &options);
                    Ok(format!(
                        "No unanimous consensus reached. Breakdown: {}",
                        breakdown(&totals, &options)
                    ))
                }
            }
            VoteMethod::Ranked => {
                let ballots: Vec<Vec<usize>> = votes
                    .iter()
                    .map(|(_, v)| match v {
                        Vote::Ranked(ranks) => ranks.clone(),
                        Vote::Single(choice) => {
                            // Defensive fallback: a ranked vote that somehow
                            // parsed as a single choice still casts a valid
                            // ballot, with everything else tied for last.
                            let mut ranks = vec![2; options.len()];
                            if *choice >= 1 && *choice <= options.len() {
                                ranks[*choice - 1] = 1;
                            }
                            ranks
                        }
                    })
                    .collect();
                let winner = instant_runoff(&ballots, options.len());
                Ok(format!(
                    "Winner by instant-runoff: {} (out of {} ballots)",
                    options[winner - 1],
                    active
                ))
            }
        }
    }
}

fn single_choice(vote: &Vote) -> usize {
    match vote {
        Vote::Single(c) => *c,
        Vote::Ranked(ranks) => ranks
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| **r)
            .map(|(i, _)| i + 1)
            .unwrap_or(1),
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

    fn voter(id: &str, reply: &str) -> AgentRole {
        let agent = Agent::builder()
            .name(id)
            .system_prompt("s")
            .backend(Arc::new(FixedBackend {
                reply: reply.to_string(),
            }))
            .build()
            .unwrap();
        AgentRole::new(id, Arc::new(agent))
    }

    #[tokio::test]
    async fn majority_picks_the_most_voted_option() {
        let ensemble = Ensemble::builder()
            .name("vote")
            .add_agent(voter("v1", "I vote for 2"))
            .unwrap()
            .add_agent(voter("v2", "2 is my choice"))
            .unwrap()
            .add_agent(voter("v3", "2"))
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

        let result = ensemble.run("color?", None, &CancelToken::never()).await.unwrap();
        assert!(result.response.contains("blue"));
        assert!(result.response.contains("3/4"));
    }

    #[test]
    fn ranked_irv_eliminates_lowest_first_choice() {
        // Each ballot is a rank-per-option vector; option 3 has only one
        // first-place vote (ranks[2] == 1 on a single ballot) and is
        // eliminated first, its ballot transferring to option 1, which then
        // wins the runoff 3/5.
        let ballots = vec![
            vec![3, 1, 2],
            vec![3, 1, 2],
            vec![1, 2, 3],
            vec![1, 2, 3],
            vec![2, 3, 1],
        ];
        let winner = instant_runoff(&ballots, 3);
        assert_eq!(winner, 1);
    }

    #[test]
    fn parse_vote_defaults_to_option_one_without_a_number() {
        let vote = parse_vote("I'm not sure", 3, false);
        match vote {
            Vote::Single(c) => assert_eq!(c, 1),
            _ => panic!("expected single vote"),
        }
    }

    #[test]
    fn build_rejects_fewer_than_two_explicit_options() {
        let err = VotingConductor::builder().options(vec!["only one".into()]).build().unwrap_err();
        assert_eq!(err.kind(), crate::conclave::error::ErrorKind::InsufficientOptions);
    }
}
