// src/lib.rs

//! `conclave` is a multi-agent orchestration runtime for LLM-driven workers.
//!
//! It drives a single [`Agent`] through a bounded tool-use conversation loop
//! over an abstract [`Backend`](crate::conclave::backend::Backend), and
//! composes several agents under an [`Ensemble`] with a choice of conductor
//! strategies: sequential pipelines, parallel fan-out/merge, hierarchical
//! manager/worker delegation, adversarial debate, democratic voting, or a
//! caller-supplied custom strategy. Every run produces an
//! [`ExecutionTrace`] and shares state through a [`SharedContext`].

pub mod conclave;

pub use conclave::agent::{Agent, AgentBuilder, AgentConfig, AgentHooks, AgentResult};
pub use conclave::backend::{Backend, FinishReason, GenerateRequest, GenerateResponse};
pub use conclave::cancel::{cancel_pair, CancelHandle, CancelToken};
pub use conclave::conductor::{
    AgreementPredicate, ConsensusStrategy, Conductor, CustomConductor, DebateConductor,
    DebateHooks, ErrorMode, HierarchicalConductor, Merger, ParallelConductor, RoundStatements,
    SequentialConductor, Transform, Vote, VoteMethod, VotingConductor, VotingHooks,
};
pub use conclave::context::{ContextSnapshot, SharedContext};
pub use conclave::ensemble::{
    AgentRole, Ensemble, EnsembleBuilder, EnsembleHooks, EnsembleOutcome, EnsembleResult,
};
pub use conclave::error::{EngineError, ErrorKind, TimeoutScope};
pub use conclave::handoff::{
    AdvancedHandoffHandler, HandoffChain, HandoffChainResult, HandoffChainStep, HandoffHandler,
    HandoffLifecycle, HandoffRegistry, HandoffRequest, HandoffResponse, SimpleHandoffHandler,
};
pub use conclave::json_schema::validate as validate_json_schema;
pub use conclave::message::{Message, NativeToolCall, Role, TokenUsage};
pub use conclave::sanitize::sanitize;
pub use conclave::tool::{FunctionTool, Tool, ToolRegistry};
pub use conclave::trace::{ExecutionTrace, Step};
