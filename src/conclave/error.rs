//! Crate-wide error type.
//!
//! Every fallible operation in `conclave` returns `Result<T, EngineError>`.
//! The variants mirror the closed error taxonomy of the engine: tool
//! failures never appear here because they are always recovered locally and
//! serialized into a tool message (see [`crate::conclave::agent`]).

use crate::conclave::sanitize::sanitize;
use std::fmt;

/// The closed set of error categories a caller can match on without parsing
/// the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    MissingRequired,
    DuplicateId,
    NotFound,
    QuorumNotMet,
    InsufficientOptions,
    Cancelled,
    Timeout,
    BackendFailure,
    ToolFailure,
    MaxDelegations,
    InvalidTarget,
}

/// Where a timeout was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    Agent,
    Tool,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::Agent => write!(f, "agent"),
            TimeoutScope::Tool => write!(f, "tool"),
        }
    }
}

/// The single error type returned by every public fallible operation.
///
/// `Display` output is always pre-sanitized (see
/// [`crate::conclave::sanitize`]) so a leaked credential in a backend error
/// message never reaches a log line or a trace dump.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing required field: {0}")]
    MissingRequired(String),

    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("quorum not met: {active} active voters, need at least {required}")]
    QuorumNotMet { active: usize, required: usize },

    #[error("insufficient options: need at least 2, got {0}")]
    InsufficientOptions(usize),

    #[error("cancelled")]
    Cancelled,

    #[error("{scope} timed out after {millis}ms")]
    Timeout { scope: TimeoutScope, millis: u64 },

    #[error("backend failure: {0}")]
    BackendFailure(String),

    #[error("tool failure: {0}")]
    ToolFailure(String),

    #[error("exceeded max delegations ({0})")]
    MaxDelegations(usize),

    #[error("invalid handoff target: {0}")]
    InvalidTarget(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::MissingRequired(_) => ErrorKind::MissingRequired,
            EngineError::DuplicateId(_) => ErrorKind::DuplicateId,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::QuorumNotMet { .. } => ErrorKind::QuorumNotMet,
            EngineError::InsufficientOptions(_) => ErrorKind::InsufficientOptions,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::BackendFailure(_) => ErrorKind::BackendFailure,
            EngineError::ToolFailure(_) => ErrorKind::ToolFailure,
            EngineError::MaxDelegations(_) => ErrorKind::MaxDelegations,
            EngineError::InvalidTarget(_) => ErrorKind::InvalidTarget,
        }
    }

    /// Render a sanitized display string, suitable for logs and trace dumps.
    pub fn sanitized_message(&self) -> String {
        sanitize(&self.to_string())
    }

    pub fn backend_failure(err: impl std::error::Error) -> Self {
        EngineError::BackendFailure(sanitize(&err.to_string()))
    }
}
