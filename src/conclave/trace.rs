//! The uniform, step-based observability record every conductor produces.
//!
//! Grounded on the reference toolkit's `OrchestrationMessage`/`AgentEvent`
//! pairing: a step is opened when an agent call starts and closed with
//! either an output or a sanitized error, exactly mirroring the
//! before/after event pattern the reference implementation fires around
//! each agent call.

use crate::conclave::error::EngineError;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

/// One agent invocation within an ensemble run.
#[derive(Debug, Clone)]
pub struct Step {
    pub index: usize,
    pub agent_id: String,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: Option<chrono::Duration>,
    pub metadata: HashMap<String, JsonValue>,
    end_time: Option<DateTime<Utc>>,
}

impl Step {
    fn new(index: usize, agent_id: impl Into<String>, input: impl Into<String>) -> Self {
        Step {
            index,
            agent_id: agent_id.into(),
            input: input.into(),
            output: None,
            error: None,
            timestamp: Utc::now(),
            duration: None,
            metadata: HashMap::new(),
            end_time: None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.output.is_some() || self.error.is_some()
    }

    fn terminate(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration = Some(now - self.timestamp);
    }
}

/// The ordered record of all steps in one ensemble run.
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTrace {
    pub fn new() -> Self {
        ExecutionTrace {
            id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            steps: Vec::new(),
        }
    }

    /// Open a new step and return its index.
    pub fn start_step(&mut self, agent_id: impl Into<String>, input: impl Into<String>) -> usize {
        let index = self.steps.len();
        self.steps.push(Step::new(index, agent_id, input));
        index
    }

    pub fn complete_step(&mut self, index: usize, output: impl Into<String>) {
        if let Some(step) = self.steps.get_mut(index) {
            step.output = Some(output.into());
            step.terminate();
        }
    }

    pub fn fail_step(&mut self, index: usize, error: &EngineError) {
        if let Some(step) = self.steps.get_mut(index) {
            step.error = Some(error.sanitized_message());
            step.terminate();
        }
    }

    pub fn annotate_step(&mut self, index: usize, key: impl Into<String>, value: JsonValue) {
        if let Some(step) = self.steps.get_mut(index) {
            step.metadata.insert(key.into(), value);
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// `true` iff every started step has been terminated (has an output or
    /// an error).
    pub fn all_steps_terminated(&self) -> bool {
        self.steps.iter().all(Step::is_terminated)
    }
}
