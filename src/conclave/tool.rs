//! The tool contract: `{name, description, parameters, execute}`, plus a
//! registry agents use to look tools up by name.
//!
//! Grounded on the reference toolkit's `ToolProtocol`/`ToolRegistry` pair,
//! simplified to the plainer single-protocol model this engine needs: tools
//! are always local async closures, not routed through a pluggable wire
//! protocol.

use crate::conclave::error::EngineError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// A single callable tool exposed to an agent.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// A JSON Schema object describing the accepted `arguments` shape. See
    /// [`crate::conclave::json_schema`] for the validated subset.
    fn parameters(&self) -> &JsonValue;
    /// Execute the tool. Implementations should return `Err` for genuine
    /// tool failures; the agent loop serializes failures into a tool
    /// message rather than aborting the run.
    async fn execute(&self, arguments: JsonValue) -> Result<JsonValue, EngineError>;
}

/// A tool backed by a plain async closure, for quick registration without
/// defining a new type.
pub struct FunctionTool<F> {
    name: String,
    description: String,
    parameters: JsonValue,
    func: F,
}

impl<F> FunctionTool<F> {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: JsonValue,
        func: F,
    ) -> Self {
        FunctionTool {
            name: name.into(),
            description: description.into(),
            parameters,
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Tool for FunctionTool<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<JsonValue, EngineError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &JsonValue {
        &self.parameters
    }

    async fn execute(&self, arguments: JsonValue) -> Result<JsonValue, EngineError> {
        (self.func)(arguments).await
    }
}

/// A name-keyed collection of tools, owned by an [`Agent`](crate::conclave::agent::Agent).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, returning `Err` if a tool with the same name is
    /// already registered (tool names must be unique within an agent).
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        if self.tools.contains_key(tool.name()) {
            return Err(EngineError::DuplicateId(tool.name().to_string()));
        }
        self.tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }
}
