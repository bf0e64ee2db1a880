use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::ToolSpec;
use serde_json::json;

/// An asynchronous tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> anyhow::Result<String>;
}

/// Synchronous handler body; runs on the blocking pool.
pub type BlockingFn = dyn Fn(serde_json::Value) -> anyhow::Result<String> + Send + Sync;

#[derive(Clone)]
pub enum ToolHandler {
    Async(Arc<dyn Tool>),
    Blocking(Arc<BlockingFn>),
}

impl fmt::Debug for ToolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(tool) => write!(f, "Async({})", tool.name()),
            Self::Blocking(_) => f.write_str("Blocking"),
        }
    }
}

/// A named tool with its argument schema and handler.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    pub handler: ToolHandler,
}

impl ToolDescriptor {
    #[must_use]
    pub fn from_tool(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameter_schema: tool.parameters(),
            handler: ToolHandler::Async(tool),
        }
    }

    pub fn blocking<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
            handler: ToolHandler::Blocking(Arc::new(handler)),
        }
    }

    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }
}

/// Helper to build a JSON object schema.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn schema_object(properties: serde_json::Value, required: &[&str]) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
