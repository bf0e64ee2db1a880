use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Invalid parameter schema for {name}: {reason}")]
    InvalidSchema { name: String, reason: String },
}

impl ToolError {
    /// Stable tag surfaced to the model inside tool results.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::Timeout(_) => "timeout",
            Self::Duplicate(_) => "duplicate_tool",
            Self::InvalidSchema { .. } => "invalid_schema",
        }
    }

    /// Text placed in the `ToolResult` message when an invocation fails.
    #[must_use]
    pub fn to_tool_content(&self) -> String {
        format!("Error [{}]: {self}", self.kind())
    }
}
