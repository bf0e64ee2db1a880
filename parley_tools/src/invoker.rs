use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_core::{ContextMessage, ToolCallRequest, ToolSpec};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::registry::RegisteredTool;
use crate::{BlockingPool, ToolError, ToolHandler, ToolRegistry};

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub duration_ms: u64,
}

/// Resolves, validates and executes tool calls.
///
/// Every failure mode comes back as a [`ToolError`]; [`ToolInvoker::invoke_call`]
/// folds it into an ordinary tool-result message.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    pool: BlockingPool,
    timeout: Duration,
}

impl ToolInvoker {
    #[must_use]
    pub const fn new(registry: Arc<ToolRegistry>, pool: BlockingPool, timeout: Duration) -> Self {
        Self {
            registry,
            pool,
            timeout,
        }
    }

    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn invoke(&self, name: &str, raw_arguments: &str) -> Result<ToolOutput, ToolError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let arguments = parse_arguments(tool, raw_arguments)?;

        let started = Instant::now();
        let result = match &tool.descriptor.handler {
            ToolHandler::Async(handler) => {
                // Own task, so a panicking handler surfaces as a join error.
                let handler = Arc::clone(handler);
                let mut job = tokio::spawn(async move { handler.execute(arguments).await });
                match timeout(self.timeout, &mut job).await {
                    Ok(Ok(res)) => res.map_err(|e| ToolError::ExecutionFailed(format!("{e:#}"))),
                    Ok(Err(e)) => Err(ToolError::ExecutionFailed(e.to_string())),
                    Err(_) => {
                        job.abort();
                        Err(ToolError::Timeout(self.timeout))
                    }
                }
            }
            ToolHandler::Blocking(handler) => {
                let handler = Arc::clone(handler);
                let job = self.pool.run(move || handler(arguments));
                match timeout(self.timeout, job).await {
                    Ok(Ok(res)) => res.map_err(|e| ToolError::ExecutionFailed(format!("{e:#}"))),
                    Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!("{e:#}"))),
                    Err(_) => Err(ToolError::Timeout(self.timeout)),
                }
            }
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(content) => {
                debug!(tool = name, duration_ms, bytes = content.len(), "Tool finished");
                Ok(ToolOutput {
                    content,
                    duration_ms,
                })
            }
            Err(e) => {
                warn!(tool = name, duration_ms, error = %e, "Tool failed");
                Err(e)
            }
        }
    }

    /// Invoke `call` and normalize the outcome into a tool-result message.
    pub async fn invoke_call(&self, call: &ToolCallRequest) -> ContextMessage {
        let content = match self.invoke(&call.name, &call.arguments).await {
            Ok(output) => output.content,
            Err(e) => e.to_tool_content(),
        };
        ContextMessage::tool_result(call.id.clone(), content)
    }
}

fn parse_arguments(tool: &RegisteredTool, raw: &str) -> Result<serde_json::Value, ToolError> {
    let raw = raw.trim();
    let arguments = if raw.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(raw)
            .map_err(|e| ToolError::InvalidArguments(format!("malformed JSON: {e}")))?
    };

    if let Err(errors) = tool.validator.validate(&arguments) {
        let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(ToolError::InvalidArguments(reasons.join("; ")));
    }
    Ok(arguments)
}
