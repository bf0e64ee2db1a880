//! Static strategy pattern for CLI commands.
//!
//! Each command is a separate strategy type with its own input, dispatched
//! statically from `main`.

use std::sync::Arc;

use parley_config::Config;
use parley_conversation::ConversationEngine;
use parley_core::CompletionBackend;
use parley_providers::ChatCompletionsProvider;
use parley_tools::{InMemoryMemory, ToolRegistry, current_time_tool, memory_tools};
use tracing::info;

mod chat;
mod init;
mod version;

pub use chat::{ChatInput, ChatStrategy};
pub use init::InitStrategy;
pub use version::VersionStrategy;

/// Core trait defining the contract for all command strategies.
pub trait CommandStrategy: Send + Sync + 'static {
    /// The input type this strategy accepts.
    type Input;

    /// Execute the command with the given input.
    async fn execute(&self, input: Self::Input) -> anyhow::Result<()>;
}

/// Built-in tools: the clock plus session-local memory.
fn default_tools() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(current_time_tool())?;
    for tool in memory_tools(Arc::new(InMemoryMemory::new())) {
        registry.register(tool)?;
    }
    Ok(registry)
}

/// Load the config and assemble an engine around the configured provider.
fn build_engine(model: Option<String>) -> anyhow::Result<ConversationEngine> {
    let mut config = Config::load()?;
    if config.provider.api_key.is_empty() {
        anyhow::bail!("No API key configured. Edit the config file created by 'parley init'.");
    }
    if let Some(model) = model {
        config.agent.model = model;
    }

    let backend: Arc<dyn CompletionBackend> = Arc::new(
        ChatCompletionsProvider::new(config.provider.api_key.clone())
            .with_base_url(config.provider.base_url.clone()),
    );
    let engine_config = config.engine_config();
    let guardrails = config
        .guardrails
        .pipeline(Arc::clone(&backend), &engine_config.completion)?;

    info!(
        "Engine: model={}, strategy={:?}, max_iterations={}, guardrails={}",
        engine_config.completion.model,
        engine_config.context_strategy,
        engine_config.max_iterations,
        guardrails.len()
    );

    Ok(ConversationEngine::new(backend, engine_config)
        .with_tools(default_tools()?)
        .with_guardrails(guardrails))
}
