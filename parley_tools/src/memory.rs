//! Long-term memory exposed to the model as ordinary tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Tool, ToolDescriptor, schema_object};

const DEFAULT_CATEGORY: &str = "general";

/// A long-term knowledge store.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<String>;
    async fn store(&self, content: &str, category: &str) -> anyhow::Result<()>;
}

/// Build the `memory_search` and `memory_store` tools backed by `provider`.
#[must_use]
pub fn memory_tools(provider: Arc<dyn MemoryProvider>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::from_tool(Arc::new(MemorySearchTool {
            provider: Arc::clone(&provider),
        })),
        ToolDescriptor::from_tool(Arc::new(MemoryStoreTool { provider })),
    ]
}

struct MemorySearchTool {
    provider: Arc<dyn MemoryProvider>,
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &'static str {
        "memory_search"
    }

    fn description(&self) -> &'static str {
        "Search long-term memory for facts stored in earlier conversations."
    }

    fn parameters(&self) -> serde_json::Value {
        schema_object(
            json!({
                "query": {
                    "type": "string",
                    "description": "What to look for"
                }
            }),
            &["query"],
        )
    }

    async fn execute(&self, input: serde_json::Value) -> anyhow::Result<String> {
        let query = input["query"].as_str().unwrap_or_default();
        self.provider.search(query).await
    }
}

struct MemoryStoreTool {
    provider: Arc<dyn MemoryProvider>,
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &'static str {
        "memory_store"
    }

    fn description(&self) -> &'static str {
        "Remember a fact for future conversations."
    }

    fn parameters(&self) -> serde_json::Value {
        schema_object(
            json!({
                "content": {
                    "type": "string",
                    "description": "The fact to remember"
                },
                "category": {
                    "type": "string",
                    "description": "Optional grouping such as 'preference' or 'profile'"
                }
            }),
            &["content"],
        )
    }

    async fn execute(&self, input: serde_json::Value) -> anyhow::Result<String> {
        let content = input["content"].as_str().unwrap_or_default();
        let category = input["category"].as_str().unwrap_or(DEFAULT_CATEGORY);
        self.provider.store(content, category).await?;
        Ok(format!("Stored in {category}."))
    }
}

/// Process-local memory provider with word-overlap search.
#[derive(Default)]
pub struct InMemoryMemory {
    entries: RwLock<Vec<(String, String)>>,
}

impl InMemoryMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryProvider for InMemoryMemory {
    async fn search(&self, query: &str) -> anyhow::Result<String> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let entries = self.entries.read().await;
        let hits: Vec<String> = entries
            .iter()
            .filter(|(_, content)| {
                let content = content.to_lowercase();
                words.iter().any(|w| content.contains(w.as_str()))
            })
            .map(|(category, content)| format!("- [{category}] {content}"))
            .collect();

        debug!("Memory search '{query}' matched {} entries", hits.len());
        if hits.is_empty() {
            Ok("No relevant memories found.".to_string())
        } else {
            Ok(hits.join("\n"))
        }
    }

    async fn store(&self, content: &str, category: &str) -> anyhow::Result<()> {
        if content.trim().is_empty() {
            anyhow::bail!("refusing to store empty memory");
        }
        self.entries
            .write()
            .await
            .push((category.to_string(), content.to_string()));
        Ok(())
    }
}
