use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailAction {
    Pass,
    Modify,
    Block,
    Warn,
}

/// What a filter decided about a piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub action: GuardrailAction,
    pub content: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GuardrailResult {
    fn new(action: GuardrailAction, content: Option<String>, reason: Option<String>) -> Self {
        Self {
            action,
            content,
            reason,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn pass() -> Self {
        Self::new(GuardrailAction::Pass, None, None)
    }

    pub fn modify(content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            GuardrailAction::Modify,
            Some(content.into()),
            Some(reason.into()),
        )
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self::new(GuardrailAction::Block, None, Some(reason.into()))
    }

    pub fn warn(reason: impl Into<String>) -> Self {
        Self::new(GuardrailAction::Warn, None, Some(reason.into()))
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Where and for whom a check runs.
#[derive(Debug, Clone)]
pub struct GuardContext {
    pub conversation_id: String,
    pub sender: Option<String>,
    pub stage: Stage,
}

impl GuardContext {
    pub fn new(conversation_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender: None,
            stage,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}
