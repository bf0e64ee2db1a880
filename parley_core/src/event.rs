//! Transport-facing events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Channel tag stamped on every outbound event produced by the engine, so a
/// transport carrying other traffic can route conversation replies apart.
pub const OUTBOUND_CHANNEL: &str = "conversation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundEvent {
    pub fn new(
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// Regular reply produced by a completed round.
    Reply,
    /// The inbound event was refused (input guardrail or ended conversation).
    Rejection,
    /// Processing failed; content is a user-safe apology.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub conversation_id: String,
    pub recipients: Vec<String>,
    pub kind: OutboundKind,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundEvent {
    pub fn new(
        conversation_id: impl Into<String>,
        recipient: impl Into<String>,
        kind: OutboundKind,
        content: impl Into<String>,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            "channel".to_string(),
            serde_json::Value::from(OUTBOUND_CHANNEL),
        );
        Self {
            conversation_id: conversation_id.into(),
            recipients: vec![recipient.into()],
            kind,
            content: content.into(),
            metadata,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_is_tagged_with_channel() {
        let event = OutboundEvent::new("c1", "bob", OutboundKind::Reply, "hello");
        assert_eq!(event.metadata["channel"], OUTBOUND_CHANNEL);
        assert_eq!(event.recipients, vec!["bob".to_string()]);
    }
}
