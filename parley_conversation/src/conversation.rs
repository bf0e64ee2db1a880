//! Per-conversation state.

use std::fmt;

use chrono::{DateTime, Utc};
use parley_core::{ContextMessage, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxInteractionsReached,
    TerminationMarkerFound,
    ManualReset,
    Error,
}

impl TerminationReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MaxInteractionsReached => "max_interactions_reached",
            Self::TerminationMarkerFound => "termination_marker_found",
            Self::ManualReset => "manual_reset",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Active,
    Terminated(TerminationReason),
}

/// An isolated dialogue keyed by the transport's thread/session id.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<ContextMessage>,
    pub system_prompt: Option<String>,
    pub state: ConversationState,
    pub interaction_count: u32,
    pub max_interactions: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, system_prompt: Option<String>, max_interactions: Option<u32>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            system_prompt,
            state: ConversationState::Active,
            interaction_count: 0,
            max_interactions,
            created_at: now,
            last_activity_at: now,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, ConversationState::Active)
    }

    #[must_use]
    pub const fn termination_reason(&self) -> Option<TerminationReason> {
        match self.state {
            ConversationState::Active => None,
            ConversationState::Terminated(reason) => Some(reason),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Get the last N messages from history.
    #[must_use]
    pub fn last_n_messages(&self, n: usize) -> &[ContextMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    #[must_use]
    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_conversation_is_active_and_empty() {
        let conv = Conversation::new("t-1", Some("Be brief.".into()), Some(3));
        assert!(conv.is_active());
        assert_eq!(conv.termination_reason(), None);
        assert_eq!(conv.interaction_count, 0);
        assert!(conv.messages.is_empty());
    }

    #[test]
    fn test_last_n_messages() {
        let mut conv = Conversation::new("t-1", None, None);
        for i in 0..10 {
            conv.messages.push(ContextMessage::user(format!("Message {i}")));
        }
        assert_eq!(conv.last_n_messages(3).len(), 3);
        assert_eq!(conv.last_n_messages(3)[0].content_str(), "Message 7");
        assert_eq!(conv.last_n_messages(100).len(), 10);
        assert_eq!(conv.last_n_messages(0).len(), 0);
        assert_eq!(conv.count_role(Role::User), 10);
    }

    #[test]
    fn reason_strings_are_snake_case() {
        assert_eq!(
            TerminationReason::MaxInteractionsReached.to_string(),
            "max_interactions_reached"
        );
        let json = serde_json::to_value(ConversationState::Terminated(TerminationReason::Error)).unwrap();
        assert_eq!(json, serde_json::json!({"terminated": "error"}));
    }
}
