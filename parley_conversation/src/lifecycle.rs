//! Conversation lifecycle: termination detection, reset and cleanup callbacks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{Conversation, ConversationState, TerminationReason};

/// Invoked once when a conversation ends.
#[async_trait]
pub trait TerminationCallback: Send + Sync {
    async fn on_terminate(&self, conversation_id: &str, reason: TerminationReason);
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub termination_markers: Vec<String>,
    pub callback_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            termination_markers: Vec::new(),
            callback_timeout: Duration::from_secs(5),
        }
    }
}

/// Reply text after lifecycle processing, plus the termination it caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub text: String,
    pub terminated: Option<TerminationReason>,
}

pub struct LifecycleManager {
    config: LifecycleConfig,
    callback: Option<Arc<dyn TerminationCallback>>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            callback: None,
        }
    }

    #[must_use]
    pub fn with_callback(mut self, callback: Arc<dyn TerminationCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Remove every configured marker from `reply`.
    ///
    /// Returns the cleaned text and whether any marker was present.
    #[must_use]
    pub fn strip_markers(&self, reply: &str) -> (String, bool) {
        let mut text = reply.to_string();
        let mut found = false;
        for marker in self.config.termination_markers.iter().filter(|m| !m.is_empty()) {
            if text.contains(marker.as_str()) {
                text = text.replace(marker.as_str(), "");
                found = true;
            }
        }
        if found {
            text = text.trim().to_string();
        }
        (text, found)
    }

    /// Record a completed round and decide whether the conversation ends.
    ///
    /// Checked in order: termination marker in the reply, then the
    /// interaction limit.
    pub fn complete_round(&self, conversation: &mut Conversation, reply: &str) -> RoundOutcome {
        let (text, marker_found) = self.strip_markers(reply);
        conversation.interaction_count += 1;
        conversation.touch();

        let limit_reached = conversation
            .max_interactions
            .is_some_and(|max| conversation.interaction_count >= max);

        let terminated = if marker_found {
            Some(TerminationReason::TerminationMarkerFound)
        } else if limit_reached {
            Some(TerminationReason::MaxInteractionsReached)
        } else {
            None
        };

        if let Some(reason) = terminated {
            info!(
                conversation = %conversation.id,
                interactions = conversation.interaction_count,
                "Conversation terminated: {reason}"
            );
            conversation.state = ConversationState::Terminated(reason);
        }

        RoundOutcome { text, terminated }
    }

    /// Mark the conversation as ended by an unrecoverable error.
    pub fn fail(&self, conversation: &mut Conversation) -> TerminationReason {
        warn!(conversation = %conversation.id, "Conversation terminated after error");
        conversation.state = ConversationState::Terminated(TerminationReason::Error);
        conversation.touch();
        TerminationReason::Error
    }

    /// Return the conversation to a fresh active state.
    ///
    /// History is kept unless `clear_history` is set. When the conversation
    /// was still active, its dialogue is closed with `ManualReset`; the
    /// returned reason must then be passed to [`Self::notify`].
    pub fn manual_reset(
        &self,
        conversation: &mut Conversation,
        clear_history: bool,
    ) -> Option<TerminationReason> {
        let was_active = conversation.is_active();
        conversation.state = ConversationState::Active;
        conversation.interaction_count = 0;
        if clear_history {
            conversation.messages.clear();
        }
        conversation.touch();
        info!(
            conversation = %conversation.id,
            clear_history,
            "Conversation reset"
        );
        was_active.then_some(TerminationReason::ManualReset)
    }

    /// Run the termination callback, bounded by the configured timeout.
    pub async fn notify(&self, conversation_id: &str, reason: TerminationReason) {
        let Some(callback) = &self.callback else {
            return;
        };
        if timeout(
            self.config.callback_timeout,
            callback.on_terminate(conversation_id, reason),
        )
        .await
        .is_err()
        {
            warn!(
                conversation = conversation_id,
                "Termination callback timed out after {}ms",
                self.config.callback_timeout.as_millis()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, TerminationReason)>>);

    #[async_trait]
    impl TerminationCallback for Recorder {
        async fn on_terminate(&self, conversation_id: &str, reason: TerminationReason) {
            self.0.lock().await.push((conversation_id.to_string(), reason));
        }
    }

    struct Stuck;

    #[async_trait]
    impl TerminationCallback for Stuck {
        async fn on_terminate(&self, _: &str, _: TerminationReason) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    fn manager(markers: &[&str]) -> LifecycleManager {
        LifecycleManager::new(LifecycleConfig {
            termination_markers: markers.iter().map(ToString::to_string).collect(),
            callback_timeout: Duration::from_millis(50),
        })
    }

    #[test]
    fn marker_is_stripped_and_terminates() {
        let lifecycle = manager(&["<DONE>"]);
        let mut conv = Conversation::new("c", None, None);
        let outcome = lifecycle.complete_round(&mut conv, "Goodbye! <DONE>");
        assert_eq!(outcome.text, "Goodbye!");
        assert_eq!(
            outcome.terminated,
            Some(TerminationReason::TerminationMarkerFound)
        );
        assert_eq!(
            conv.state,
            ConversationState::Terminated(TerminationReason::TerminationMarkerFound)
        );
    }

    #[test]
    fn marker_wins_over_interaction_limit() {
        let lifecycle = manager(&["<DONE>"]);
        let mut conv = Conversation::new("c", None, Some(1));
        let outcome = lifecycle.complete_round(&mut conv, "<DONE>");
        assert_eq!(
            outcome.terminated,
            Some(TerminationReason::TerminationMarkerFound)
        );
    }

    #[test]
    fn interaction_limit_terminates() {
        let lifecycle = manager(&[]);
        let mut conv = Conversation::new("c", None, Some(2));
        assert_eq!(lifecycle.complete_round(&mut conv, "one").terminated, None);
        assert_eq!(
            lifecycle.complete_round(&mut conv, "two").terminated,
            Some(TerminationReason::MaxInteractionsReached)
        );
        assert_eq!(conv.interaction_count, 2);
    }

    #[test]
    fn reset_reactivates_and_keeps_history() {
        let lifecycle = manager(&[]);
        let mut conv = Conversation::new("c", None, None);
        conv.messages.push(parley_core::ContextMessage::user("hi"));
        lifecycle.fail(&mut conv);

        assert_eq!(lifecycle.manual_reset(&mut conv, false), None);
        assert!(conv.is_active());
        assert_eq!(conv.interaction_count, 0);
        assert_eq!(conv.messages.len(), 1);

        assert_eq!(
            lifecycle.manual_reset(&mut conv, true),
            Some(TerminationReason::ManualReset)
        );
        assert!(conv.messages.is_empty());
    }

    #[tokio::test]
    async fn notify_calls_callback() {
        let recorder = Arc::new(Recorder::default());
        let lifecycle = manager(&[]).with_callback(recorder.clone());
        lifecycle.notify("c", TerminationReason::Error).await;
        assert_eq!(
            recorder.0.lock().await.as_slice(),
            [("c".to_string(), TerminationReason::Error)]
        );
    }

    #[tokio::test]
    async fn stuck_callback_is_bounded() {
        let lifecycle = manager(&[]).with_callback(Arc::new(Stuck));
        let started = std::time::Instant::now();
        lifecycle.notify("c", TerminationReason::Error).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
