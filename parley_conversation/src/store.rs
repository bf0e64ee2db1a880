use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::Conversation;

pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// Concurrent map from conversation id to conversation.
///
/// The map itself is shared; each conversation sits behind its own lock so
/// only the task processing that conversation touches its messages.
#[derive(Clone, Default)]
pub struct ContextStore {
    conversations: Arc<DashMap<String, ConversationHandle>>,
}

impl ContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<F>(&self, id: &str, init: F) -> ConversationHandle
    where
        F: FnOnce() -> Conversation,
    {
        let entry = self
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation: {id}");
                Arc::new(Mutex::new(init()))
            });
        Arc::clone(entry.value())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ConversationHandle> {
        self.conversations.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.conversations.remove(id).is_some();
        if removed {
            info!("Evicted conversation: {id}");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.conversations.iter().map(|e| e.key().clone()).collect()
    }

    /// Evict every terminated conversation. Returns the number removed.
    pub async fn evict_terminated(&self) -> usize {
        self.evict_where(|conv| !conv.is_active()).await
    }

    /// Evict conversations with no activity for longer than `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        self.evict_where(|conv| now.signed_duration_since(conv.last_activity_at) > max_idle)
            .await
    }

    async fn evict_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&Conversation) -> bool,
    {
        let snapshot: Vec<(String, ConversationHandle)> = self
            .conversations
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut evicted = 0;
        for (id, handle) in snapshot {
            let stale = predicate(&*handle.lock().await);
            if stale && self.remove(&id) {
                evicted += 1;
            }
        }
        evicted
    }
}
