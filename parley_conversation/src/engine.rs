//! The conversation engine: guardrails, the bounded tool-call loop and the
//! lifecycle, applied to one inbound event at a time.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parley_core::{
    CompletionBackend, CompletionOptions, CompletionRequest, CompletionResponse, ContextMessage,
    InboundEvent, OutboundEvent, OutboundKind, retry_with_backoff,
};
use parley_guardrails::{GuardContext, GuardrailOutcome, GuardrailPipeline, GuardrailWarning, Stage};
use parley_tools::{BlockingPool, ToolInvoker, ToolRegistry};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{LifecycleConfig, LifecycleManager, TerminationCallback};
use crate::pairs::{drop_orphan_results, validate_tool_pairs};
use crate::reducer::{ContextReducer, ContextStrategy};
use crate::store::ContextStore;
use crate::{Conversation, TerminationReason};

/// User-visible texts the engine emits on its own behalf.
#[derive(Debug, Clone)]
pub struct EngineMessages {
    /// Substituted for a reply blocked by an output guardrail.
    pub safe_output: String,
    /// Emitted when the tool-call loop hits `max_iterations`.
    pub tools_exhausted: String,
    pub input_rejected: String,
    pub conversation_ended: String,
    pub timeout: String,
    pub error: String,
}

impl Default for EngineMessages {
    fn default() -> Self {
        Self {
            safe_output: "I'm sorry, I can't provide that response.".to_string(),
            tools_exhausted:
                "I wasn't able to finish this request within the allowed number of tool calls."
                    .to_string(),
            input_rejected: "Your message could not be processed.".to_string(),
            conversation_ended: "This conversation has ended.".to_string(),
            timeout: "The request took too long to complete. Please try again.".to_string(),
            error: "Sorry, something went wrong and this conversation had to end.".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on completion calls per inbound event.
    pub max_iterations: usize,
    pub system_prompt: Option<String>,
    pub completion: CompletionOptions,
    pub context_strategy: ContextStrategy,
    pub termination_markers: Vec<String>,
    pub max_interactions: Option<u32>,
    pub completion_timeout: Duration,
    /// Delay before each retry of a failed completion call.
    pub completion_retry_delays: Vec<Duration>,
    pub tool_timeout: Duration,
    pub blocking_workers: usize,
    /// Remove terminated conversations so the next event starts afresh.
    pub evict_terminated: bool,
    pub callback_timeout: Duration,
    /// How long an idle `serve` worker waits before checking whether its
    /// conversation is still in the store.
    pub worker_idle_timeout: Duration,
    pub messages: EngineMessages,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            system_prompt: None,
            completion: CompletionOptions::default(),
            context_strategy: ContextStrategy::default(),
            termination_markers: Vec::new(),
            max_interactions: None,
            completion_timeout: Duration::from_secs(120),
            completion_retry_delays: vec![Duration::from_secs(1), Duration::from_secs(2)],
            tool_timeout: Duration::from_secs(30),
            blocking_workers: 4,
            evict_terminated: false,
            callback_timeout: Duration::from_secs(5),
            worker_idle_timeout: Duration::from_secs(300),
            messages: EngineMessages::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_context_strategy(mut self, strategy: ContextStrategy) -> Self {
        self.context_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_termination_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.termination_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    #[must_use]
    pub const fn with_max_interactions(mut self, max_interactions: Option<u32>) -> Self {
        self.max_interactions = max_interactions;
        self
    }

    fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            termination_markers: self.termination_markers.clone(),
            callback_timeout: self.callback_timeout,
        }
    }
}

/// Failures that abort processing of one inbound event.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Completion timed out after {}ms", .0.as_millis())]
    CompletionTimeout(Duration),

    #[error("Completion backend error: {0:#}")]
    Backend(anyhow::Error),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Whether the conversation must be terminated.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::CompletionTimeout(_))
    }
}

/// Result of the tool-call loop for one event.
struct LoopOutcome {
    reply: String,
    tool_rounds: usize,
    exhausted: bool,
}

pub struct ConversationEngine {
    backend: Arc<dyn CompletionBackend>,
    config: EngineConfig,
    store: ContextStore,
    reducer: Arc<dyn ContextReducer>,
    invoker: ToolInvoker,
    guardrails: GuardrailPipeline,
    lifecycle: LifecycleManager,
}

impl ConversationEngine {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: EngineConfig) -> Self {
        let invoker = ToolInvoker::new(
            Arc::new(ToolRegistry::new()),
            BlockingPool::new(config.blocking_workers),
            config.tool_timeout,
        );
        Self {
            backend,
            reducer: Arc::new(config.context_strategy.clone()),
            store: ContextStore::new(),
            invoker,
            guardrails: GuardrailPipeline::new(),
            lifecycle: LifecycleManager::new(config.lifecycle()),
            config,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        info!("Engine tools: {:?}", registry.list());
        self.invoker = ToolInvoker::new(
            Arc::new(registry),
            BlockingPool::new(self.config.blocking_workers),
            self.config.tool_timeout,
        );
        self
    }

    #[must_use]
    pub fn with_guardrails(mut self, guardrails: GuardrailPipeline) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// Replace the reducer built from `context_strategy`.
    #[must_use]
    pub fn with_reducer(mut self, reducer: Arc<dyn ContextReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    #[must_use]
    pub fn with_termination_callback(mut self, callback: Arc<dyn TerminationCallback>) -> Self {
        self.lifecycle = self.lifecycle.with_callback(callback);
        self
    }

    /// Share an existing store instead of the engine's own.
    #[must_use]
    pub fn with_store(mut self, store: ContextStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Registered guardrails, e.g. to toggle a filter at runtime.
    #[must_use]
    pub const fn guardrails(&self) -> &GuardrailPipeline {
        &self.guardrails
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolInvoker {
        &self.invoker
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Copy of a conversation's current state.
    pub async fn snapshot(&self, conversation_id: &str) -> Option<Conversation> {
        let handle = self.store.get(conversation_id)?;
        let conversation = handle.lock().await;
        Some(conversation.clone())
    }

    /// Force a conversation back to a fresh active state.
    ///
    /// Returns `false` when the id is unknown.
    pub async fn reset(&self, conversation_id: &str, clear_history: bool) -> bool {
        let Some(handle) = self.store.get(conversation_id) else {
            return false;
        };
        let reason = {
            let mut conversation = handle.lock().await;
            self.lifecycle.manual_reset(&mut conversation, clear_history)
        };
        if let Some(reason) = reason {
            self.lifecycle.notify(conversation_id, reason).await;
        }
        true
    }

    /// Process one inbound event and return the events to send back.
    pub async fn handle(&self, event: InboundEvent) -> Vec<OutboundEvent> {
        let id = event.conversation_id.clone();
        let handle = self.store.get_or_create(&id, || {
            Conversation::new(
                id.as_str(),
                self.config.system_prompt.clone(),
                self.config.max_interactions,
            )
        });
        let mut conversation = handle.lock().await;

        if let Some(reason) = conversation.termination_reason() {
            debug!(conversation = %id, "Rejecting event for ended conversation ({reason})");
            return vec![
                self.outbound(&event, OutboundKind::Rejection, &self.config.messages.conversation_ended)
                    .with_metadata("termination_reason", reason.as_str()),
            ];
        }

        let input_context = GuardContext::new(id.as_str(), Stage::Input).with_sender(event.sender.as_str());
        let content = match self.guardrails.apply(Stage::Input, &event.content, &input_context).await {
            GuardrailOutcome::Allowed { content, warnings } => {
                log_warnings(&id, Stage::Input, &warnings);
                content
            }
            GuardrailOutcome::Blocked { filter, reason } => {
                info!(conversation = %id, filter = %filter, "Input blocked: {reason}");
                return vec![
                    self.outbound(&event, OutboundKind::Rejection, &self.config.messages.input_rejected)
                        .with_metadata("guardrail", filter),
                ];
            }
        };

        let checkpoint = conversation.messages.len();
        conversation
            .messages
            .push(ContextMessage::user(content).with_sender(event.sender.as_str()));
        conversation.touch();

        let outcome = match self.run_loop(&mut conversation).await {
            Ok(outcome) => outcome,
            Err(err) => {
                conversation.messages.truncate(checkpoint);
                if !err.is_fatal() {
                    warn!(conversation = %id, "Event aborted: {err}");
                    return vec![self.outbound(&event, OutboundKind::Error, &self.config.messages.timeout)];
                }
                error!(conversation = %id, "Conversation failed: {err}");
                let reason = self.lifecycle.fail(&mut conversation);
                drop(conversation);
                self.finish(&id, reason).await;
                return vec![
                    self.outbound(&event, OutboundKind::Error, &self.config.messages.error)
                        .with_metadata("termination_reason", reason.as_str()),
                ];
            }
        };

        let output_context = GuardContext::new(id.as_str(), Stage::Output).with_sender(event.sender.as_str());
        let reply = match self.guardrails.apply(Stage::Output, &outcome.reply, &output_context).await {
            GuardrailOutcome::Allowed { content, warnings } => {
                log_warnings(&id, Stage::Output, &warnings);
                content
            }
            GuardrailOutcome::Blocked { filter, reason } => {
                info!(conversation = %id, filter = %filter, "Output blocked: {reason}");
                self.config.messages.safe_output.clone()
            }
        };

        let round = self.lifecycle.complete_round(&mut conversation, &reply);
        conversation.messages.push(ContextMessage::assistant(round.text.as_str()));
        let interactions = conversation.interaction_count;
        drop(conversation);

        let mut reply_event = self
            .outbound(&event, OutboundKind::Reply, &round.text)
            .with_metadata("tool_rounds", outcome.tool_rounds)
            .with_metadata("interaction_count", interactions);
        if outcome.exhausted {
            reply_event = reply_event.with_metadata("tools_exhausted", true);
        }
        if let Some(reason) = round.terminated {
            reply_event = reply_event.with_metadata("termination_reason", reason.as_str());
            self.finish(&id, reason).await;
        }
        vec![reply_event]
    }

    /// The bounded completion / tool-call loop.
    ///
    /// Tool rounds are committed to the conversation only after every call
    /// in the round has resolved.
    async fn run_loop(&self, conversation: &mut Conversation) -> Result<LoopOutcome, EngineError> {
        let tools = self.invoker.specs();

        for iteration in 0..self.config.max_iterations {
            let window = drop_orphan_results(self.reducer.reduce(&conversation.messages));
            debug!(
                conversation = %conversation.id,
                iteration,
                history = conversation.messages.len(),
                window = window.len(),
                "Requesting completion"
            );
            let request = CompletionRequest {
                system_prompt: conversation.system_prompt.clone(),
                messages: window,
                tools: tools.clone(),
                options: self.config.completion.clone(),
            };

            let response = self.complete(&request).await?;
            if response.tool_calls.is_empty() {
                return Ok(LoopOutcome {
                    reply: response.text.unwrap_or_default(),
                    tool_rounds: iteration,
                    exhausted: false,
                });
            }

            info!(
                conversation = %conversation.id,
                iteration,
                "Invoking {} tool call(s)",
                response.tool_calls.len()
            );
            let results = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|call| self.invoker.invoke_call(call)),
            )
            .await;

            let mut round = Vec::with_capacity(results.len() + 1);
            round.push(ContextMessage::assistant_tool_calls(response.text, response.tool_calls));
            round.extend(results);
            validate_tool_pairs(&round).map_err(EngineError::Invariant)?;
            conversation.messages.extend(round);
        }

        warn!(
            conversation = %conversation.id,
            "Tool-call budget of {} iterations exhausted",
            self.config.max_iterations
        );
        Ok(LoopOutcome {
            reply: self.config.messages.tools_exhausted.clone(),
            tool_rounds: self.config.max_iterations,
            exhausted: true,
        })
    }

    /// One completion call with timeout; backend errors are retried.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, EngineError> {
        let budget = self.config.completion_timeout;
        let backend = self.backend.as_ref();
        retry_with_backoff(
            || async move {
                match timeout(budget, backend.complete(request)).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(err)) => Err(EngineError::Backend(err)),
                    Err(_) => Err(EngineError::CompletionTimeout(budget)),
                }
            },
            &self.config.completion_retry_delays,
            |err| matches!(err, EngineError::Backend(_)),
        )
        .await
    }

    /// Post-termination work, run without holding the conversation lock.
    async fn finish(&self, conversation_id: &str, reason: TerminationReason) {
        self.lifecycle.notify(conversation_id, reason).await;
        if self.config.evict_terminated {
            self.store.remove(conversation_id);
        }
    }

    fn outbound(&self, event: &InboundEvent, kind: OutboundKind, content: &str) -> OutboundEvent {
        OutboundEvent::new(
            event.conversation_id.as_str(),
            event.sender.as_str(),
            kind,
            content,
        )
        .with_metadata("backend", self.backend.name())
    }
}

fn log_warnings(conversation_id: &str, stage: Stage, warnings: &[GuardrailWarning]) {
    for warning in warnings {
        warn!(
            conversation = conversation_id,
            filter = %warning.filter,
            "{stage:?} guardrail warning: {}",
            warning.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl CompletionBackend for Echo {
        async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
            let last = request
                .messages
                .last()
                .map(ContextMessage::content_str)
                .unwrap_or_default();
            Ok(CompletionResponse::text(format!("echo: {last}")))
        }
    }

    #[test]
    fn defaults_match_documented_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.completion_retry_delays.len(), 2);
        assert_eq!(config.completion_timeout, Duration::from_secs(120));
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
    }

    #[test]
    fn only_timeouts_are_recoverable() {
        assert!(!EngineError::CompletionTimeout(Duration::from_secs(1)).is_fatal());
        assert!(EngineError::Backend(anyhow::anyhow!("down")).is_fatal());
        assert!(EngineError::Invariant("orphan".into()).is_fatal());
    }

    #[tokio::test]
    async fn reply_is_appended_to_history() {
        let engine = ConversationEngine::new(Arc::new(Echo), EngineConfig::default());
        let out = engine.handle(InboundEvent::new("c1", "ann", "hello")).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, OutboundKind::Reply);
        assert_eq!(out[0].content, "echo: hello");
        assert_eq!(out[0].recipients, vec!["ann".to_string()]);

        let conversation = engine.snapshot("c1").await.unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].sender.as_deref(), Some("ann"));
        assert_eq!(conversation.interaction_count, 1);
    }

    #[tokio::test]
    async fn reset_of_unknown_conversation_is_noop() {
        let engine = ConversationEngine::new(Arc::new(Echo), EngineConfig::default());
        assert!(!engine.reset("missing", false).await);
    }
}
