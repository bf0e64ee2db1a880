use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{CompletionBackend, CompletionOptions, CompletionRequest, ContextMessage};
use tracing::debug;

use crate::{GuardContext, Guardrail, GuardrailResult, Stage};

const JUDGE_PROMPT: &str = "You are a content safety classifier. Read the message and answer with \
exactly one line: `SAFE` if it is acceptable, or `UNSAFE: <short reason>` if it is harmful, \
abusive, or asks for dangerous instructions.";

/// Secondary-model safety check.
///
/// Asks a completion backend for a verdict. An `UNSAFE` answer blocks, `SAFE`
/// passes, anything else is reported as a warning. Backend failures surface
/// as errors, which the pipeline treats as a pass.
pub struct ModelJudge {
    backend: Arc<dyn CompletionBackend>,
    options: CompletionOptions,
    instructions: String,
}

impl ModelJudge {
    #[must_use]
    pub fn new(backend: Arc<dyn CompletionBackend>, options: CompletionOptions) -> Self {
        Self {
            backend,
            options,
            instructions: JUDGE_PROMPT.to_string(),
        }
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }
}

#[async_trait]
impl Guardrail for ModelJudge {
    fn name(&self) -> &'static str {
        "model_judge"
    }

    async fn check(&self, content: &str, context: &GuardContext) -> anyhow::Result<GuardrailResult> {
        let subject = match context.stage {
            Stage::Input => "User message",
            Stage::Output => "Assistant reply",
        };
        let request = CompletionRequest {
            system_prompt: Some(self.instructions.clone()),
            messages: vec![ContextMessage::user(format!("{subject}:\n{content}"))],
            tools: Vec::new(),
            options: self.options.clone(),
        };
        let response = self.backend.complete(&request).await?;
        let verdict = response.text.unwrap_or_default();
        let verdict = verdict.trim();
        debug!(conversation = %context.conversation_id, "Judge verdict: {verdict}");

        let upper = verdict.to_ascii_uppercase();
        Ok(if upper.starts_with("UNSAFE") {
            let reason = verdict
                .split_once(':')
                .map_or("flagged by safety model", |(_, r)| r.trim());
            GuardrailResult::block(reason)
        } else if upper.starts_with("SAFE") {
            GuardrailResult::pass()
        } else {
            GuardrailResult::warn(format!("unclear safety verdict: {verdict}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GuardrailAction;
    use parley_core::CompletionResponse;

    struct Verdict(&'static str);

    #[async_trait]
    impl CompletionBackend for Verdict {
        async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
            assert!(request.tools.is_empty());
            Ok(CompletionResponse::text(self.0))
        }
    }

    async fn judge(verdict: &'static str) -> GuardrailResult {
        let judge = ModelJudge::new(Arc::new(Verdict(verdict)), CompletionOptions::default());
        judge
            .check("some text", &GuardContext::new("c", Stage::Output))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unsafe_verdict_blocks_with_reason() {
        let result = judge("UNSAFE: weapons instructions").await;
        assert_eq!(result.action, GuardrailAction::Block);
        assert_eq!(result.reason.as_deref(), Some("weapons instructions"));
    }

    #[tokio::test]
    async fn safe_verdict_passes() {
        assert_eq!(judge("SAFE").await.action, GuardrailAction::Pass);
    }

    #[tokio::test]
    async fn unclear_verdict_warns() {
        assert_eq!(judge("maybe?").await.action, GuardrailAction::Warn);
    }
}
