use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use crate::{GuardContext, Guardrail, GuardrailAction, GuardrailResult};

/// Several filters composed into one.
///
/// With `stop_on_block` (the default) the chain returns at the first Block;
/// otherwise every filter runs and all block reasons are reported together.
pub struct GuardrailChain {
    name: String,
    filters: Vec<Arc<dyn Guardrail>>,
    stop_on_block: bool,
}

impl GuardrailChain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
            stop_on_block: true,
        }
    }

    #[must_use]
    pub fn with(mut self, filter: Arc<dyn Guardrail>) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub const fn stop_on_block(mut self, stop: bool) -> Self {
        self.stop_on_block = stop;
        self
    }
}

#[async_trait]
impl Guardrail for GuardrailChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, content: &str, context: &GuardContext) -> anyhow::Result<GuardrailResult> {
        let mut current = content.to_string();
        let mut modified = false;
        let mut blocks = Vec::new();
        let mut warnings = Vec::new();

        for filter in &self.filters {
            let result = match filter.check(&current, context).await {
                Ok(result) => result,
                Err(e) => {
                    error!(chain = %self.name, filter = filter.name(), "Guardrail failed: {e:#}");
                    continue;
                }
            };
            match result.action {
                GuardrailAction::Pass => {}
                GuardrailAction::Modify => {
                    if let Some(next) = result.content {
                        current = next;
                        modified = true;
                    }
                }
                GuardrailAction::Block => {
                    let reason = result
                        .reason
                        .unwrap_or_else(|| format!("blocked by {}", filter.name()));
                    if self.stop_on_block {
                        return Ok(GuardrailResult::block(reason).with_metadata("filter", filter.name()));
                    }
                    blocks.push(reason);
                }
                GuardrailAction::Warn => {
                    warnings.push(result.reason.unwrap_or_else(|| filter.name().to_string()));
                }
            }
        }

        let result = if !blocks.is_empty() {
            GuardrailResult::block(blocks.join("; "))
        } else if modified {
            GuardrailResult::modify(current, format!("modified by {}", self.name))
        } else if !warnings.is_empty() {
            GuardrailResult::warn(warnings.join("; "))
        } else {
            return Ok(GuardrailResult::pass());
        };

        if warnings.is_empty() {
            Ok(result)
        } else {
            Ok(result.with_metadata("warnings", warnings))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeywordBlocklist, PatternRedactor, Stage};

    fn ctx() -> GuardContext {
        GuardContext::new("c", Stage::Input)
    }

    fn chain(stop_on_block: bool) -> GuardrailChain {
        GuardrailChain::new("composite")
            .with(Arc::new(KeywordBlocklist::new(["bomb"]).unwrap()))
            .with(Arc::new(KeywordBlocklist::new(["poison"]).unwrap()))
            .stop_on_block(stop_on_block)
    }

    #[tokio::test]
    async fn stops_on_first_block_by_default() {
        let result = chain(true).check("bomb and poison", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Block);
        assert!(result.reason.unwrap().contains("bomb"));
    }

    #[tokio::test]
    async fn collects_all_blocks_when_not_stopping() {
        let result = chain(false).check("bomb and poison", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Block);
        let reason = result.reason.unwrap();
        assert!(reason.contains("bomb"));
        assert!(reason.contains("poison"));
    }

    #[tokio::test]
    async fn modifications_flow_through_chain() {
        let chain = GuardrailChain::new("scrub")
            .with(Arc::new(PatternRedactor::new(&[r"\d{3}-\d{4}"]).unwrap()))
            .with(Arc::new(KeywordBlocklist::new(["redacted"]).unwrap()));
        // The blocklist sees the redacted text produced by the first filter.
        let result = chain.check("call 555-1234", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Block);
    }

    #[tokio::test]
    async fn clean_content_passes() {
        let result = chain(true).check("hello there", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Pass);
    }
}
