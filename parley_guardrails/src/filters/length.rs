use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{GuardContext, Guardrail, GuardrailResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthMode {
    Truncate,
    Block,
}

/// Caps content at `max_chars` characters.
pub struct LengthLimit {
    max_chars: usize,
    mode: LengthMode,
}

impl LengthLimit {
    #[must_use]
    pub const fn new(max_chars: usize, mode: LengthMode) -> Self {
        Self { max_chars, mode }
    }
}

#[async_trait]
impl Guardrail for LengthLimit {
    fn name(&self) -> &'static str {
        "length_limit"
    }

    async fn check(&self, content: &str, _context: &GuardContext) -> anyhow::Result<GuardrailResult> {
        let Some((cut, _)) = content.char_indices().nth(self.max_chars) else {
            return Ok(GuardrailResult::pass());
        };
        let reason = format!("content exceeds {} characters", self.max_chars);
        Ok(match self.mode {
            LengthMode::Truncate => GuardrailResult::modify(&content[..cut], reason),
            LengthMode::Block => GuardrailResult::block(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GuardrailAction, Stage};

    fn ctx() -> GuardContext {
        GuardContext::new("c", Stage::Input)
    }

    #[tokio::test]
    async fn truncates_on_char_boundary() {
        let filter = LengthLimit::new(3, LengthMode::Truncate);
        let result = filter.check("héllo", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Modify);
        assert_eq!(result.content.as_deref(), Some("hél"));
    }

    #[tokio::test]
    async fn blocks_in_block_mode() {
        let filter = LengthLimit::new(2, LengthMode::Block);
        let result = filter.check("abc", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Block);
    }

    #[tokio::test]
    async fn exact_length_passes() {
        let filter = LengthLimit::new(3, LengthMode::Block);
        let result = filter.check("abc", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Pass);
    }
}
