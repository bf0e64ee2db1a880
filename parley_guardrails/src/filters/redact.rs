use async_trait::async_trait;
use regex::Regex;

use crate::{GuardContext, Guardrail, GuardrailResult};

const REDACTED: &str = "[REDACTED]";

const EMAIL: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const CARD_NUMBER: &str = r"\b(?:\d[ -]?){13,16}\b";

/// Replaces every match of the configured patterns with `[REDACTED]`.
pub struct PatternRedactor {
    patterns: Vec<Regex>,
}

impl PatternRedactor {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Email addresses and card-like digit runs.
    pub fn personal_data() -> Result<Self, regex::Error> {
        Self::new(&[EMAIL, CARD_NUMBER])
    }
}

#[async_trait]
impl Guardrail for PatternRedactor {
    fn name(&self) -> &'static str {
        "pattern_redactor"
    }

    async fn check(&self, content: &str, _context: &GuardContext) -> anyhow::Result<GuardrailResult> {
        let mut redacted = content.to_string();
        let mut hits = 0_usize;
        for pattern in &self.patterns {
            hits += pattern.find_iter(&redacted).count();
            redacted = pattern.replace_all(&redacted, REDACTED).into_owned();
        }
        if hits == 0 {
            return Ok(GuardrailResult::pass());
        }
        Ok(GuardrailResult::modify(redacted, format!("redacted {hits} match(es)"))
            .with_metadata("redactions", hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GuardrailAction, Stage};

    #[tokio::test]
    async fn redacts_personal_data() {
        let filter = PatternRedactor::personal_data().unwrap();
        let ctx = GuardContext::new("c", Stage::Output);
        let result = filter
            .check("mail bob@example.com, card 4111 1111 1111 1111", &ctx)
            .await
            .unwrap();
        assert_eq!(result.action, GuardrailAction::Modify);
        assert_eq!(
            result.content.as_deref(),
            Some("mail [REDACTED], card [REDACTED]")
        );
        assert_eq!(result.metadata["redactions"], 2);
    }

    #[tokio::test]
    async fn untouched_content_passes() {
        let filter = PatternRedactor::personal_data().unwrap();
        let ctx = GuardContext::new("c", Stage::Output);
        let result = filter.check("nothing to hide", &ctx).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Pass);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(PatternRedactor::new(&["("]).is_err());
    }
}
