use async_trait::async_trait;
use regex::Regex;

use crate::{GuardContext, Guardrail, GuardrailResult};

/// Blocks content containing any listed term (whole word, case-insensitive).
pub struct KeywordBlocklist {
    pattern: Option<Regex>,
}

impl KeywordBlocklist {
    pub fn new<I, S>(keywords: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| bounded(&k))
            .collect();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!(r"(?i)(?:{})", alternatives.join("|")))?)
        };
        Ok(Self { pattern })
    }
}

/// Escape a keyword and anchor it at word boundaries. `\b` is only added on
/// a side that starts or ends with a word character.
fn bounded(keyword: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let head = if keyword.starts_with(is_word) { r"\b" } else { "" };
    let tail = if keyword.ends_with(is_word) { r"\b" } else { "" };
    format!("{head}{}{tail}", regex::escape(keyword))
}

#[async_trait]
impl Guardrail for KeywordBlocklist {
    fn name(&self) -> &'static str {
        "keyword_blocklist"
    }

    async fn check(&self, content: &str, _context: &GuardContext) -> anyhow::Result<GuardrailResult> {
        let Some(pattern) = &self.pattern else {
            return Ok(GuardrailResult::pass());
        };
        Ok(pattern.find(content).map_or_else(GuardrailResult::pass, |hit| {
            GuardrailResult::block(format!("contains blocked term '{}'", hit.as_str()))
        }))
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
    async fn matches_whole_words_case_insensitively() {
        let filter = KeywordBlocklist::new(["password"]).unwrap();
        let hit = filter.check("My PASSWORD is hunter2", &ctx()).await.unwrap();
        assert_eq!(hit.action, GuardrailAction::Block);
        assert_eq!(hit.reason.as_deref(), Some("contains blocked term 'PASSWORD'"));

        let miss = filter.check("passwordless login", &ctx()).await.unwrap();
        assert_eq!(miss.action, GuardrailAction::Pass);
    }

    #[tokio::test]
    async fn empty_list_passes_everything() {
        let filter = KeywordBlocklist::new(Vec::<String>::new()).unwrap();
        let result = filter.check("anything", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Pass);
    }

    #[tokio::test]
    async fn escapes_regex_metacharacters() {
        let filter = KeywordBlocklist::new(["c++"]).unwrap();
        let result = filter.check("I like cxx", &ctx()).await.unwrap();
        assert_eq!(result.action, GuardrailAction::Pass);
    }

    #[tokio::test]
    async fn matches_terms_with_punctuation_edges() {
        let filter = KeywordBlocklist::new(["c++", "<script>"]).unwrap();
        for text in ["I write c++ daily", "inject <SCRIPT> here", "x=<script>alert(1)"] {
            let result = filter.check(text, &ctx()).await.unwrap();
            assert_eq!(result.action, GuardrailAction::Block, "{text}");
        }

        let miss = filter.check("abc++ is not a language", &ctx()).await.unwrap();
        assert_eq!(miss.action, GuardrailAction::Pass);
    }
}
