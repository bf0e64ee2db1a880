use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{GuardContext, Guardrail, GuardrailAction, Stage};

const DEFAULT_FILTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Boundaries a filter is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stages {
    Input,
    Output,
    Both,
}

impl Stages {
    const fn covers(self, stage: Stage) -> bool {
        matches!(
            (self, stage),
            (Self::Both, _) | (Self::Input, Stage::Input) | (Self::Output, Stage::Output)
        )
    }
}

struct Entry {
    filter: Arc<dyn Guardrail>,
    stages: Stages,
    independent: bool,
    enabled: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailWarning {
    pub filter: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailOutcome {
    Allowed {
        content: String,
        warnings: Vec<GuardrailWarning>,
    },
    Blocked {
        filter: String,
        reason: String,
    },
}

impl GuardrailOutcome {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Final content, or `None` when blocked.
    #[must_use]
    pub fn into_content(self) -> Option<String> {
        match self {
            Self::Allowed { content, .. } => Some(content),
            Self::Blocked { .. } => None,
        }
    }
}

/// Ordered filter list applied at one boundary at a time.
pub struct GuardrailPipeline {
    entries: Vec<Entry>,
    filter_timeout: Duration,
}

impl GuardrailPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            filter_timeout: DEFAULT_FILTER_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_filter_timeout(mut self, filter_timeout: Duration) -> Self {
        self.filter_timeout = filter_timeout;
        self
    }

    /// Append a filter that sees the output of the filters before it.
    #[must_use]
    pub fn with_filter(self, filter: Arc<dyn Guardrail>, stages: Stages) -> Self {
        self.push(filter, stages, false)
    }

    /// Append a filter that always sees the original content.
    #[must_use]
    pub fn with_independent_filter(self, filter: Arc<dyn Guardrail>, stages: Stages) -> Self {
        self.push(filter, stages, true)
    }

    fn push(mut self, filter: Arc<dyn Guardrail>, stages: Stages, independent: bool) -> Self {
        info!("Registering guardrail: {} ({stages:?})", filter.name());
        self.entries.push(Entry {
            filter,
            stages,
            independent,
            enabled: AtomicBool::new(true),
        });
        self
    }

    /// Enable or disable every filter called `name`. Returns whether any matched.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for entry in self.entries.iter().filter(|e| e.filter.name() == name) {
            entry.enabled.store(enabled, Ordering::Relaxed);
            found = true;
        }
        if found {
            info!("Guardrail {name} enabled={enabled}");
        }
        found
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| e.filter.name() == name)
            .map(|e| e.enabled.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn apply(&self, stage: Stage, content: &str, context: &GuardContext) -> GuardrailOutcome {
        let mut current = content.to_string();
        let mut warnings = Vec::new();

        for entry in &self.entries {
            if !entry.stages.covers(stage) || !entry.enabled.load(Ordering::Relaxed) {
                continue;
            }
            let name = entry.filter.name();
            let input = if entry.independent { content } else { current.as_str() };

            // Own task, so a panicking filter fails open like an erroring one.
            let filter = Arc::clone(&entry.filter);
            let (owned_input, owned_context) = (input.to_string(), context.clone());
            let mut check =
                tokio::spawn(async move { filter.check(&owned_input, &owned_context).await });
            let checked = match timeout(self.filter_timeout, &mut check).await {
                Ok(joined) => joined.unwrap_or_else(|e| Err(e.into())),
                Err(_) => {
                    check.abort();
                    error!(
                        filter = name,
                        conversation = %context.conversation_id,
                        "Guardrail timed out after {}ms, passing content through",
                        self.filter_timeout.as_millis()
                    );
                    continue;
                }
            };
            let result = match checked {
                Ok(result) => result,
                Err(e) => {
                    error!(
                        filter = name,
                        conversation = %context.conversation_id,
                        "Guardrail failed, passing content through: {e:#}"
                    );
                    continue;
                }
            };

            match result.action {
                GuardrailAction::Pass => {}
                GuardrailAction::Modify => match result.content {
                    Some(modified) => {
                        debug!(filter = name, ?stage, "Guardrail modified content");
                        current = modified;
                    }
                    None => warn!(filter = name, "Modify result without content ignored"),
                },
                GuardrailAction::Block => {
                    let reason = result
                        .reason
                        .unwrap_or_else(|| format!("blocked by {name}"));
                    info!(
                        filter = name,
                        ?stage,
                        conversation = %context.conversation_id,
                        "Guardrail blocked content: {reason}"
                    );
                    return GuardrailOutcome::Blocked {
                        filter: name.to_string(),
                        reason,
                    };
                }
                GuardrailAction::Warn => {
                    let reason = result.reason.unwrap_or_default();
                    warn!(
                        filter = name,
                        ?stage,
                        conversation = %context.conversation_id,
                        "Guardrail warning: {reason}"
                    );
                    warnings.push(GuardrailWarning {
                        filter: name.to_string(),
                        reason,
                    });
                }
            }
        }

        GuardrailOutcome::Allowed {
            content: current,
            warnings,
        }
    }
}

impl Default for GuardrailPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GuardrailResult;
    use async_trait::async_trait;

    struct Upper;
    struct Broken;
    struct Panicky;
    struct Passthrough;
    struct Sleepy;
    struct Flag;
    struct BlockWord(&'static str);
    struct Recorder(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl Guardrail for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }
        async fn check(&self, content: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            Ok(GuardrailResult::modify(content.to_uppercase(), "shout"))
        }
    }

    #[async_trait]
    impl Guardrail for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn check(&self, _: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            anyhow::bail!("classifier unavailable")
        }
    }

    #[async_trait]
    impl Guardrail for Passthrough {
        fn name(&self) -> &'static str {
            "passthrough"
        }
        async fn check(&self, _: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            Ok(GuardrailResult::pass())
        }
    }

    #[async_trait]
    impl Guardrail for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }
        async fn check(&self, _: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GuardrailResult::block("too late"))
        }
    }

    #[async_trait]
    impl Guardrail for Flag {
        fn name(&self) -> &'static str {
            "flag"
        }
        async fn check(&self, _: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            Ok(GuardrailResult::warn("looks odd"))
        }
    }

    #[async_trait]
    impl Guardrail for BlockWord {
        fn name(&self) -> &'static str {
            "block_word"
        }
        async fn check(&self, content: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            if content.contains(self.0) {
                Ok(GuardrailResult::block(format!("mentions {}", self.0)))
            } else {
                Ok(GuardrailResult::pass())
            }
        }
    }

    #[async_trait]
    impl Guardrail for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        async fn check(&self, content: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            self.0.lock().unwrap().push(content.to_string());
            Ok(GuardrailResult::pass())
        }
    }

    #[async_trait]
    impl Guardrail for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }
        async fn check(&self, _: &str, _: &GuardContext) -> anyhow::Result<GuardrailResult> {
            panic!("filter bug")
        }
    }

    fn ctx(stage: Stage) -> GuardContext {
        GuardContext::new("conv-1", stage)
    }

    #[tokio::test]
    async fn failing_filter_behaves_like_pass() {
        let broken = GuardrailPipeline::new()
            .with_filter(Arc::new(Broken), Stages::Both)
            .with_filter(Arc::new(Upper), Stages::Both);
        let passing = GuardrailPipeline::new()
            .with_filter(Arc::new(Passthrough), Stages::Both)
            .with_filter(Arc::new(Upper), Stages::Both);

        for stage in [Stage::Input, Stage::Output] {
            let a = broken.apply(stage, "hello", &ctx(stage)).await;
            let b = passing.apply(stage, "hello", &ctx(stage)).await;
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn panicking_filter_fails_open() {
        let pipeline = GuardrailPipeline::new()
            .with_filter(Arc::new(Panicky), Stages::Both)
            .with_filter(Arc::new(Upper), Stages::Both);
        let outcome = pipeline.apply(Stage::Output, "hello", &ctx(Stage::Output)).await;
        assert_eq!(outcome.into_content().as_deref(), Some("HELLO"));
    }

    #[tokio::test]
    async fn timed_out_filter_fails_open() {
        let pipeline = GuardrailPipeline::new()
            .with_filter_timeout(Duration::from_millis(20))
            .with_filter(Arc::new(Sleepy), Stages::Input);
        let outcome = pipeline.apply(Stage::Input, "hi", &ctx(Stage::Input)).await;
        assert_eq!(outcome.into_content().as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn block_halts_pipeline() {
        let recorder = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let pipeline = GuardrailPipeline::new()
            .with_filter(Arc::new(BlockWord("secret")), Stages::Both)
            .with_filter(recorder.clone(), Stages::Both);
        let outcome = pipeline
            .apply(Stage::Output, "the secret plan", &ctx(Stage::Output))
            .await;
        assert_eq!(
            outcome,
            GuardrailOutcome::Blocked {
                filter: "block_word".into(),
                reason: "mentions secret".into()
            }
        );
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn filters_chain_unless_independent() {
        let chained = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let independent = Arc::new(Recorder(std::sync::Mutex::new(Vec::new())));
        let pipeline = GuardrailPipeline::new()
            .with_filter(Arc::new(Upper), Stages::Both)
            .with_filter(chained.clone(), Stages::Both)
            .with_independent_filter(independent.clone(), Stages::Both);

        let outcome = pipeline.apply(Stage::Input, "quiet", &ctx(Stage::Input)).await;
        assert_eq!(outcome.into_content().as_deref(), Some("QUIET"));
        assert_eq!(chained.0.lock().unwrap().as_slice(), ["QUIET"]);
        assert_eq!(independent.0.lock().unwrap().as_slice(), ["quiet"]);
    }

    #[tokio::test]
    async fn stage_and_enable_flags_are_respected() {
        let pipeline = GuardrailPipeline::new()
            .with_filter(Arc::new(Upper), Stages::Output)
            .with_filter(Arc::new(BlockWord("x")), Stages::Both);

        let input = pipeline.apply(Stage::Input, "abc", &ctx(Stage::Input)).await;
        assert_eq!(input.into_content().as_deref(), Some("abc"));

        assert!(pipeline.set_enabled("block_word", false));
        assert_eq!(pipeline.is_enabled("block_word"), Some(false));
        let output = pipeline.apply(Stage::Output, "xyz", &ctx(Stage::Output)).await;
        assert_eq!(output.into_content().as_deref(), Some("XYZ"));

        assert!(!pipeline.set_enabled("nope", true));
    }

    #[tokio::test]
    async fn warnings_are_recorded_without_changing_content() {
        let pipeline = GuardrailPipeline::new().with_filter(Arc::new(Flag), Stages::Both);
        let outcome = pipeline.apply(Stage::Input, "hmm", &ctx(Stage::Input)).await;
        let GuardrailOutcome::Allowed { content, warnings } = outcome else {
            panic!("expected allowed outcome");
        };
        assert_eq!(content, "hmm");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].filter, "flag");
    }
}
