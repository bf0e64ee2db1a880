use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parley_conversation::{ContextStrategy, EngineConfig};
use parley_core::{CompletionBackend, CompletionOptions};
use parley_guardrails::{
    GuardrailPipeline, KeywordBlocklist, LengthLimit, LengthMode, ModelJudge, PatternRedactor,
    Stages,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_DIR: &str = "parley";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub guardrails: GuardrailSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let options = CompletionOptions::default();
        Self {
            model: options.model,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://open.bigmodel.cn/api/paas/v4".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Unbounded,
    FixedWindow,
    #[default]
    AdaptiveWindow,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub max_iterations: usize,
    pub context_strategy: StrategyKind,
    pub window_size: usize,
    pub preserve_initial: usize,
    pub prioritize_tool_pairs: bool,
    pub termination_markers: Vec<String>,
    pub max_interactions_per_conversation: Option<u32>,
    pub completion_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub completion_retries: usize,
    pub evict_terminated: bool,
    pub blocking_workers: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            context_strategy: StrategyKind::AdaptiveWindow,
            window_size: 20,
            preserve_initial: 2,
            prioritize_tool_pairs: true,
            termination_markers: Vec::new(),
            max_interactions_per_conversation: None,
            completion_timeout_secs: 120,
            tool_timeout_secs: 30,
            completion_retries: 2,
            evict_terminated: false,
            blocking_workers: 4,
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub const fn strategy(&self) -> ContextStrategy {
        match self.context_strategy {
            StrategyKind::Unbounded => ContextStrategy::Unbounded,
            StrategyKind::FixedWindow => ContextStrategy::FixedWindow {
                max_messages: self.window_size,
            },
            StrategyKind::AdaptiveWindow => ContextStrategy::AdaptiveWindow {
                max_messages: self.window_size,
                preserve_initial: self.preserve_initial,
                prioritize_tool_pairs: self.prioritize_tool_pairs,
            },
        }
    }

    /// Exponential backoff: 1s, 2s, 4s, ... capped at 32s.
    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        (0..self.completion_retries)
            .map(|attempt| Duration::from_secs(1 << attempt.min(5)))
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GuardrailSettings {
    pub blocked_keywords: Vec<String>,
    pub redact_patterns: Vec<String>,
    pub redact_personal_data: bool,
    pub max_input_chars: Option<usize>,
    /// Ask the completion backend to judge every reply before it is sent.
    pub model_judge: bool,
    pub filter_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_output_message: Option<String>,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            blocked_keywords: Vec::new(),
            redact_patterns: Vec::new(),
            redact_personal_data: false,
            max_input_chars: None,
            model_judge: false,
            filter_timeout_secs: 10,
            safe_output_message: None,
        }
    }
}

impl GuardrailSettings {
    /// Build the filter pipeline.
    ///
    /// Order: length limit (input), keyword blocklist, redaction, model judge
    /// (output).
    pub fn pipeline(
        &self,
        judge_backend: Arc<dyn CompletionBackend>,
        options: &CompletionOptions,
    ) -> anyhow::Result<GuardrailPipeline> {
        let mut pipeline = GuardrailPipeline::new()
            .with_filter_timeout(Duration::from_secs(self.filter_timeout_secs));

        if let Some(max_chars) = self.max_input_chars {
            pipeline = pipeline.with_filter(
                Arc::new(LengthLimit::new(max_chars, LengthMode::Block)),
                Stages::Input,
            );
        }
        if !self.blocked_keywords.is_empty() {
            pipeline = pipeline.with_filter(
                Arc::new(KeywordBlocklist::new(&self.blocked_keywords)?),
                Stages::Both,
            );
        }
        if !self.redact_patterns.is_empty() {
            pipeline = pipeline.with_filter(
                Arc::new(PatternRedactor::new(&self.redact_patterns)?),
                Stages::Both,
            );
        }
        if self.redact_personal_data {
            pipeline = pipeline.with_filter(Arc::new(PatternRedactor::personal_data()?), Stages::Both);
        }
        if self.model_judge {
            pipeline = pipeline.with_independent_filter(
                Arc::new(ModelJudge::new(judge_backend, options.clone())),
                Stages::Output,
            );
        }

        debug!("Guardrail pipeline with {} filter(s)", pipeline.len());
        Ok(pipeline)
    }
}

impl Config {
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join(CONFIG_DIR))
    }

    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'parley init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<()> {
        let config_path = Self::ensure_config_dir()?.join(CONFIG_FILE);
        Self::write_template(&config_path)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("📝 Next steps:");
        println!("   1. Edit the config file and add your API key");
        println!("   2. Run 'parley chat' to start a conversation");
        println!();
        println!("🔧 Configuration options:");
        println!("   - engine.context_strategy: unbounded, fixed_window or adaptive_window");
        println!("   - engine.termination_markers: reply substrings that end a conversation");
        println!("   - guardrails.blocked_keywords: words rejected on input and output");
        println!();
        Ok(())
    }

    /// Write the template to `path`, refusing to overwrite an existing file.
    pub fn write_template(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                path.display()
            );
        }
        std::fs::write(path, CONFIG_TEMPLATE)?;
        Ok(())
    }

    #[must_use]
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.agent.model.clone(),
            temperature: self.agent.temperature,
            max_tokens: self.agent.max_tokens,
        }
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let engine = &self.engine;
        let mut config = EngineConfig {
            max_iterations: engine.max_iterations,
            system_prompt: self.agent.system_prompt.clone(),
            completion: self.completion_options(),
            context_strategy: engine.strategy(),
            termination_markers: engine.termination_markers.clone(),
            max_interactions: engine.max_interactions_per_conversation,
            completion_timeout: Duration::from_secs(engine.completion_timeout_secs),
            completion_retry_delays: engine.retry_delays(),
            tool_timeout: Duration::from_secs(engine.tool_timeout_secs),
            blocking_workers: engine.blocking_workers,
            evict_terminated: engine.evict_terminated,
            ..EngineConfig::default()
        };
        if let Some(message) = &self.guardrails.safe_output_message {
            config.messages.safe_output.clone_from(message);
        }
        config
    }
}

const CONFIG_TEMPLATE: &str = r#"{
  "agent": {
    "model": "glm-4-flash",
    "max_tokens": 8192,
    "temperature": 0.7,
    "system_prompt": "You are a helpful assistant. When the user is done, end your reply with <DONE>."
  },
  "provider": {
    "api_key": "your-api-key-here",
    "base_url": "https://open.bigmodel.cn/api/paas/v4"
  },
  "engine": {
    "max_iterations": 20,
    "context_strategy": "adaptive_window",
    "window_size": 20,
    "preserve_initial": 2,
    "prioritize_tool_pairs": true,
    "termination_markers": ["<DONE>"],
    "max_interactions_per_conversation": null,
    "completion_timeout_secs": 120,
    "tool_timeout_secs": 30,
    "completion_retries": 2,
    "evict_terminated": false,
    "blocking_workers": 4
  },
  "guardrails": {
    "blocked_keywords": [],
    "redact_patterns": [],
    "redact_personal_data": true,
    "max_input_chars": 8000,
    "model_judge": false,
    "filter_timeout_secs": 10
  }
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{CompletionRequest, CompletionResponse};

    struct NeverCalled;

    #[async_trait::async_trait]
    impl CompletionBackend for NeverCalled {
        async fn complete(&self, _: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
            anyhow::bail!("not expected")
        }
    }

    #[test]
    fn template_parses() {
        let config: Config = serde_json::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.engine.termination_markers, vec!["<DONE>".to_string()]);
        assert_eq!(config.guardrails.max_input_chars, Some(8000));
    }

    #[test]
    fn partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"provider": {"api_key": "k"}, "engine": {"context_strategy": "fixed_window", "window_size": 6}}"#,
        )
        .unwrap();
        assert_eq!(config.provider.api_key, "k");
        assert!(config.provider.base_url.starts_with("https://"));
        assert_eq!(config.agent.model, "glm-4-flash");
        assert_eq!(config.engine.max_iterations, 20);
        assert_eq!(
            config.engine.strategy(),
            ContextStrategy::FixedWindow { max_messages: 6 }
        );
    }

    #[test]
    fn engine_config_maps_every_option() {
        let mut config = Config::default();
        config.engine.max_interactions_per_conversation = Some(3);
        config.engine.completion_retries = 3;
        config.engine.evict_terminated = true;
        config.guardrails.safe_output_message = Some("Filtered.".to_string());

        let engine = config.engine_config();
        assert_eq!(engine.max_iterations, 20);
        assert_eq!(engine.max_interactions, Some(3));
        assert_eq!(
            engine.completion_retry_delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(engine.evict_terminated);
        assert_eq!(engine.messages.safe_output, "Filtered.");
        assert_eq!(engine.context_strategy, ContextStrategy::default());
    }

    #[test]
    fn pipeline_includes_configured_filters() {
        let settings = GuardrailSettings {
            blocked_keywords: vec!["secret".to_string()],
            redact_personal_data: true,
            max_input_chars: Some(100),
            model_judge: true,
            ..GuardrailSettings::default()
        };
        let pipeline = settings
            .pipeline(Arc::new(NeverCalled), &CompletionOptions::default())
            .unwrap();
        assert_eq!(pipeline.len(), 4);
        assert!(GuardrailSettings::default()
            .pipeline(Arc::new(NeverCalled), &CompletionOptions::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn bad_pattern_is_reported() {
        let settings = GuardrailSettings {
            redact_patterns: vec!["(".to_string()],
            ..GuardrailSettings::default()
        };
        assert!(settings
            .pipeline(Arc::new(NeverCalled), &CompletionOptions::default())
            .is_err());
    }

    #[test]
    fn template_is_not_overwritten() {
        let path = std::env::temp_dir().join(format!("parley-config-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        Config::write_template(&path).unwrap();
        assert!(Config::write_template(&path).is_err());
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.window_size, 20);

        std::fs::remove_file(&path).unwrap();
    }
}
