//! Configuration file support and startup resolution

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use kite_agent::{ApprovalPolicy, CommandHooks, HookTrigger, config::DEFAULT_MAX_TURNS};
use kite_ai::{Model, Provider};
use serde::{Deserialize, Serialize};

const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SUBAGENT_TIMEOUT_SECS: u64 = 300;

/// Configuration for kite, read from `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Default provider
    pub provider: Option<String>,
    /// Override the provider's API base URL
    pub base_url: Option<String>,
    /// Override the model's context window
    pub context_window: Option<u32>,
    pub max_turns: Option<u32>,
    pub approval_policy: Option<ApprovalPolicy>,
    pub autoplan: Option<bool>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<PathBuf>,
    /// API keys by provider name (alternative to environment variables)
    pub api_keys: HashMap<String, String>,
    pub hooks: HooksConfig,
    pub subagent: SubagentConfig,
    pub shell: ShellConfig,
}

/// Shell commands to run per lifecycle trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub before_agent: Vec<String>,
    pub after_agent: Vec<String>,
    pub before_tool: Vec<String>,
    pub after_tool: Vec<String>,
    pub on_error: Vec<String>,
}

impl HooksConfig {
    fn commands(&self, trigger: HookTrigger) -> &[String] {
        match trigger {
            HookTrigger::BeforeAgent => &self.before_agent,
            HookTrigger::AfterAgent => &self.after_agent,
            HookTrigger::BeforeTool => &self.before_tool,
            HookTrigger::AfterTool => &self.after_tool,
            HookTrigger::OnError => &self.on_error,
        }
    }

    pub fn build(&self) -> CommandHooks {
        let mut hooks = CommandHooks::new();
        for trigger in HookTrigger::ALL {
            for command in self.commands(trigger) {
                hooks.add(trigger, command.clone());
            }
        }
        hooks
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentConfig {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kite")
    }

    /// Get the config file path, honoring an explicit override
    pub fn config_path(override_path: Option<PathBuf>) -> PathBuf {
        override_path.unwrap_or_else(|| Self::config_dir().join("config.toml"))
    }

    /// Load config from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Values given on the command line; these win over the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub approval_policy: Option<ApprovalPolicy>,
    pub max_turns: Option<u32>,
    pub autoplan: bool,
}

/// Everything the rest of the program needs, resolved once at startup
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub model: Model,
    pub api_key: Option<String>,
    pub working_dir: PathBuf,
    pub max_turns: u32,
    pub approval_policy: ApprovalPolicy,
    pub autoplan: bool,
    /// Contents of `system_prompt_file`, replacing the built-in prompt
    pub system_prompt: Option<String>,
    pub hooks: HooksConfig,
    pub shell_timeout: Duration,
    pub subagent_timeout: Duration,
}

/// Default model for each provider
fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "claude-sonnet-4-5",
        Provider::OpenAI => "gpt-4o",
        Provider::Groq => "llama-3.3-70b-versatile",
        Provider::XAI => "grok-4",
        Provider::OpenRouter => "anthropic/claude-sonnet-4.5",
        Provider::Ollama => "llama3.1",
        Provider::Custom => "default",
    }
}

impl ResolvedConfig {
    /// Merge file and command line settings and resolve credentials.
    ///
    /// `env` looks up environment variables; `cwd` is the process working
    /// directory used when none is given.
    pub fn resolve(
        config: &Config,
        overrides: Overrides,
        cwd: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let provider_name = overrides
            .provider
            .or_else(|| config.provider.clone())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let Some(provider) = Provider::parse(&provider_name) else {
            bail!(
                "Unknown provider '{}' (expected anthropic, openai, groq, xai, openrouter, ollama or custom)",
                provider_name
            );
        };

        let model_id = overrides
            .model
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| default_model(provider).to_string());
        let mut model = Model::for_provider(provider, model_id);
        if let Some(ref base_url) = config.base_url {
            model = model.with_base_url(base_url.trim_end_matches('/'));
        }
        if let Some(window) = config.context_window {
            model = model.with_context_window(window);
        }
        if model.base_url.is_empty() {
            bail!("Provider 'custom' requires base_url in the config file");
        }

        let api_key = config
            .api_keys
            .get(&provider_name.to_lowercase())
            .cloned()
            .or_else(|| provider.api_key_env_var().and_then(&env))
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() && provider.requires_api_key() {
            let var = provider.api_key_env_var().unwrap_or_default();
            bail!(
                "No API key found for {}. Set {} or add it under [api_keys] in {}",
                provider.name(),
                var,
                Config::config_path(None).display()
            );
        }

        let working_dir = match overrides.working_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => cwd.join(dir),
            None => cwd.to_path_buf(),
        };
        if !working_dir.is_dir() {
            bail!("Working directory {} does not exist", working_dir.display());
        }
        let working_dir = working_dir
            .canonicalize()
            .with_context(|| format!("Cannot resolve working directory {}", working_dir.display()))?;

        let system_prompt = match config.system_prompt_file {
            Some(ref path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("Failed to read system prompt file {}", path.display()))?,
            ),
            None => None,
        };

        Ok(Self {
            model,
            api_key,
            working_dir,
            max_turns: overrides
                .max_turns
                .or(config.max_turns)
                .unwrap_or(DEFAULT_MAX_TURNS),
            approval_policy: overrides
                .approval_policy
                .or(config.approval_policy)
                .unwrap_or_default(),
            autoplan: overrides.autoplan || config.autoplan.unwrap_or(false),
            system_prompt,
            hooks: config.hooks.clone(),
            shell_timeout: Duration::from_secs(
                config.shell.timeout_secs.unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS),
            ),
            subagent_timeout: Duration::from_secs(
                config
                    .subagent
                    .timeout_secs
                    .unwrap_or(DEFAULT_SUBAGENT_TIMEOUT_SECS),
            ),
        })
    }
}
