//! Core types for model interactions

use serde::{Deserialize, Serialize};

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Api {
    AnthropicMessages,
    OpenAICompletions,
}

/// Known model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
    Groq,
    XAI,
    OpenRouter,
    Ollama,
    Custom,
}

impl Provider {
    /// Parse a provider name as written in config files and on the command line
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAI),
            "groq" => Some(Provider::Groq),
            "xai" => Some(Provider::XAI),
            "openrouter" => Some(Provider::OpenRouter),
            "ollama" => Some(Provider::Ollama),
            "custom" => Some(Provider::Custom),
            _ => None,
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Anthropic => "Anthropic",
            Provider::OpenAI => "OpenAI",
            Provider::Groq => "Groq",
            Provider::XAI => "xAI",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::XAI => Some("XAI_API_KEY"),
            Provider::OpenRouter => Some("OPENROUTER_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    /// Whether requests to this provider need an API key at all
    pub fn requires_api_key(&self) -> bool {
        self.api_key_env_var().is_some()
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::XAI => "https://api.x.ai/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::Custom => "",
        }
    }

    fn api(&self) -> Api {
        match self {
            Provider::Anthropic => Api::AnthropicMessages,
            _ => Api::OpenAICompletions,
        }
    }
}

const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Context windows for model families, matched by id prefix. The first
/// matching prefix wins, so longer prefixes come before their stems.
const CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("claude-", 200_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-1106", 128_000),
    ("gpt-4-0125", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("gpt-5", 400_000),
    ("o1", 200_000),
    ("o3", 200_000),
    ("o4", 200_000),
    ("grok-", 131_072),
    ("llama", 128_000),
    ("qwen", 32_768),
];

/// Model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "claude-sonnet-4-5")
    pub id: String,
    pub provider: Provider,
    pub api: Api,
    /// Base URL for API calls
    pub base_url: String,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
}

impl Model {
    /// Build a model description for `id` served by `provider`, filling in the
    /// base URL and context window from known defaults.
    pub fn for_provider(provider: Provider, id: impl Into<String>) -> Self {
        let id = id.into();
        let context_window = CONTEXT_WINDOWS
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, window)| *window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);

        Self {
            id,
            provider,
            api: provider.api(),
            base_url: provider.default_base_url().to_string(),
            context_window,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }
}

/// Token usage reported by a provider for one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cached_tokens: 0,
        }
    }

    /// Field-wise accumulate another usage record into this one
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One unit of conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    /// Requests made by an assistant message; `None` rather than empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The request a `tool` message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a `tool` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Cached at append time
    #[serde(default)]
    pub token_count: u32,
    /// Unix milliseconds at which the content was pruned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruned_at: Option<i64>,
}

impl Message {
    fn bare(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
            token_count: 0,
            pruned_at: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::bare(Role::System, Some(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::bare(Role::User, Some(text.into()))
    }

    /// Create an assistant message. An empty tool call list is stored as `None`.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::bare(Role::Assistant, content);
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }
        message
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::bare(Role::Tool, Some(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message.tool_name = Some(tool_name.into());
        message
    }

    /// Text content, or the empty string
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn is_pruned(&self) -> bool {
        self.pruned_at.is_some()
    }
}

/// Tool declaration sent to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the parameters
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed under the schema's `required` key
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_without_tool_calls_stores_none() {
        let msg = Message::assistant(Some("done".into()), vec![]);
        assert!(msg.tool_calls.is_none());
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("toolCalls").is_none());
    }

    #[test]
    fn test_assistant_with_tool_calls() {
        let call = ToolCall::new("call_1", "read", json!({"path": "a.txt"}));
        let msg = Message::assistant(None, vec![call.clone()]);
        assert_eq!(msg.tool_calls(), &[call]);
        assert_eq!(msg.text(), "");
    }

    #[test]
    fn test_usage_add_is_fieldwise() {
        let mut total = Usage::default();
        total.add(&Usage::new(10, 5));
        total.add(&Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            cached_tokens: 7,
        });
        assert_eq!(total.prompt_tokens, 11);
        assert_eq!(total.completion_tokens, 7);
        assert_eq!(total.total_tokens, 18);
        assert_eq!(total.cached_tokens, 7);
    }

    #[test]
    fn test_required_fields() {
        let schema = ToolSchema::new(
            "edit",
            "Edit a file",
            json!({"type": "object", "required": ["path", "old_text"]}),
        );
        assert_eq!(schema.required_fields(), vec!["path", "old_text"]);

        let schema = ToolSchema::new("noop", "", json!({"type": "object"}));
        assert!(schema.required_fields().is_empty());
    }

    #[test]
    fn test_model_for_provider_defaults() {
        let model = Model::for_provider(Provider::Anthropic, "claude-sonnet-4-5");
        assert_eq!(model.api, Api::AnthropicMessages);
        assert_eq!(model.context_window, 200_000);
        assert_eq!(model.base_url, "https://api.anthropic.com");

        for (id, window) in [
            ("gpt-4-turbo", 128_000),
            ("gpt-4-turbo-2024-04-09", 128_000),
            ("gpt-4-0125-preview", 128_000),
            ("gpt-4-1106-preview", 128_000),
            ("gpt-4-32k-0613", 32_768),
            ("gpt-4-0613", 8_192),
            ("gpt-4", 8_192),
            ("gpt-4o-mini", 128_000),
        ] {
            assert_eq!(Model::for_provider(Provider::OpenAI, id).context_window, window, "{id}");
        }

        let model = Model::for_provider(Provider::Ollama, "mystery-model");
        assert_eq!(model.api, Api::OpenAICompletions);
        assert_eq!(model.context_window, DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(Provider::parse("OpenAI"), Some(Provider::OpenAI));
        assert_eq!(Provider::parse("nope"), None);
        assert!(!Provider::Ollama.requires_api_key());
    }
}
