//! Tool trait and results

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kite_ai::ToolSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a tool execution. Produced once per tool call and never mutated
/// after it is handed back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    /// Output returned to the model
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured details for renderers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Unified diff of a file change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: None,
            diff: None,
            truncated: None,
            exit_code: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::success(String::new())
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = Some(truncated);
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Text placed in the `tool` message sent back to the model
    pub fn to_model_content(&self) -> String {
        match (&self.error, self.success) {
            (Some(error), false) if self.output.is_empty() => format!("Error: {}", error),
            (Some(error), false) => format!("Error: {}\n\n{}", error, self.output),
            (None, false) if self.output.is_empty() => "Error: tool failed".to_string(),
            _ if self.output.is_empty() => "(no output)".to_string(),
            _ => self.output.clone(),
        }
    }
}

/// Failures a tool body can propagate with `?`; the registry turns them into
/// failed [`ToolResult`]s
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A single pending call, as seen by [`Tool::confirmation`]
#[derive(Debug, Clone, Copy)]
pub struct ToolInvocation<'a> {
    pub name: &'a str,
    pub params: &'a serde_json::Value,
    pub cwd: &'a Path,
}

/// What a mutating tool is about to do, for approval and human confirmation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Confirmation {
    /// One-line summary shown to the operator
    pub title: String,
    /// Shell command text, if the action runs one
    pub command: Option<String>,
    /// Filesystem paths the action touches
    pub paths: Vec<PathBuf>,
    /// The tool considers this action dangerous regardless of policy
    pub dangerous: bool,
}

impl Confirmation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn dangerous(mut self) -> Self {
        self.dangerous = true;
        self
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Declaration sent to the model
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(self.name(), self.description(), self.parameters_schema())
    }

    /// Whether the tool changes anything outside the conversation
    fn is_mutating(&self) -> bool {
        false
    }

    /// Whether this particular call mutates. Tools whose actions differ in
    /// effect override this; the default is [`Tool::is_mutating`].
    fn mutates(&self, _invocation: &ToolInvocation<'_>) -> bool {
        self.is_mutating()
    }

    /// Describe a pending invocation for approval. Only consulted for mutating calls.
    fn confirmation(&self, _invocation: &ToolInvocation<'_>) -> Option<Confirmation> {
        None
    }

    /// Execute the tool with the given arguments in `cwd`
    async fn execute(
        &self,
        params: serde_json::Value,
        cwd: &Path,
    ) -> Result<ToolResult, ToolError>;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Fetch a required string parameter
pub fn required_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParams(format!("'{}' must be a string", key)))
}
