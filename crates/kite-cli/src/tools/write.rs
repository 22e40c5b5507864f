//! File writing tool

use std::path::Path;

use async_trait::async_trait;
use kite_agent::tool::{Confirmation, Tool, ToolError, ToolInvocation, ToolResult, required_str};
use serde_json::json;
use tokio::fs;

use super::{resolve_path, unified_diff};

/// Tool for creating or overwriting files
#[derive(Default)]
pub struct WriteTool;

impl WriteTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does. Automatically creates parent directories."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (relative to the working directory or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn confirmation(&self, invocation: &ToolInvocation<'_>) -> Option<Confirmation> {
        let raw = invocation.params.get("path")?.as_str()?;
        let path = resolve_path(invocation.cwd, raw);
        Some(Confirmation::new(format!("Write {}", raw)).with_path(path))
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let raw = required_str(&params, "path")?;
        let content = required_str(&params, "content")?;
        let path = resolve_path(cwd, raw);

        if path.is_dir() {
            return Err(ToolError::failed(format!("{} is a directory", raw)));
        }

        // Missing file diffs against empty contents
        let previous = match fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(ToolError::failed(format!("Failed to read {}: {}", raw, e))),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::failed(format!("Failed to create directory: {}", e)))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| ToolError::failed(format!("Failed to write file: {}", e)))?;

        let verb = if previous.is_some() { "Updated" } else { "Created" };
        let diff = unified_diff(raw, previous.as_deref().unwrap_or(""), content);
        Ok(ToolResult::success(format!("{} {} ({} bytes)", verb, raw, content.len()))
            .with_diff(diff)
            .with_metadata(json!({
                "path": path.display().to_string(),
                "created": previous.is_none(),
            })))
    }
}
