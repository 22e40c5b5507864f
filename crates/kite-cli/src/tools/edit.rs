//! File editing tool - exact find/replace

use std::path::Path;

use async_trait::async_trait;
use kite_agent::tool::{Confirmation, Tool, ToolError, ToolInvocation, ToolResult, required_str};
use serde_json::json;
use tokio::fs;

use super::{resolve_path, unified_diff};

/// Tool for surgical edits by exact text replacement
#[derive(Default)]
pub struct EditTool;

impl EditTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing exact text. The old_text must match exactly (including whitespace) and occur once."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit (relative to the working directory or absolute)"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find and replace (must be unique in the file)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn confirmation(&self, invocation: &ToolInvocation<'_>) -> Option<Confirmation> {
        let raw = invocation.params.get("path")?.as_str()?;
        let path = resolve_path(invocation.cwd, raw);
        Some(Confirmation::new(format!("Edit {}", raw)).with_path(path))
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let raw = required_str(&params, "path")?;
        let old_text = required_str(&params, "old_text")?;
        let new_text = required_str(&params, "new_text")?;
        let path = resolve_path(cwd, raw);

        if old_text.is_empty() {
            return Err(ToolError::InvalidParams("old_text must not be empty".into()));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed(format!("Failed to read {}: {}", raw, e)))?;

        match content.matches(old_text).count() {
            0 => {
                return Err(ToolError::failed(format!(
                    "Could not find the exact text in {}. The old text must match exactly including all whitespace and newlines.",
                    raw
                )));
            }
            1 => {}
            n => {
                return Err(ToolError::failed(format!(
                    "Found {} occurrences of the text in {}. Provide more surrounding context to make it unique.",
                    n, raw
                )));
            }
        }

        let updated = content.replacen(old_text, new_text, 1);
        if updated == content {
            return Err(ToolError::failed(format!(
                "No changes made to {}. The replacement produced identical content.",
                raw
            )));
        }

        fs::write(&path, &updated)
            .await
            .map_err(|e| ToolError::failed(format!("Failed to write file: {}", e)))?;

        let diff = unified_diff(raw, &content, &updated);
        Ok(ToolResult::success(format!("Edited {}\n\n{}", raw, diff))
            .with_diff(diff)
            .with_metadata(json!({"path": path.display().to_string()})))
    }
}
