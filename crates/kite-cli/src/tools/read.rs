//! File reading tool

use std::path::Path;

use async_trait::async_trait;
use kite_agent::tool::{Tool, ToolError, ToolResult, required_str};
use serde_json::json;
use tokio::fs;

use super::resolve_path;

const MAX_LINES: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

/// Tool for reading file contents
#[derive(Default)]
pub struct ReadTool;

impl ReadTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. For large files, use offset and limit parameters."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative to the working directory or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let path = resolve_path(cwd, required_str(&params, "path")?);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed(format!("Failed to read {}: {}", path.display(), e)))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        let offset = params
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| (l as usize).min(MAX_LINES))
            .unwrap_or(MAX_LINES);

        if total_lines == 0 {
            return Ok(ToolResult::success("(empty file)").with_metadata(json!({"lines": 0})));
        }
        if offset >= total_lines {
            return Err(ToolError::InvalidParams(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            )));
        }

        let end = (offset + limit).min(total_lines);
        let mut long_lines = false;
        let selected: Vec<String> = lines[offset..end]
            .iter()
            .map(|line| match line.char_indices().nth(MAX_LINE_LENGTH) {
                Some((idx, _)) => {
                    long_lines = true;
                    line[..idx].to_string()
                }
                None => line.to_string(),
            })
            .collect();

        let mut output = selected.join("\n");
        let mut notices = Vec::new();
        if long_lines {
            notices.push(format!(
                "Some lines were truncated to {} characters",
                MAX_LINE_LENGTH
            ));
        }
        if end < total_lines {
            notices.push(format!(
                "{} more lines not shown. Use offset={} to continue reading",
                total_lines - end,
                end + 1
            ));
        }
        let truncated = !notices.is_empty();
        if truncated {
            output.push_str(&format!("\n\n... ({})", notices.join(". ")));
        }

        Ok(ToolResult::success(output)
            .with_truncated(truncated)
            .with_metadata(json!({
                "path": path.display().to_string(),
                "lines": total_lines,
                "start": offset + 1,
                "end": end,
            })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_relative_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();

        let result = ReadTool::new()
            .execute(json!({"path": "a.txt"}), dir.path())
            .await
            .unwrap();
        assert_eq!(result.output, "one\ntwo\nthree");
        assert_eq!(result.truncated, Some(false));
    }

    #[tokio::test]
    async fn test_read_paging() {
        let dir = TempDir::new().unwrap();
        let content: String = (1..=10).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(dir.path().join("b.txt"), content).unwrap();

        let result = ReadTool::new()
            .execute(json!({"path": "b.txt", "offset": 3, "limit": 2}), dir.path())
            .await
            .unwrap();
        assert!(result.output.starts_with("line 3\nline 4\n"));
        assert!(result.output.contains("Use offset=5"));
        assert_eq!(result.truncated, Some(true));
    }

    #[tokio::test]
    async fn test_read_errors() {
        let dir = TempDir::new().unwrap();
        let err = ReadTool::new()
            .execute(json!({"path": "missing.txt"}), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));

        std::fs::write(dir.path().join("c.txt"), "x\n").unwrap();
        let err = ReadTool::new()
            .execute(json!({"path": "c.txt", "offset": 5}), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
