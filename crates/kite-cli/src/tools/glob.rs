//! Glob file pattern matching tool

use std::path::Path;

use async_trait::async_trait;
use kite_agent::tool::{Tool, ToolError, ToolResult, required_str};
use serde_json::json;

const DEFAULT_LIMIT: usize = 100;

/// Tool for finding files matching a glob pattern
#[derive(Default)]
pub struct GlobTool;

impl GlobTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern under the working directory. Supports patterns like '**/*.rs', 'src/*.ts'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to match (e.g., '**/*.rs', 'src/**/*.ts')"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of results to return (defaults to 100)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let pattern = required_str(&params, "pattern")?;
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let full_pattern = cwd.join(pattern).to_string_lossy().to_string();
        let entries = glob::glob(&full_pattern)
            .map_err(|e| ToolError::InvalidParams(format!("Invalid glob pattern: {}", e)))?;

        let mut results = Vec::new();
        let mut truncated = false;
        for entry in entries {
            match entry {
                Ok(path) => {
                    if results.len() >= limit {
                        truncated = true;
                        break;
                    }
                    let shown = path.strip_prefix(cwd).unwrap_or(&path);
                    results.push(shown.display().to_string());
                }
                Err(e) => tracing::debug!("Glob entry error: {}", e),
            }
        }

        if results.is_empty() {
            return Ok(ToolResult::success("No files matched the pattern"));
        }

        let count = results.len();
        let mut output = results.join("\n");
        if truncated {
            output.push_str(&format!("\n\n(showing first {} results)", limit));
        }
        Ok(ToolResult::success(output)
            .with_truncated(truncated)
            .with_metadata(json!({"count": count})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        for file in ["src/lib.rs", "src/bin/main.rs", "README.md"] {
            std::fs::write(dir.path().join(file), "").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_matches_relative_to_working_dir() {
        let dir = project();
        let result = GlobTool::new()
            .execute(json!({"pattern": "**/*.rs"}), dir.path())
            .await
            .unwrap();

        let mut found: Vec<&str> = result.output.lines().collect();
        found.sort();
        assert_eq!(found, vec!["src/bin/main.rs", "src/lib.rs"]);
        assert_eq!(result.truncated, Some(false));
    }

    #[tokio::test]
    async fn test_limit_and_no_match() {
        let dir = project();
        let tool = GlobTool::new();

        let result = tool
            .execute(json!({"pattern": "**/*", "limit": 1}), dir.path())
            .await
            .unwrap();
        assert_eq!(result.truncated, Some(true));
        assert!(result.output.contains("showing first 1 results"));

        let result = tool
            .execute(json!({"pattern": "*.py"}), dir.path())
            .await
            .unwrap();
        assert_eq!(result.output, "No files matched the pattern");
    }
}
