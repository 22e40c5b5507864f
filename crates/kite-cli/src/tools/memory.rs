//! Project memory: short notes persisted in `.kite/memory.json`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kite_agent::tool::{Confirmation, Tool, ToolError, ToolInvocation, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::fs;

const MAX_NOTE_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Note {
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    notes: Vec<Note>,
}

/// Tool for remembering facts about the project across sessions
#[derive(Default)]
pub struct MemoryTool;

impl MemoryTool {
    pub fn new() -> Self {
        Self
    }

    pub fn memory_path(cwd: &Path) -> PathBuf {
        cwd.join(".kite").join("memory.json")
    }

    async fn load(path: &Path) -> Result<MemoryFile, ToolError> {
        match fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ToolError::failed(format!("Corrupt memory file {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(path: &Path, memory: &MemoryFile) -> Result<(), ToolError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(memory)
            .map_err(|e| ToolError::failed(format!("Failed to encode memory: {}", e)))?;
        fs::write(path, text).await?;
        Ok(())
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Store or list short notes about this project that persist across sessions. Use action 'add' with content, or 'list'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list"],
                    "description": "'add' stores a note, 'list' returns all notes"
                },
                "content": {
                    "type": "string",
                    "description": "The note to store (required for 'add')"
                }
            },
            "required": ["action"]
        })
    }

    fn is_mutating(&self) -> bool {
        true
    }

    /// Listing only reads the memory file
    fn mutates(&self, invocation: &ToolInvocation<'_>) -> bool {
        invocation.params.get("action").and_then(|v| v.as_str()) != Some("list")
    }

    fn confirmation(&self, invocation: &ToolInvocation<'_>) -> Option<Confirmation> {
        let action = invocation.params.get("action")?.as_str()?;
        Some(
            Confirmation::new(format!("Memory {}", action))
                .with_path(Self::memory_path(invocation.cwd)),
        )
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let path = Self::memory_path(cwd);
        let action = params.get("action").and_then(|v| v.as_str()).unwrap_or_default();

        match action {
            "add" => {
                let content = params
                    .get("content")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| ToolError::InvalidParams("'add' requires non-empty content".into()))?;
                if content.chars().count() > MAX_NOTE_CHARS {
                    return Err(ToolError::InvalidParams(format!(
                        "Note is longer than {} characters",
                        MAX_NOTE_CHARS
                    )));
                }

                let mut memory = Self::load(&path).await?;
                memory.notes.push(Note {
                    content: content.to_string(),
                    created_at: Utc::now(),
                });
                Self::store(&path, &memory).await?;
                Ok(ToolResult::success(format!("Remembered ({} notes)", memory.notes.len())))
            }
            "list" => {
                let memory = Self::load(&path).await?;
                if memory.notes.is_empty() {
                    return Ok(ToolResult::success("No notes stored"));
                }
                let listing = memory
                    .notes
                    .iter()
                    .enumerate()
                    .map(|(i, note)| {
                        format!("{}. [{}] {}", i + 1, note.created_at.format("%Y-%m-%d"), note.content)
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(ToolResult::success(listing).with_metadata(json!({"count": memory.notes.len()})))
            }
            other => Err(ToolError::InvalidParams(format!("Unknown action '{}'", other))),
        }
    }
}
