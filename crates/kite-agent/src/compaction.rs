//! Context compaction for long conversations
//!
//! When a conversation approaches the model's context window, the whole
//! history is rendered as a plain-text transcript, summarized by a side
//! request, and replaced with a short context restoration exchange.

use kite_ai::{ChatRequest, Message, ModelClient, Role, complete_text};

use crate::context::ContextManager;
use crate::error::{Error, Result};

/// Per-section ceilings that bound the size of the summarization request
const MAX_TOOL_RESULT_CHARS: usize = 2000;
const MAX_ASSISTANT_CHARS: usize = 3000;
const MAX_USER_CHARS: usize = 1500;
const MAX_ARGUMENT_CHARS: usize = 500;

/// Output cap for the summary itself
const SUMMARY_MAX_TOKENS: u32 = 4096;

const READ_TOOLS: &[&str] = &["read", "glob"];
const WRITE_TOOLS: &[&str] = &["write", "edit"];

const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a specialized summarization model. Your task is to compress a coding session \
into a summary that replaces the original messages in the agent's context. Capture \
everything needed to continue the work without the original transcript.";

const SUMMARIZATION_PROMPT: &str = "\
Summarize the session below. Structure the summary with these headers:

1. **Goal**: What is the user's primary objective?
2. **Progress**: What has been accomplished so far? List specific changes made.
3. **Key Decisions**: What important technical decisions were made and why?
4. **Next Steps**: What was about to happen next?
5. **Critical Context**: Constraints, preferences, errors encountered, anything that would be lost.
6. **Files Read**: {read_files}
7. **Files Modified**: {modified_files}

Be thorough but concise.

<transcript>
{transcript}
</transcript>";

/// Outcome of a successful compaction
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionSummary {
    pub summary: String,
    /// Estimated history tokens before replacement
    pub tokens_before: u64,
    /// Estimated history tokens after replacement
    pub tokens_after: u64,
}

/// Summarize the history with `client` and replace it with the summary.
///
/// On error the history is untouched; callers treat the error as a skipped
/// compaction.
pub async fn compact(
    context: &mut ContextManager,
    client: &dyn ModelClient,
) -> Result<CompactionSummary> {
    if context.is_empty() {
        return Err(Error::Compaction("nothing to compact".into()));
    }

    let tokens_before = context.estimated_tokens();
    let request = build_request(context.messages());

    let summary = complete_text(client, request)
        .await
        .map_err(|e| Error::Compaction(e.to_string()))?;

    context.replace_with_summary(&summary);
    let tokens_after = context.estimated_tokens();

    tracing::info!(tokens_before, tokens_after, "Compacted conversation");

    Ok(CompactionSummary {
        summary,
        tokens_before,
        tokens_after,
    })
}

fn build_request(messages: &[Message]) -> ChatRequest {
    let (read_files, modified_files) = file_operations(messages);
    let prompt = SUMMARIZATION_PROMPT
        .replace("{read_files}", &list_or_none(&read_files))
        .replace("{modified_files}", &list_or_none(&modified_files))
        .replace("{transcript}", &format_transcript(messages));

    ChatRequest {
        messages: vec![
            Message::system(SUMMARIZATION_SYSTEM_PROMPT),
            Message::user(prompt),
        ],
        tools: None,
        max_tokens: Some(SUMMARY_MAX_TOKENS),
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Render history as role-tagged plain text. The bracketed format keeps the
/// summarizer from trying to continue the conversation itself.
pub fn format_transcript(messages: &[Message]) -> String {
    let mut out = String::new();

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    out.push_str("[User]: ");
                    out.push_str(&truncate(text, MAX_USER_CHARS));
                    out.push('\n');
                }
            }
            Role::Assistant => {
                let text = message.text();
                if !text.is_empty() {
                    out.push_str("[Assistant]: ");
                    out.push_str(&truncate(text, MAX_ASSISTANT_CHARS));
                    out.push('\n');
                }
                let calls: Vec<String> = message
                    .tool_calls()
                    .iter()
                    .map(|call| {
                        format!(
                            "{}({})",
                            call.name,
                            truncate(&call.arguments.to_string(), MAX_ARGUMENT_CHARS)
                        )
                    })
                    .collect();
                if !calls.is_empty() {
                    out.push_str("[Assistant tool calls]: ");
                    out.push_str(&calls.join("; "));
                    out.push('\n');
                }
            }
            Role::Tool => {
                let name = message.tool_name.as_deref().unwrap_or("unknown");
                out.push_str(&format!("[Tool result ({})]: ", name));
                out.push_str(&truncate(message.text(), MAX_TOOL_RESULT_CHARS));
                out.push('\n');
            }
        }
    }

    out
}

/// Cut `text` to at most `max` characters on a char boundary
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...(truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

/// Paths touched by file tools, deduplicated in first-seen order
fn file_operations(messages: &[Message]) -> (Vec<String>, Vec<String>) {
    let mut read_files: Vec<String> = Vec::new();
    let mut modified_files: Vec<String> = Vec::new();

    for call in messages.iter().flat_map(|m| m.tool_calls()) {
        let Some(path) = call.arguments.get("path").and_then(|v| v.as_str()) else {
            continue;
        };
        let target = if READ_TOOLS.contains(&call.name.as_str()) {
            &mut read_files
        } else if WRITE_TOOLS.contains(&call.name.as_str()) {
            &mut modified_files
        } else {
            continue;
        };
        if !target.iter().any(|p| p == path) {
            target.push(path.to_string());
        }
    }

    (read_files, modified_files)
}
