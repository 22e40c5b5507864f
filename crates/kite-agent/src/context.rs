//! Conversation history with token accounting, compaction and pruning

use kite_ai::{Message, Role, ToolCall, Usage};

use crate::tokens::TokenCounter;

/// Fraction of the context window at which compaction is triggered
pub const COMPRESSION_THRESHOLD: f64 = 0.8;

/// Most recent tool output, in tokens, that pruning never touches
pub const PRUNE_PROTECT_TOKENS: u32 = 40_000;

/// Pruning only runs when it would free more than this many tokens
pub const PRUNE_MINIMUM_TOKENS: u32 = 20_000;

/// Replaces the content of pruned tool results
pub const PRUNED_PLACEHOLDER: &str = "[Old tool result content cleared]";

const RESTORATION_PREFIX: &str = "This session is being continued from a previous conversation \
that ran out of context. The summary below covers the earlier portion of the conversation.";

const RESTORATION_ACK: &str =
    "Understood. I have the context from the summary and will continue from where we left off.";

const CONTINUE_PROMPT: &str =
    "Please continue with the task from where you left off, without asking further questions.";

/// Ordered conversation history owned by a single agent loop
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    system_prompt: Option<String>,
    messages: Vec<Message>,
    counter: TokenCounter,
    /// Usage of the most recent turn
    latest_usage: Usage,
    /// Sum of every turn's usage
    total_usage: Usage,
}

impl ContextManager {
    pub fn new(counter: TokenCounter) -> Self {
        Self {
            counter,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.system_prompt = prompt;
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn counter(&self) -> TokenCounter {
        self.counter
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.append(Message::user(text));
    }

    /// Append an assistant message; an empty tool call list is stored as `None`
    pub fn add_assistant_message(&mut self, content: Option<String>, tool_calls: Vec<ToolCall>) {
        self.append(Message::assistant(content, tool_calls));
    }

    pub fn add_tool_result(
        &mut self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.append(Message::tool_result(tool_call_id, tool_name, content));
    }

    /// Append a message, caching its token count. System messages are not
    /// stored in history; the system prompt is held separately.
    pub fn append(&mut self, mut message: Message) {
        if message.role == Role::System {
            tracing::debug!("Ignoring system message appended to history");
            return;
        }
        message.token_count = self.counter.count_message(&message);
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The system prompt followed by every retained message
    pub fn request_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref prompt) = self.system_prompt {
            out.push(Message::system(prompt.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Sum of cached message token counts plus the system prompt
    pub fn estimated_tokens(&self) -> u64 {
        let system = self
            .system_prompt
            .as_deref()
            .map(|p| self.counter.count(p))
            .unwrap_or(0);
        self.messages
            .iter()
            .map(|m| u64::from(m.token_count))
            .sum::<u64>()
            + u64::from(system)
    }

    /// Record one turn's usage as the latest and add it to the running total
    pub fn record_usage(&mut self, usage: &Usage) {
        self.latest_usage = *usage;
        self.total_usage.add(usage);
    }

    pub fn latest_usage(&self) -> &Usage {
        &self.latest_usage
    }

    pub fn total_usage(&self) -> &Usage {
        &self.total_usage
    }

    /// Restore the running total from a saved session
    pub fn restore_total_usage(&mut self, usage: Usage) {
        self.total_usage = usage;
    }

    /// Whether the context has grown past the compaction threshold
    pub fn needs_compression(&self, context_window: u32) -> bool {
        let used = self.latest_usage.total_tokens.max(self.estimated_tokens());
        used as f64 > f64::from(context_window) * COMPRESSION_THRESHOLD
    }

    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Replace the whole history with a summary: a context restoration user
    /// message, an assistant acknowledgment and a continue instruction
    pub fn replace_with_summary(&mut self, summary: &str) {
        self.messages.clear();
        self.add_user_message(format!(
            "{}\n\n<summary>\n{}\n</summary>",
            RESTORATION_PREFIX, summary
        ));
        self.add_assistant_message(Some(RESTORATION_ACK.to_string()), vec![]);
        self.add_user_message(CONTINUE_PROMPT);
        // The last reported usage describes the discarded history
        self.latest_usage = Usage::default();
    }

    /// Drop all history, keeping cumulative usage
    pub fn clear(&mut self) {
        self.messages.clear();
        self.latest_usage = Usage::default();
    }

    /// Clear old tool output once the recent tool output exceeds
    /// [`PRUNE_PROTECT_TOKENS`]. Returns the number of messages pruned.
    pub fn prune_tool_outputs(&mut self) -> usize {
        if self.user_message_count() < 2 {
            return 0;
        }

        let mut seen: u32 = 0;
        let mut candidate_tokens: u32 = 0;
        let mut candidates = Vec::new();

        for (idx, message) in self.messages.iter().enumerate().rev() {
            if message.role != Role::Tool {
                continue;
            }
            if message.is_pruned() {
                break;
            }
            if seen > PRUNE_PROTECT_TOKENS {
                candidates.push(idx);
                candidate_tokens += message.token_count;
            }
            seen += message.token_count;
        }

        if candidate_tokens <= PRUNE_MINIMUM_TOKENS {
            return 0;
        }

        let now = chrono::Utc::now().timestamp_millis();
        let placeholder_tokens = self.counter.count(PRUNED_PLACEHOLDER);
        for &idx in &candidates {
            let message = &mut self.messages[idx];
            message.content = Some(PRUNED_PLACEHOLDER.to_string());
            message.token_count = placeholder_tokens;
            message.pruned_at = Some(now);
        }

        tracing::info!(
            messages = candidates.len(),
            tokens = candidate_tokens,
            "Pruned old tool output"
        );
        candidates.len()
    }
}
