//! Token estimation

use kite_ai::Message;

/// Characters per token by model family, matched against the lowercased model id
const FAMILY_RATIOS: &[(&str, f32)] = &[
    ("claude", 3.5),
    ("gpt-", 4.0),
    ("o1", 4.0),
    ("o3", 4.0),
    ("o4", 4.0),
    ("gemini", 4.0),
    ("llama", 3.8),
    ("mistral", 3.6),
    ("qwen", 3.3),
    ("deepseek", 3.6),
];

/// Estimates token counts for text sent to a particular model
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum TokenCounter {
    /// Calibrated characters-per-token ratio for a known model family
    Calibrated { chars_per_token: f32 },
    /// `ceil(bytes / 4)` for unknown models
    #[default]
    ByteHeuristic,
}

impl TokenCounter {
    /// Pick a counter for `model_id`, falling back to the byte heuristic
    pub fn for_model(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        FAMILY_RATIOS
            .iter()
            .find(|(family, _)| id.contains(family))
            .map(|(_, ratio)| TokenCounter::Calibrated {
                chars_per_token: *ratio,
            })
            .unwrap_or(TokenCounter::ByteHeuristic)
    }

    pub fn count(&self, text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        let tokens = match self {
            TokenCounter::Calibrated { chars_per_token } => {
                (text.chars().count() as f32 / chars_per_token).ceil() as usize
            }
            TokenCounter::ByteHeuristic => text.len().div_ceil(4),
        };
        tokens.max(1) as u32
    }

    /// Tokens for a message's content plus any tool call names and arguments
    pub fn count_message(&self, message: &Message) -> u32 {
        let mut total = self.count(message.text());
        for call in message.tool_calls() {
            total += self.count(&call.name);
            total += self.count(&call.arguments.to_string());
        }
        total
    }
}
