//! Provider error classification

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures talking to a model provider.
///
/// Non-success responses are sorted by [`Error::from_status`] so callers can
/// ask two questions without string matching: is it worth retrying, and did
/// the prompt not fit.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-level failure before or during the response
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SSE error: {0}")]
    Sse(String),

    /// Non-success status that needs no special handling
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid or missing API key")]
    InvalidApiKey,

    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Classify a non-success HTTP response from its status and body
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_error_message(body);
        match status {
            401 | 403 => Error::Auth(message),
            429 => Error::RateLimited(message),
            413 => Error::ContextOverflow(message),
            _ if message_indicates_overflow(&message) => Error::ContextOverflow(message),
            // Anthropic reports overload as 529 and sometimes as 200-class error bodies
            _ if message.to_lowercase().contains("overloaded") => Error::RateLimited(message),
            _ => Error::Status { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Sse(_) | Error::RateLimited(_) => true,
            Error::Status { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_context_overflow(&self) -> bool {
        matches!(self, Error::ContextOverflow(_))
    }
}

/// Phrases providers use when the prompt exceeds the model's window
fn message_indicates_overflow(message: &str) -> bool {
    let msg = message.to_lowercase();
    [
        "context_length_exceeded",
        "context length",
        "context window",
        "prompt is too long",
        "too many tokens",
        "input too long",
        "reduce the length",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

/// Pull `error.message` out of a provider error body, falling back to the raw body
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
