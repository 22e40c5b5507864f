//! Error types for kite-agent

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Agent errors
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Ai(#[from] kite_ai::Error),

    #[error("Compaction error: {0}")]
    Compaction(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
