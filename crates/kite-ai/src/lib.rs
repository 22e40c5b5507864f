//! kite-ai: streaming model client abstraction
//!
//! Provides the message and usage types shared by the agent, the stream event
//! contract every provider honors, and clients for the Anthropic Messages and
//! OpenAI-compatible Chat Completions APIs.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{ChatRequest, ModelClient, complete_text, create_client};
pub use stream::{EventStream, StreamEvent, ToolCallAccumulator};
pub use types::*;
