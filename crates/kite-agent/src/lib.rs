//! kite-agent: the autonomous agent loop
//!
//! This crate drives multi-turn conversations with a model: it streams each
//! turn, dispatches tool calls through an approval-gated registry, keeps the
//! history within the context window by compaction and pruning, and breaks
//! out of repetitive behavior.

pub mod agent;
pub mod approval;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod hooks;
pub mod loop_detector;
pub mod registry;
pub mod session;
pub mod subagent;
pub mod tokens;
pub mod tool;
pub mod transport;

pub use agent::Agent;
pub use approval::{ApprovalDecision, ApprovalManager, ApprovalPolicy};
pub use compaction::CompactionSummary;
pub use config::AgentConfig;
pub use context::ContextManager;
pub use error::{Error, Result};
pub use events::{AgentEvent, EventSink, RunOutcome};
pub use hooks::{CommandHooks, HookContext, HookTrigger, Hooks, NoHooks};
pub use registry::{ConfirmationRequest, Confirmer, ToolRegistry};
pub use session::{Session, SessionSnapshot};
pub use subagent::SubagentTool;
pub use tokens::TokenCounter;
pub use tool::{BoxedTool, Confirmation, Tool, ToolError, ToolResult};
pub use transport::{RetryConfig, RetryingClient};
