//! Streaming event types and utilities

use crate::types::{ToolCall, Usage};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a model response streams in.
///
/// A well-formed stream ends with exactly one terminal event,
/// [`StreamEvent::MessageComplete`] or [`StreamEvent::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text
    TextDelta { content: String },
    /// A tool call began
    ToolCallStart { call_id: String, name: String },
    /// A fragment of a tool call's JSON arguments
    ToolCallDelta {
        call_id: String,
        arguments_delta: String,
    },
    /// A tool call's arguments are complete
    ToolCallComplete {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The response finished
    MessageComplete {
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    /// The request or stream failed
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::MessageComplete { .. } | StreamEvent::Error { .. }
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }
}

/// A stream of model events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug)]
struct PendingCall {
    call_id: String,
    name: String,
    arguments: String,
    completed: Option<ToolCall>,
}

/// Reassembles streamed tool call fragments into complete [`ToolCall`]s.
///
/// Calls are returned in the order they started. A call that started but
/// never completed is dropped by [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PendingCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream event. Non tool-call events are ignored.
    pub fn process_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolCallStart { call_id, name } => {
                if self.position(call_id).is_none() {
                    self.calls.push(PendingCall {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                        completed: None,
                    });
                }
            }
            StreamEvent::ToolCallDelta {
                call_id,
                arguments_delta,
            } => {
                if let Some(idx) = self.position(call_id) {
                    self.calls[idx].arguments.push_str(arguments_delta);
                }
            }
            StreamEvent::ToolCallComplete {
                call_id,
                name,
                arguments,
            } => {
                let idx = match self.position(call_id) {
                    Some(idx) => idx,
                    None => {
                        self.calls.push(PendingCall {
                            call_id: call_id.clone(),
                            name: name.clone(),
                            arguments: String::new(),
                            completed: None,
                        });
                        self.calls.len() - 1
                    }
                };
                let id = if call_id.is_empty() {
                    synthesize_call_id()
                } else {
                    call_id.clone()
                };
                self.calls[idx].completed = Some(ToolCall::new(id, name.clone(), arguments.clone()));
            }
            _ => {}
        }
    }

    /// Number of calls that have completed so far
    pub fn completed_count(&self) -> usize {
        self.calls.iter().filter(|c| c.completed.is_some()).count()
    }

    /// Consume the accumulator, yielding completed calls in start order
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter_map(|call| {
                if call.completed.is_none() {
                    tracing::warn!(
                        call_id = %call.call_id,
                        name = %call.name,
                        partial_len = call.arguments.len(),
                        "Dropping tool call that never completed"
                    );
                }
                call.completed
            })
            .collect()
    }

    fn position(&self, call_id: &str) -> Option<usize> {
        if call_id.is_empty() {
            return None;
        }
        self.calls.iter().position(|c| c.call_id == call_id)
    }
}

/// Generate a call id for providers that omit one
pub fn synthesize_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Parse accumulated argument JSON, treating blank input as an empty object
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("Tool call arguments are not valid JSON: {}", e);
        serde_json::json!({})
    })
}
