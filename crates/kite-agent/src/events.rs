//! Agent event types and the channel they travel through

use kite_ai::Usage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::tool::ToolResult;

/// How a run of [`crate::Agent::prompt`] ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model answered without requesting tools
    Completed { text: String },
    /// The turn cap was hit
    LimitReached { max_turns: u32 },
    /// The model stream failed
    Failed { error: String },
    /// The event consumer went away
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Events emitted during agent execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent started processing a user message
    AgentStart,

    /// A new turn started
    TurnStart { turn: u32 },

    /// The up-front plan produced when autoplan is enabled
    PlanReady { text: String },

    /// Streamed assistant text
    TextDelta { content: String },

    /// The model began a tool call; arguments are still streaming
    ToolCallPending { call_id: String, name: String },

    /// A fragment of a pending tool call's arguments
    ToolCallArguments { call_id: String, delta: String },

    /// Tool dispatch started
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool dispatch finished
    ToolCallCompleted {
        call_id: String,
        name: String,
        result: ToolResult,
    },

    /// A repeated or cyclic action pattern was detected
    LoopDetected { description: String },

    /// History was replaced by a summary
    Compacted { tokens_before: u64, tokens_after: u64 },

    /// A turn completed
    TurnEnd { turn: u32, usage: Usage },

    /// Turn-level error
    Error { message: String },

    /// The turn cap was hit
    LimitReached { max_turns: u32 },

    /// Agent finished processing; always the last event of a run
    AgentEnd { outcome: RunOutcome, usage: Usage },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::AgentEnd { .. })
    }
}

/// Producer side of the event channel.
///
/// Dropping the receiver cancels the run at its next checkpoint.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSink {
    /// Create a bounded channel of `capacity` events
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Send an event, waiting for capacity. Send failures mean the consumer
    /// is gone and are ignored; the loop notices via [`EventSink::is_closed`].
    pub async fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let value = serde_json::to_value(AgentEvent::TurnStart { turn: 2 }).unwrap();
        assert_eq!(value["type"], "turn_start");
        assert_eq!(value["turn"], 2);

        let value = serde_json::to_value(AgentEvent::AgentEnd {
            outcome: RunOutcome::LimitReached { max_turns: 5 },
            usage: Usage::default(),
        })
        .unwrap();
        assert_eq!(value["type"], "agent_end");
        assert_eq!(value["outcome"]["status"], "limit_reached");
    }

    #[tokio::test]
    async fn test_sink_closed_after_receiver_drop() {
        let (sink, rx) = EventSink::channel(4);
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        // Emitting into a closed channel is silently ignored
        sink.emit(AgentEvent::AgentStart).await;
    }
}
