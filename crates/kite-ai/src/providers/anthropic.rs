//! Anthropic Messages API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ChatRequest, ModelClient, describe_sse_error};
use crate::{
    error::{Error, Result},
    stream::{EventStream, StreamEvent, parse_arguments},
    types::{Message, Model, Role, ToolSchema, Usage},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    client: reqwest::Client,
    model: Model,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(model: Model, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model,
            api_key: api_key.into(),
        }
    }

    fn build_request(&self, request: &ChatRequest) -> AnthropicRequest {
        let system = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n\n");

        AnthropicRequest {
            model: self.model.id.clone(),
            messages: convert_messages(&request.messages),
            max_tokens: request.max_tokens.unwrap_or(self.model.max_tokens),
            stream: true,
            system: (!system.is_empty()).then(|| {
                vec![SystemBlock {
                    block_type: "text".to_string(),
                    text: system,
                    cache_control: Some(CacheControl {
                        control_type: "ephemeral".to_string(),
                    }),
                }]
            }),
            tools: request
                .tools
                .as_ref()
                .map(|tools| tools.iter().map(convert_tool).collect()),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<EventStream> {
        let body = self.build_request(&request);
        let url = format!("{}/v1/messages", self.model.base_url.trim_end_matches('/'));
        tracing::debug!(url = %url, messages = body.messages.len(), "Anthropic request");

        let builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let event_source = EventSource::new(builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

/// Tracks open content blocks by index
#[derive(Debug, Default)]
enum Block {
    #[default]
    Other,
    Text,
    ToolUse {
        id: String,
        name: String,
        arguments: String,
    },
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
        let mut blocks: Vec<Block> = Vec::new();
        let mut usage = Usage::default();
        let mut finish_reason: Option<String> = None;

        while let Some(event) = event_source.next().await {
            let message = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(message)) => message,
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    let err = describe_sse_error(e).await;
                    yield StreamEvent::error(err.to_string());
                    return;
                }
            };

            match message.event.as_str() {
                "message_start" => {
                    if let Ok(data) = serde_json::from_str::<MessageStartEvent>(&message.data) {
                        usage.prompt_tokens = data.message.usage.input_tokens;
                        usage.cached_tokens = data.message.usage.cache_read_input_tokens.unwrap_or(0);
                        usage.completion_tokens = data.message.usage.output_tokens;
                    }
                }
                "content_block_start" => {
                    if let Ok(data) = serde_json::from_str::<ContentBlockStartEvent>(&message.data) {
                        let index = data.index;
                        while blocks.len() <= index {
                            blocks.push(Block::default());
                        }
                        match data.content_block.block_type.as_str() {
                            "text" => blocks[index] = Block::Text,
                            "tool_use" => {
                                let id = data.content_block.id.unwrap_or_default();
                                let name = data.content_block.name.unwrap_or_default();
                                yield StreamEvent::ToolCallStart {
                                    call_id: id.clone(),
                                    name: name.clone(),
                                };
                                blocks[index] = Block::ToolUse {
                                    id,
                                    name,
                                    arguments: String::new(),
                                };
                            }
                            _ => {}
                        }
                    }
                }
                "content_block_delta" => {
                    if let Ok(data) = serde_json::from_str::<ContentBlockDeltaEvent>(&message.data) {
                        match (blocks.get_mut(data.index), data.delta.delta_type.as_str()) {
                            (Some(Block::Text), "text_delta") => {
                                let content = data.delta.text.unwrap_or_default();
                                if !content.is_empty() {
                                    yield StreamEvent::TextDelta { content };
                                }
                            }
                            (Some(Block::ToolUse { id, arguments, .. }), "input_json_delta") => {
                                let delta = data.delta.partial_json.unwrap_or_default();
                                arguments.push_str(&delta);
                                let call_id = id.clone();
                                yield StreamEvent::ToolCallDelta {
                                    call_id,
                                    arguments_delta: delta,
                                };
                            }
                            _ => {}
                        }
                    }
                }
                "content_block_stop" => {
                    if let Ok(data) = serde_json::from_str::<ContentBlockStopEvent>(&message.data) {
                        if let Some(block) = blocks.get_mut(data.index) {
                            if let Block::ToolUse { id, name, arguments } = std::mem::take(block) {
                                yield StreamEvent::ToolCallComplete {
                                    call_id: id,
                                    name,
                                    arguments: parse_arguments(&arguments),
                                };
                            }
                        }
                    }
                }
                "message_delta" => {
                    if let Ok(data) = serde_json::from_str::<MessageDeltaEvent>(&message.data) {
                        if let Some(reason) = data.delta.stop_reason {
                            finish_reason = Some(reason);
                        }
                        usage.completion_tokens = data.usage.output_tokens;
                    }
                }
                "message_stop" => break,
                "error" => {
                    event_source.close();
                    let text = serde_json::from_str::<ErrorEvent>(&message.data)
                        .map(|e| e.error.message)
                        .unwrap_or(message.data);
                    yield StreamEvent::error(text);
                    return;
                }
                _ => {}
            }
        }
        event_source.close();

        usage.total_tokens = usage.prompt_tokens + usage.cached_tokens + usage.completion_tokens;
        yield StreamEvent::MessageComplete {
            finish_reason,
            usage: Some(usage),
        };
    }
}

/// Convert history to Anthropic messages. Consecutive tool results are merged
/// into one user message of `tool_result` blocks.
fn convert_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => result.push(AnthropicMessage {
                role: "user".to_string(),
                content: vec![json!({ "type": "text", "text": message.text() })],
            }),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for call in message.tool_calls() {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                if !blocks.is_empty() {
                    result.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content: blocks,
                    });
                }
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.as_deref().unwrap_or_default(),
                    "content": message.text(),
                });
                match result.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last.content.iter().all(|b| b["type"] == "tool_result") =>
                    {
                        last.content.push(block);
                    }
                    _ => result.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: vec![block],
                    }),
                }
            }
        }
    }

    result
}

fn convert_tool(tool: &ToolSchema) -> AnthropicTool {
    let mut input_schema = if tool.parameters.is_object() {
        tool.parameters.clone()
    } else {
        json!({ "properties": {} })
    };
    if let Some(obj) = input_schema.as_object_mut() {
        obj.entry("type").or_insert(json!("object"));
    }

    AnthropicTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema,
    }
}

// Request types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: String,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

// Response event types

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: ContentBlockInfo,
}

#[derive(Debug, Deserialize)]
struct ContentBlockInfo {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: DeltaInfo,
}

#[derive(Debug, Deserialize)]
struct DeltaInfo {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStopEvent {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
