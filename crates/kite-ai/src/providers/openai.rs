//! OpenAI-compatible Chat Completions provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::{ChatRequest, ModelClient, describe_sse_error};
use crate::{
    error::{Error, Result},
    stream::{EventStream, StreamEvent, parse_arguments, synthesize_call_id},
    types::{Message, Model, Role, ToolSchema, Usage},
};

/// Client for the Chat Completions API and compatible servers
pub struct OpenAIClient {
    client: reqwest::Client,
    model: Model,
    api_key: String,
}

impl OpenAIClient {
    pub fn new(model: Model, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model,
            api_key: api_key.into(),
        }
    }

    fn build_request(&self, request: &ChatRequest) -> OpenAIRequest {
        let messages = request.messages.iter().map(convert_message).collect();
        let tools = request
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(convert_tool).collect::<Vec<_>>());
        let has_tools = tools.is_some();

        OpenAIRequest {
            model: self.model.id.clone(),
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            max_tokens: Some(request.max_tokens.unwrap_or(self.model.max_tokens)),
            tools,
            tool_choice: has_tools.then(|| serde_json::json!("auto")),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    fn model(&self) -> &Model {
        &self.model
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<EventStream> {
        let body = self.build_request(&request);
        let url = format!("{}/chat/completions", self.model.base_url.trim_end_matches('/'));
        tracing::debug!(url = %url, messages = body.messages.len(), "OpenAI request");

        let mut builder = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let event_source = EventSource::new(builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

fn convert_message(msg: &Message) -> OpenAIMessage {
    let tool_calls = msg.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|call| OpenAIToolCall {
                id: call.id.clone(),
                call_type: "function".to_string(),
                function: OpenAIFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect()
    });

    OpenAIMessage {
        role: msg.role.as_str().to_string(),
        // Tool messages must always carry content
        content: match msg.role {
            Role::Tool => Some(msg.text().to_string()),
            _ => msg.content.clone(),
        },
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn convert_tool(tool: &ToolSchema) -> OpenAITool {
    OpenAITool {
        tool_type: "function".to_string(),
        function: OpenAIFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    started: bool,
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = StreamEvent> {
    stream! {
        // Indexed by the provider's tool call index
        let mut calls: Vec<PartialCall> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<Usage> = None;

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: StreamChunk = match serde_json::from_str(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            event_source.close();
                            yield StreamEvent::error(format!("Failed to parse chunk: {}", e));
                            return;
                        }
                    };

                    if let Some(err) = chunk.error {
                        event_source.close();
                        yield StreamEvent::error(err.message);
                        return;
                    }

                    for choice in &chunk.choices {
                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty() {
                                yield StreamEvent::TextDelta { content: content.clone() };
                            }
                        }

                        for tc in choice.delta.tool_calls.iter().flatten() {
                            let idx = tc.index;
                            while calls.len() <= idx {
                                calls.push(PartialCall::default());
                            }
                            let call = &mut calls[idx];
                            if let Some(ref id) = tc.id {
                                call.id = id.clone();
                            }
                            if let Some(ref function) = tc.function {
                                if let Some(ref name) = function.name {
                                    call.name = name.clone();
                                }
                            }
                            if !call.started && !call.name.is_empty() {
                                call.started = true;
                                if call.id.is_empty() {
                                    call.id = synthesize_call_id();
                                }
                                yield StreamEvent::ToolCallStart {
                                    call_id: call.id.clone(),
                                    name: call.name.clone(),
                                };
                            }
                            if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref()) {
                                call.arguments.push_str(args);
                                if call.started && !args.is_empty() {
                                    yield StreamEvent::ToolCallDelta {
                                        call_id: call.id.clone(),
                                        arguments_delta: args.clone(),
                                    };
                                }
                            }
                        }

                        if let Some(ref reason) = choice.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(u) = chunk.usage {
                        usage = Some(Usage {
                            prompt_tokens: u.prompt_tokens,
                            completion_tokens: u.completion_tokens,
                            total_tokens: u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens),
                            cached_tokens: u
                                .prompt_tokens_details
                                .and_then(|d| d.cached_tokens)
                                .unwrap_or(0),
                        });
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    let err = describe_sse_error(e).await;
                    yield StreamEvent::error(err.to_string());
                    return;
                }
            }
        }
        event_source.close();

        for call in calls.into_iter().filter(|c| c.started) {
            yield StreamEvent::ToolCallComplete {
                call_id: call.id,
                name: call.name,
                arguments: parse_arguments(&call.arguments),
            };
        }

        yield StreamEvent::MessageComplete { finish_reason, usage };
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: Option<u64>,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<u64>,
}
