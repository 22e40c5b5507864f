//! Model client trait and provider implementations

pub mod anthropic;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    error::{Error, Result},
    stream::{EventStream, StreamEvent},
    types::{Api, Message, Model, ToolSchema},
};

/// One request to a model
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Full history, system message first if present
    pub messages: Vec<Message>,
    /// Tools the model may call; `None` disables tool use
    pub tools: Option<Vec<ToolSchema>>,
    /// Override the model's default output token cap
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }
}

/// Streaming bridge to a model provider
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// The model requests are sent to
    fn model(&self) -> &Model;

    /// Send a request and stream the response
    async fn chat_completion(&self, request: ChatRequest) -> Result<EventStream>;
}

/// Run a request to completion and return only its text.
///
/// Used for side requests (planning, summarization) that do not stream
/// to the user. An error event or an empty response is an error.
pub async fn complete_text(client: &dyn ModelClient, request: ChatRequest) -> Result<String> {
    let mut stream = client.chat_completion(request).await?;
    let mut text = String::new();

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::TextDelta { content } => text.push_str(&content),
            StreamEvent::Error { message } => return Err(Error::UnexpectedResponse(message)),
            StreamEvent::MessageComplete { .. } => break,
            _ => {}
        }
    }

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(Error::UnexpectedResponse("model returned no text".into()));
    }
    Ok(text)
}

/// Create the client matching `model.api`
pub fn create_client(model: Model, api_key: Option<String>) -> Result<Arc<dyn ModelClient>> {
    if model.base_url.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "no base URL configured for provider {}",
            model.provider.name()
        )));
    }

    let key = match (api_key, model.provider.requires_api_key()) {
        (Some(key), _) => key,
        (None, false) => String::new(),
        (None, true) => return Err(Error::InvalidApiKey),
    };

    Ok(match model.api {
        Api::AnthropicMessages => Arc::new(anthropic::AnthropicClient::new(model, key)),
        Api::OpenAICompletions => Arc::new(openai::OpenAIClient::new(model, key)),
    })
}

/// Turn an event source failure into a typed error, reading the response
/// body for non-success statuses
pub(crate) async fn describe_sse_error(err: reqwest_eventsource::Error) -> Error {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            Error::from_status(status.as_u16(), &body)
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provider;
    use async_stream::stream;

    struct CannedClient {
        model: Model,
        events: Vec<StreamEvent>,
    }

    #[async_trait]
    impl ModelClient for CannedClient {
        fn model(&self) -> &Model {
            &self.model
        }

        async fn chat_completion(&self, _request: ChatRequest) -> Result<EventStream> {
            let events = self.events.clone();
            Ok(Box::pin(stream! {
                for event in events {
                    yield event;
                }
            }))
        }
    }

    fn canned(events: Vec<StreamEvent>) -> CannedClient {
        CannedClient {
            model: Model::for_provider(Provider::Ollama, "test"),
            events,
        }
    }

    #[tokio::test]
    async fn test_complete_text_collects_deltas() {
        let client = canned(vec![
            StreamEvent::TextDelta {
                content: "- step one\n".into(),
            },
            StreamEvent::TextDelta {
                content: "- step two".into(),
            },
            StreamEvent::MessageComplete {
                finish_reason: Some("stop".into()),
                usage: None,
            },
        ]);
        let text = complete_text(&client, ChatRequest::default()).await.unwrap();
        assert_eq!(text, "- step one\n- step two");
    }

    #[tokio::test]
    async fn test_complete_text_errors() {
        let client = canned(vec![StreamEvent::error("boom")]);
        assert!(complete_text(&client, ChatRequest::default()).await.is_err());

        let client = canned(vec![StreamEvent::MessageComplete {
            finish_reason: None,
            usage: None,
        }]);
        assert!(complete_text(&client, ChatRequest::default()).await.is_err());
    }

    #[test]
    fn test_with_tools_empty_is_none() {
        let request = ChatRequest::new(vec![]).with_tools(vec![]);
        assert!(request.tools.is_none());
    }

    #[test]
    fn test_create_client_requires_key() {
        let model = Model::for_provider(Provider::OpenAI, "gpt-4o");
        assert!(matches!(
            create_client(model.clone(), None),
            Err(Error::InvalidApiKey)
        ));
        assert!(create_client(model, Some("sk-test".into())).is_ok());

        let local = Model::for_provider(Provider::Ollama, "llama3");
        assert!(create_client(local, None).is_ok());
    }
}
