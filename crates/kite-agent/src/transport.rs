//! Retry and error classification around a [`ModelClient`]

use std::{sync::Arc, sync::LazyLock, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use kite_ai::{ChatRequest, EventStream, Model, ModelClient, Result, StreamEvent};
use regex::Regex;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Check if a stream error message describes a transient failure
pub fn is_retryable_error(error: &str) -> bool {
    if is_context_overflow(error) {
        return false;
    }
    let lower = error.to_lowercase();
    ["429", "rate limit", "rate limited", "too many requests", "overloaded"]
        .iter()
        .chain(["timeout", "timed out", "connection", "http error", "sse error"].iter())
        .chain(["500", "502", "503", "504", "529"].iter())
        .any(|needle| lower.contains(needle))
}

/// Patterns providers use to report a prompt that does not fit the context window
static OVERFLOW_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)context.?length.?exceed",
        r"(?i)maximum.?context.?length",
        r"(?i)context.?window.?(exceed|full|limit)",
        r"(?i)too.?many.?tokens",
        r"(?i)prompt.?is.?too.?long",
        r"(?i)prompt.?too.?long",
        r"(?i)input.?too.?long",
        r"(?i)token.?limit.?(exceed|reach)",
        r"(?i)request.?too.?large",
        r"(?i)reduce.?the.?length",
        r"(?i)context.?overflow",
        r"(?i)exceeds?.+token.?limit",
        r"\b413\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Check if an error message indicates a context overflow
pub fn is_context_overflow(error: &str) -> bool {
    OVERFLOW_PATTERNS.iter().any(|re| re.is_match(error))
}

/// Wraps a client with exponential backoff.
///
/// A retryable failure to open the stream, or a retryable error event that
/// arrives before any content, restarts the request. Once content has been
/// forwarded the stream is never restarted.
pub struct RetryingClient {
    inner: Arc<dyn ModelClient>,
    config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn ModelClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ModelClient for RetryingClient {
    fn model(&self) -> &Model {
        self.inner.model()
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<EventStream> {
        let inner = Arc::clone(&self.inner);
        let config = self.config.clone();

        // Opening failures are retried here so non-retryable ones still surface as Err
        let mut attempt = 0;
        let mut stream = loop {
            match inner.chat_completion(request.clone()).await {
                Ok(stream) => break stream,
                Err(e) if e.is_retryable() && attempt < config.max_retries => {
                    let delay = config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Model request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt + 1,
                        config.max_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        Ok(Box::pin(stream! {
            loop {
                let first = stream.next().await;
                match first {
                    Some(StreamEvent::Error { message })
                        if attempt < config.max_retries && is_retryable_error(&message) =>
                    {
                        let delay = config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Model stream failed (attempt {}/{}), retrying in {:?}: {}",
                            attempt + 1,
                            config.max_retries,
                            delay,
                            message
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        match inner.chat_completion(request.clone()).await {
                            Ok(next) => stream = next,
                            Err(e) => {
                                yield StreamEvent::error(e.to_string());
                                return;
                            }
                        }
                    }
                    Some(event) => {
                        yield event;
                        while let Some(event) = stream.next().await {
                            yield event;
                        }
                        return;
                    }
                    None => return,
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_ai::Provider;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error("Rate limited: retry after None seconds"));
        assert!(is_retryable_error("API error: upstream (type: http_503)"));
        assert!(is_retryable_error("HTTP error: connection reset"));
        assert!(!is_retryable_error("Authentication failed: bad key"));
        assert!(!is_retryable_error("prompt is too long: 210000 tokens > 200000"));
    }

    #[test]
    fn test_is_context_overflow() {
        assert!(is_context_overflow("This model's maximum context length is 8192 tokens"));
        assert!(is_context_overflow("Context overflow: input too long"));
        assert!(is_context_overflow("status 413 payload"));
        assert!(!is_context_overflow("Invalid API key"));
    }

    /// Fails with a retryable error event a fixed number of times, then succeeds
    struct FlakyClient {
        model: Model,
        failures: u32,
        calls: AtomicU32,
        error: &'static str,
    }

    #[async_trait]
    impl ModelClient for FlakyClient {
        fn model(&self) -> &Model {
            &self.model
        }

        async fn chat_completion(&self, _request: ChatRequest) -> Result<EventStream> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = call < self.failures;
            let error = self.error;
            Ok(Box::pin(stream! {
                if fail {
                    yield StreamEvent::error(error);
                } else {
                    yield StreamEvent::TextDelta { content: "ok".into() };
                    yield StreamEvent::MessageComplete { finish_reason: None, usage: None };
                }
            }))
        }
    }

    fn flaky(failures: u32, error: &'static str) -> Arc<FlakyClient> {
        Arc::new(FlakyClient {
            model: Model::for_provider(Provider::Ollama, "test"),
            failures,
            calls: AtomicU32::new(0),
            error,
        })
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retries_transient_stream_error() {
        let inner = flaky(2, "API error: overloaded");
        let client = RetryingClient::new(inner.clone(), fast_config());

        let events: Vec<_> = client
            .chat_completion(ChatRequest::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(events[0], StreamEvent::TextDelta { content: "ok".into() });
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = flaky(10, "HTTP error: connection refused");
        let client = RetryingClient::new(inner.clone(), fast_config());

        let events: Vec<_> = client
            .chat_completion(ChatRequest::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_non_retryable_error_passes_through() {
        let inner = flaky(1, "Authentication failed: bad key");
        let client = RetryingClient::new(inner.clone(), fast_config());

        let events: Vec<_> = client
            .chat_completion(ChatRequest::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(events[0], StreamEvent::Error { .. }));
    }
}
