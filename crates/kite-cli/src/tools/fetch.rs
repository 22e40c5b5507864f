//! Web fetch tool

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use kite_agent::tool::{Tool, ToolError, ToolResult, required_str};
use regex::Regex;
use serde_json::json;

const MAX_CONTENT_CHARS: usize = 50_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static SCRIPT_OR_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n(\s*\n)+").expect("valid regex"));

/// Tool for fetching a URL over HTTP(S)
#[derive(Default)]
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reduce an HTML page to its visible text
fn html_to_text(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, "");
    let text = TAG.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    BLANK_LINES.replace_all(text.trim(), "\n\n").to_string()
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch the contents of a web page or HTTP resource. HTML is reduced to plain text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The http or https URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: serde_json::Value, _cwd: &Path) -> Result<ToolResult, ToolError> {
        let raw = required_str(&params, "url")?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| ToolError::InvalidParams(format!("Invalid URL '{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidParams(format!(
                "Unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolError::failed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::failed(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Ok(ToolResult::failure(format!("HTTP {}", status))
                .with_output(crate::utils::truncate_chars(&body, 2_000))
                .with_metadata(json!({"status": status.as_u16()})));
        }

        let content = if is_html { html_to_text(&body) } else { body };
        let total_chars = content.chars().count();
        let truncated = total_chars > MAX_CONTENT_CHARS;
        let mut output: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        if truncated {
            output.push_str(&format!(
                "\n\n... (content truncated at {} of {} characters)",
                MAX_CONTENT_CHARS, total_chars
            ));
        }

        Ok(ToolResult::success(output)
            .with_truncated(truncated)
            .with_metadata(json!({"url": raw, "status": status.as_u16()})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port
    async fn serve_once(status: &'static str, content_type: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/page", addr)
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><style>p{}</style></head><body><h1>Title</h1><p>a &amp; b</p></body></html>";
        assert_eq!(html_to_text(html), "Titlea & b");
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let url = serve_once("200 OK", "text/html", "<p>hello</p>".to_string()).await;
        let result = WebFetchTool::new()
            .execute(json!({"url": url}), Path::new("."))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let url = serve_once("404 Not Found", "text/plain", "missing".to_string()).await;
        let result = WebFetchTool::new()
            .execute(json!({"url": url}), Path::new("."))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_long_body_truncated() {
        let url = serve_once("200 OK", "text/plain", "x".repeat(MAX_CONTENT_CHARS + 10)).await;
        let result = WebFetchTool::new()
            .execute(json!({"url": url}), Path::new("."))
            .await
            .unwrap();
        assert_eq!(result.truncated, Some(true));
        assert!(result.output.contains("content truncated"));
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let err = WebFetchTool::new()
            .execute(json!({"url": "file:///etc/passwd"}), Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
