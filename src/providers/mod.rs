//! Model providers.
//!
//! A [`ModelProvider`] turns the canonical conversation plus tool specs into
//! one assistant turn. Two wire protocols are supported:
//!
//! - **[`openai::OpenAiProvider`]**: OpenAI-compatible `/v1/chat/completions`
//!   with native function calls (arguments arrive as raw JSON text).
//!   Streaming uses server-sent events.
//! - **[`ollama::OllamaProvider`]**: Ollama `/api/chat` with normalized tool
//!   calls (arguments arrive decoded, ids are assigned locally). Streaming
//!   uses newline-delimited JSON.
//!
//! # Error classification
//!
//! | Condition | Variant |
//! |-----------|---------|
//! | HTTP 429 | [`ProviderError::RateLimited`] |
//! | other non-2xx | [`ProviderError::HttpStatus`] |
//! | connect/timeout/body error | [`ProviderError::Transport`] |
//! | unexpected payload | [`ProviderError::Decode`] |
//! | bad provider setup | [`ProviderError::Config`] |
//! | chunk sink refused a chunk | [`ProviderError::Cancelled`] |

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};
use crate::conversation::{Message, ToolCall};
use crate::observer::ChunkSink;
use crate::traits::ToolRegistry;

/// Failure of one provider round-trip.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited by {provider}{}", retry_after.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("unexpected HTTP status {status} from {url}: {snippet}")]
    HttpStatus {
        status: u16,
        url: String,
        snippet: String,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("stream cancelled by caller: {0}")]
    Cancelled(String),
}

impl ProviderError {
    /// Whether the orchestrator should switch to the fallback provider.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, ProviderError::Cancelled(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn from_registry(registry: &ToolRegistry) -> Vec<ToolSpec> {
        registry
            .tools()
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }
}

/// Everything a provider needs for one turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub max_output_tokens: u32,
}

/// One assistant turn in canonical form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider label, e.g. `"openai"`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<AssistantTurn>;

    /// Like [`complete`](ModelProvider::complete) but feeds assistant text to
    /// `sink` as it arrives. The returned turn holds the full text.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn ChunkSink,
    ) -> ProviderResult<AssistantTurn>;
}

/// Instantiate the provider described by `cfg`.
pub fn create_provider(cfg: &ProviderConfig) -> ProviderResult<Arc<dyn ModelProvider>> {
    match cfg.kind {
        ProviderKind::OpenAi => Ok(Arc::new(openai::OpenAiProvider::new(cfg)?)),
        ProviderKind::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(cfg)?)),
    }
}

pub(crate) fn http_client(cfg: &ProviderConfig) -> ProviderResult<reqwest::Client> {
    let endpoint = cfg.endpoint.trim();
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Err(ProviderError::Config(format!(
            "endpoint must start with http:// or https://, got '{}'",
            cfg.endpoint
        )));
    }
    Ok(reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
        .build()?)
}

/// First 240 characters of an error body.
pub(crate) fn snippet(text: &str) -> String {
    text.chars().take(240).collect()
}

/// Map a non-success response to an error, consuming its body.
pub(crate) async fn status_error(provider: &str, url: &str, resp: reqwest::Response) -> ProviderError {
    let status = resp.status();
    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        return ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        };
    }
    let text = resp.text().await.unwrap_or_default();
    ProviderError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
        snippet: snippet(&text),
    }
}

/// Splits a byte stream into complete lines.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and drain every complete line, without terminators.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever remains after the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        (!text.is_empty()).then_some(text)
    }
}

pub(crate) async fn emit(sink: &dyn ChunkSink, chunk: &str) -> ProviderResult<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    sink.on_chunk(chunk)
        .await
        .map_err(|e| ProviderError::Cancelled(format!("{:#}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_handles_split_lines() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        assert_eq!(buf.push(b":1}\r\ndata: [DONE]\n"), vec!["data: {\"a\":1}", "data: [DONE]"]);
        assert_eq!(buf.push(b"tail"), Vec::<String>::new());
        assert_eq!(buf.finish().as_deref(), Some("tail"));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_fallback_classification() {
        assert!(ProviderError::RateLimited {
            provider: "openai".into(),
            retry_after: Some(3)
        }
        .allows_fallback());
        assert!(ProviderError::Decode("x".into()).allows_fallback());
        assert!(!ProviderError::Cancelled("stop".into()).allows_fallback());
    }

    #[test]
    fn test_rate_limit_message() {
        let e = ProviderError::RateLimited {
            provider: "openai".into(),
            retry_after: Some(3),
        };
        assert_eq!(e.to_string(), "rate limited by openai (retry after 3s)");
    }
}
