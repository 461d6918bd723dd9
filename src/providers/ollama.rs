//! Ollama chat API.
//!
//! POST `{endpoint}/api/chat`. Ollama returns tool calls with decoded
//! argument objects and no ids, so each call gets a fresh `call_<uuid>` id
//! and is carried as [`ToolCall::NormalizedToolCall`]. Streaming responses
//! are newline-delimited JSON objects; the last one has `"done": true`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

use super::{
    emit, http_client, status_error, AssistantTurn, CompletionRequest, LineBuffer, ModelProvider,
    ProviderError, ProviderResult, ToolSpec,
};
use crate::config::ProviderConfig;
use crate::conversation::{Message, Role, ToolCall};
use crate::observer::ChunkSink;

pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    url_chat: String,
    temperature: Option<f32>,
}

impl OllamaProvider {
    pub fn new(cfg: &ProviderConfig) -> ProviderResult<Self> {
        let client = http_client(cfg)?;
        let url_chat = format!("{}/api/chat", cfg.endpoint.trim().trim_end_matches('/'));

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            timeout_secs = cfg.timeout_secs,
            "ollama provider initialized"
        );

        Ok(Self {
            client,
            model: cfg.model.clone(),
            url_chat,
            temperature: cfg.temperature,
        })
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> ChatRequest {
        let mut options = json!({ "num_predict": request.max_output_tokens });
        if let Some(t) = self.temperature {
            options["temperature"] = json!(t);
        }
        ChatRequest {
            model: self.model.clone(),
            messages: wire_messages(&request.messages),
            tools: wire_tools(&request.tools),
            stream,
            options,
        }
    }

    async fn post(&self, body: &ChatRequest) -> ProviderResult<reqwest::Response> {
        let started = Instant::now();
        debug!(
            model = %self.model,
            messages = body.messages.len(),
            stream = body.stream,
            "POST {}", self.url_chat
        );

        let resp = self.client.post(&self.url_chat).json(body).send().await?;
        if !resp.status().is_success() {
            let err = status_error("ollama", &self.url_chat, resp).await;
            error!(
                error = %err,
                model = %self.model,
                latency_ms = started.elapsed().as_millis(),
                "ollama /api/chat failed"
            );
            return Err(err);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(provider = "ollama", model = %self.model))]
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<AssistantTurn> {
        let resp = self.post(&self.body(request, false)).await?;
        let text = resp.text().await?;
        let parsed: ChatChunk = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Decode(format!("{}; body: {}", e, super::snippet(&text))))?;
        let mut turn = AssistantTurn::default();
        absorb(&mut turn, parsed);
        Ok(turn)
    }

    #[instrument(skip_all, fields(provider = "ollama", model = %self.model))]
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn ChunkSink,
    ) -> ProviderResult<AssistantTurn> {
        let mut resp = self.post(&self.body(request, true)).await?;
        let mut lines = LineBuffer::default();
        let mut turn = AssistantTurn::default();

        'read: while let Some(bytes) = resp.chunk().await? {
            for line in lines.push(&bytes) {
                if feed_line(&mut turn, &line, sink).await? {
                    break 'read;
                }
            }
        }
        if let Some(line) = lines.finish() {
            feed_line(&mut turn, &line, sink).await?;
        }
        Ok(turn)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: Value,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut obj = json!({ "role": role, "content": m.content });
            if !m.tool_calls.is_empty() {
                obj["tool_calls"] = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        let args = c.arguments().unwrap_or_else(|_| json!({}));
                        json!({ "function": { "name": c.name(), "arguments": args } })
                    })
                    .collect();
            }
            if m.role == Role::Tool {
                if let Some(name) = &m.name {
                    obj["tool_name"] = json!(name);
                }
            }
            obj
        })
        .collect()
}

fn wire_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                },
            })
        })
        .collect()
}

fn absorb(turn: &mut AssistantTurn, chunk: ChatChunk) {
    if let Some(message) = chunk.message {
        turn.text.push_str(&message.content);
        for call in message.tool_calls {
            let args = match call.function.arguments {
                Value::Null => json!({}),
                // Some models send the object as a JSON string.
                Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
                other => other,
            };
            turn.tool_calls
                .push(ToolCall::normalized(new_call_id(), call.function.name, args));
        }
    }
    if chunk.done {
        turn.finish_reason = Some(chunk.done_reason.unwrap_or_else(|| "stop".to_string()));
    }
}

/// Consume one NDJSON line. Returns true on the final `done` object.
async fn feed_line(turn: &mut AssistantTurn, line: &str, sink: &dyn ChunkSink) -> ProviderResult<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::Decode(format!("bad stream line: {}", e)))?;
    if let Some(message) = &chunk.message {
        emit(sink, &message.content).await?;
    }
    let done = chunk.done;
    absorb(turn, chunk);
    Ok(done)
}
