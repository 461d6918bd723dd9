//! OpenAI-compatible chat completions.
//!
//! POST `{endpoint}/v1/chat/completions`. Tool calls come back as native
//! function calls whose `arguments` are JSON text, so they are carried as
//! [`ToolCall::NativeFunctionCall`] and decoded only at execution time.
//! Streaming responses are server-sent events terminated by `data: [DONE]`;
//! tool-call fragments arrive keyed by `index` and are merged here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

use super::{
    emit, http_client, status_error, AssistantTurn, CompletionRequest, LineBuffer, ModelProvider,
    ProviderError, ProviderResult, ToolSpec,
};
use crate::config::ProviderConfig;
use crate::conversation::{Message, Role, ToolCall};
use crate::observer::ChunkSink;

pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    url_chat: String,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl OpenAiProvider {
    pub fn new(cfg: &ProviderConfig) -> ProviderResult<Self> {
        let client = http_client(cfg)?;
        let api_key = match &cfg.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ProviderError::Config(format!("environment variable {} is not set", var))
            })?),
            None => None,
        };
        let url_chat = format!(
            "{}/v1/chat/completions",
            cfg.endpoint.trim().trim_end_matches('/')
        );

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            timeout_secs = cfg.timeout_secs,
            "openai provider initialized"
        );

        Ok(Self {
            client,
            model: cfg.model.clone(),
            url_chat,
            api_key,
            temperature: cfg.temperature,
        })
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: wire_messages(&request.messages),
            tools: wire_tools(&request.tools),
            max_tokens: request.max_output_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn post(&self, body: &ChatRequest) -> ProviderResult<reqwest::Response> {
        let started = Instant::now();
        debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            stream = body.stream,
            "POST {}", self.url_chat
        );

        let mut req = self.client.post(&self.url_chat).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let err = status_error("openai", &self.url_chat, resp).await;
            error!(
                error = %err,
                model = %self.model,
                latency_ms = started.elapsed().as_millis(),
                "chat completion failed"
            );
            return Err(err);
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(provider = "openai", model = %self.model))]
    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<AssistantTurn> {
        let resp = self.post(&self.body(request, false)).await?;
        let text = resp.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Decode(format!("{}; body: {}", e, super::snippet(&text))))?;
        parse_response(parsed)
    }

    #[instrument(skip_all, fields(provider = "openai", model = %self.model))]
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn ChunkSink,
    ) -> ProviderResult<AssistantTurn> {
        let mut resp = self.post(&self.body(request, true)).await?;
        let mut lines = LineBuffer::default();
        let mut state = StreamState::default();

        'read: while let Some(bytes) = resp.chunk().await? {
            for line in lines.push(&bytes) {
                if state.feed_line(&line, sink).await? {
                    break 'read;
                }
            }
        }
        if let Some(line) = lines.finish() {
            state.feed_line(&line, sink).await?;
        }
        Ok(state.finish())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<DeltaToolCall>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Canonical history in chat-completions shape.
fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut obj = json!({ "role": role_str(m.role), "content": m.content });
            if !m.tool_calls.is_empty() {
                obj["tool_calls"] = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id(),
                            "type": "function",
                            "function": { "name": c.name(), "arguments": c.arguments_text() },
                        })
                    })
                    .collect();
                if m.content.is_empty() {
                    obj["content"] = Value::Null;
                }
            }
            if let Some(id) = &m.tool_call_id {
                obj["tool_call_id"] = json!(id);
            }
            if m.role == Role::Tool {
                if let Some(name) = &m.name {
                    obj["name"] = json!(name);
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

fn parse_response(resp: ChatResponse) -> ProviderResult<AssistantTurn> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Decode("response has no choices".to_string()))?;
    Ok(AssistantTurn {
        text: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall::native(c.id, c.function.name, c.function.arguments))
            .collect(),
        finish_reason: choice.finish_reason,
    })
}

#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates an SSE response.
#[derive(Default)]
struct StreamState {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    finish_reason: Option<String>,
}

impl StreamState {
    /// Consume one SSE line. Returns true once `[DONE]` is seen.
    async fn feed_line(&mut self, line: &str, sink: &dyn ChunkSink) -> ProviderResult<bool> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(false);
        }
        if data == "[DONE]" {
            return Ok(true);
        }
        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| ProviderError::Decode(format!("bad stream event: {}", e)))?;
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                emit(sink, &content).await?;
                self.text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(f) = delta.function {
                    if let Some(name) = f.name {
                        call.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        call.arguments.push_str(&args);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        Ok(false)
    }

    fn finish(self) -> AssistantTurn {
        AssistantTurn {
            text: self.text,
            tool_calls: self
                .calls
                .into_iter()
                .map(|(index, c)| {
                    let id = if c.id.is_empty() {
                        format!("call_{}", index)
                    } else {
                        c.id
                    };
                    ToolCall::native(id, c.name, c.arguments)
                })
                .collect(),
            finish_reason: self.finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolResult;
    use crate::observer::BufferSink;

    #[test]
    fn test_wire_messages_shape() {
        let call = ToolCall::normalized("call_1", "read_file", json!({"path": "a.ts"}));
        let history = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("", vec![call.clone()]),
            Message::tool(&ToolResult::ok(&call, "contents")),
        ];
        let wire = wire_messages(&history);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["content"], Value::Null);
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"a.ts"}"#
        );
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["name"], "read_file");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_a",
                        "type": "function",
                        "function": {"name": "find_symbol", "arguments": "{\"query\":\"App\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();
        let turn = parse_response(resp).unwrap();
        assert_eq!(turn.text, "");
        assert_eq!(turn.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(
            turn.tool_calls,
            vec![ToolCall::native("call_a", "find_symbol", "{\"query\":\"App\"}")]
        );
    }

    #[test]
    fn test_parse_response_without_choices() {
        let resp: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(parse_response(resp), Err(ProviderError::Decode(_))));
    }

    #[tokio::test]
    async fn test_stream_merges_fragments() {
        let sink = BufferSink::new();
        let mut state = StreamState::default();
        let events = [
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_x","function":{"name":"read_file","arguments":"{\"pa"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"th\":\"a.ts\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            ": keep-alive",
        ];
        for line in events {
            assert!(!state.feed_line(line, &sink).await.unwrap());
        }
        assert!(state.feed_line("data: [DONE]", &sink).await.unwrap());

        let turn = state.finish();
        assert_eq!(sink.chunks(), vec!["Hel", "lo"]);
        assert_eq!(turn.text, "Hello");
        assert_eq!(turn.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id(), "call_x");
        assert_eq!(turn.tool_calls[0].arguments().unwrap(), json!({"path": "a.ts"}));
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let cfg = ProviderConfig {
            kind: crate::config::ProviderKind::OpenAi,
            model: "gpt-4o-mini".into(),
            endpoint: "localhost:8080".into(),
            api_key_env: None,
            timeout_secs: 5,
            temperature: None,
        };
        assert!(matches!(OpenAiProvider::new(&cfg), Err(ProviderError::Config(_))));
    }
}
