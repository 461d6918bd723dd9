//! HTTP server tests: the real router on a free port, driven with reqwest.

use async_trait::async_trait;
use codeloom::config::Config;
use codeloom::conversation::{Role, ToolCall};
use codeloom::core::store::memory::InMemoryProjectStore;
use codeloom::observer::ChunkSink;
use codeloom::orchestrator::Orchestrator;
use codeloom::providers::{AssistantTurn, CompletionRequest, ModelProvider, ProviderResult};
use codeloom::retry::RetryPolicy;
use codeloom::server::{router, AppState};
use codeloom::traits::{ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Asks for `find_symbol` once, then answers with the last tool result.
struct EchoProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<AssistantTurn> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(AssistantTurn {
                text: String::new(),
                tool_calls: vec![ToolCall::native("c1", "find_symbol", r#"{"query":"Widget"}"#)],
                finish_reason: Some("tool_calls".into()),
            });
        }
        let last_tool = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(AssistantTurn {
            text: format!("{}\n---\n{}", user, last_tool),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        _sink: &dyn ChunkSink,
    ) -> ProviderResult<AssistantTurn> {
        self.complete(request).await
    }
}

async fn spawn_server(with_provider: bool) -> String {
    let config = Config::minimal();
    let store = Arc::new(InMemoryProjectStore::with_files([
        ("src/widget.ts", "export class Widget {\n  render() {}\n}\n"),
        ("src/main.ts", "import { Widget } from './widget';\nnew Widget().render();\n"),
    ]));
    let mut state = AppState::new(&config, store.clone()).unwrap().with_retry(RetryPolicy::none());
    if with_provider {
        let tools = Arc::new(ToolRegistry::with_builtins());
        let ctx = ToolContext::new(store, "local");
        let provider = Arc::new(EchoProvider {
            calls: AtomicUsize::new(0),
        });
        state = state.with_orchestrator(Orchestrator::new(provider, tools, ctx));
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health_and_tool_list() {
    let base = spawn_server(false).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let list: Value = client
        .get(format!("{}/tools/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tools = list["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 13);
    assert!(tools.iter().any(|t| t["name"] == "get_relevant_files"));
}

#[tokio::test]
async fn test_tool_call_and_errors() {
    let base = spawn_server(false).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/tools/find_symbol", base))
        .json(&json!({"query": "Widget", "kind": "class"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["result"].as_str().unwrap().contains("[class] Widget"));

    let resp = client
        .post(format!("{}/tools/nope", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/tools/get_diagnostics", base))
        .json(&json!({"path": "src/main.ts", "severity": "fatal"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_chat_requires_provider() {
    let base = spawn_server(false).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({"prompt": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_chat_runs_tools() {
    let base = spawn_server(true).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({"prompt": "where is Widget?", "current_file": "src/main.ts"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["provider"], "echo");
    assert_eq!(outcome["used_fallback"], false);
    assert_eq!(outcome["steps"], 2);
    let text = outcome["text"].as_str().unwrap();
    assert!(text.contains("`src/main.ts`"));
    assert!(text.contains("[class] Widget"));
}
