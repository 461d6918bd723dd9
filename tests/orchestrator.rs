//! Orchestration loop tests with scripted in-process providers.

use async_trait::async_trait;
use codeloom::conversation::{Message, Role, ToolCall};
use codeloom::core::store::memory::InMemoryProjectStore;
use codeloom::observer::{BufferSink, ChunkSink, RecordingObserver, RunEvent};
use codeloom::orchestrator::{Orchestrator, RunRequest};
use codeloom::providers::{
    AssistantTurn, CompletionRequest, ModelProvider, ProviderError, ProviderResult,
};
use codeloom::traits::{ToolContext, ToolRegistry};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays queued turns; returns a plain "done" turn once the script runs out.
struct ScriptedProvider {
    name: &'static str,
    script: Mutex<VecDeque<ProviderResult<AssistantTurn>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(name: &'static str, script: Vec<ProviderResult<AssistantTurn>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn first_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap()[0].clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<AssistantTurn> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text_turn("done")))
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn ChunkSink,
    ) -> ProviderResult<AssistantTurn> {
        let turn = self.complete(request).await?;
        for word in turn.text.split_inclusive(' ') {
            sink.on_chunk(word)
                .await
                .map_err(|e| ProviderError::Cancelled(e.to_string()))?;
        }
        Ok(turn)
    }
}

fn text_turn(text: &str) -> AssistantTurn {
    AssistantTurn {
        text: text.to_string(),
        tool_calls: Vec::new(),
        finish_reason: Some("stop".to_string()),
    }
}

fn tool_turn(text: &str, calls: Vec<ToolCall>) -> AssistantTurn {
    AssistantTurn {
        text: text.to_string(),
        tool_calls: calls,
        finish_reason: Some("tool_calls".to_string()),
    }
}

fn rate_limited() -> ProviderError {
    ProviderError::RateLimited {
        provider: "primary".to_string(),
        retry_after: None,
    }
}

fn context() -> (Arc<InMemoryProjectStore>, ToolContext) {
    let store = Arc::new(InMemoryProjectStore::with_files([
        ("src/a.ts", "export function foo() {}"),
        ("src/b.ts", "import { foo } from './a';\nfoo();"),
    ]));
    let ctx = ToolContext::new(store.clone(), "test");
    (store, ctx)
}

fn orchestrator(primary: Arc<ScriptedProvider>) -> Orchestrator {
    let (_, ctx) = context();
    Orchestrator::new(primary, Arc::new(ToolRegistry::with_builtins()), ctx)
}

fn tool_messages(history: &[Message]) -> Vec<&Message> {
    history.iter().filter(|m| m.role == Role::Tool).collect()
}

#[tokio::test]
async fn test_plain_answer_prepends_system_prompt() {
    let primary = ScriptedProvider::new("primary", vec![Ok(text_turn("Hello there"))]);
    let outcome = orchestrator(primary.clone())
        .run(RunRequest::prompt("hi"))
        .await
        .unwrap();

    assert_eq!(outcome.text, "Hello there");
    assert_eq!(outcome.provider, "primary");
    assert_eq!(outcome.model, "scripted-1");
    assert!(!outcome.used_fallback);
    assert_eq!(outcome.steps, 1);

    let req = primary.first_request();
    assert_eq!(req.messages[0].role, Role::System);
    assert_eq!(req.messages[1], Message::user("hi"));
    assert_eq!(req.tools.len(), 13);
    assert_eq!(req.max_output_tokens, 4096);
}

#[tokio::test]
async fn test_caller_system_prompt_is_kept() {
    let primary = ScriptedProvider::new("primary", vec![]);
    orchestrator(primary.clone())
        .run(RunRequest::new(vec![
            Message::system("custom"),
            Message::user("hi"),
        ]))
        .await
        .unwrap();
    let req = primary.first_request();
    assert_eq!(req.messages.len(), 2);
    assert_eq!(req.messages[0].content, "custom");
}

#[tokio::test]
async fn test_rate_limit_switches_to_fallback() {
    let primary = ScriptedProvider::new("primary", vec![Err(rate_limited())]);
    let fallback = ScriptedProvider::new(
        "fallback",
        vec![
            Ok(tool_turn(
                "",
                vec![ToolCall::normalized(
                    "call_1",
                    "find_symbol",
                    json!({"query": "foo"}),
                )],
            )),
            Ok(text_turn("foo is defined in src/a.ts")),
        ],
    );
    let observer = Arc::new(RecordingObserver::new());
    let outcome = orchestrator(primary.clone())
        .with_fallback(fallback.clone())
        .with_observer(observer.clone())
        .run(RunRequest::prompt("where is foo?"))
        .await
        .unwrap();

    assert!(outcome.used_fallback);
    assert_eq!(outcome.provider, "fallback");
    assert_eq!(outcome.text, "foo is defined in src/a.ts");
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 2);

    // the fallback starts from the original conversation
    let first = fallback.first_request();
    assert_eq!(first.messages.len(), 2);
    assert_eq!(first.messages[1], Message::user("where is foo?"));

    let tools = tool_messages(&outcome.history);
    assert_eq!(tools.len(), 1);
    assert!(tools[0].content.contains("[function] foo"));

    let events = observer.events();
    assert!(events.iter().any(|e| matches!(
        e,
        RunEvent::StepStart { provider, .. } if provider == "fallback"
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, RunEvent::ToolResult { result, .. } if !result.is_error)));
}

#[tokio::test]
async fn test_fallback_error_propagates() {
    let primary = ScriptedProvider::new("primary", vec![Err(rate_limited())]);
    let fallback = ScriptedProvider::new(
        "fallback",
        vec![Err(ProviderError::Decode("garbage".to_string()))],
    );
    let err = orchestrator(primary)
        .with_fallback(fallback)
        .run(RunRequest::prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Decode(_)));
}

#[tokio::test]
async fn test_cancelled_run_does_not_fall_back() {
    let primary = ScriptedProvider::new(
        "primary",
        vec![Err(ProviderError::Cancelled("client went away".to_string()))],
    );
    let fallback = ScriptedProvider::new("fallback", vec![]);
    let err = orchestrator(primary)
        .with_fallback(fallback.clone())
        .run(RunRequest::prompt("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled(_)));
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test]
async fn test_unknown_tool_becomes_error_result() {
    let primary = ScriptedProvider::new(
        "primary",
        vec![
            Ok(tool_turn(
                "",
                vec![
                    ToolCall::native("call_x", "no_such_tool", "{}"),
                    ToolCall::native("call_y", "read_file", "{not json"),
                ],
            )),
            Ok(text_turn("sorry")),
        ],
    );
    let outcome = orchestrator(primary).run(RunRequest::prompt("go")).await.unwrap();

    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.text, "sorry");
    let tools = tool_messages(&outcome.history);
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].tool_call_id.as_deref(), Some("call_x"));
    assert!(tools[0].content.starts_with("Error: Unknown tool 'no_such_tool'"));
    assert_eq!(tools[1].tool_call_id.as_deref(), Some("call_y"));
    assert!(tools[1]
        .content
        .starts_with("Error executing tool 'read_file':"));
}

#[tokio::test]
async fn test_write_is_observed_by_later_read() {
    let (store, ctx) = context();
    let primary = ScriptedProvider::new(
        "primary",
        vec![
            Ok(tool_turn(
                "",
                vec![
                    ToolCall::native("r1", "read_file", r#"{"path":"src/a.ts"}"#),
                    ToolCall::native(
                        "w1",
                        "write_file",
                        r#"{"path":"src/a.ts","content":"export const v = 2;"}"#,
                    ),
                    ToolCall::native("r2", "read_file", r#"{"path":"./src/a.ts"}"#),
                    ToolCall::native("l1", "read_file", r#"{"path":"src/b.ts"}"#),
                ],
            )),
            Ok(text_turn("updated")),
        ],
    );
    let outcome = Orchestrator::new(primary, Arc::new(ToolRegistry::with_builtins()), ctx)
        .run(RunRequest::prompt("update a"))
        .await
        .unwrap();

    let tools = tool_messages(&outcome.history);
    let order: Vec<&str> = tools
        .iter()
        .map(|m| m.tool_call_id.as_deref().unwrap_or(""))
        .collect();
    // wave 0: r1, l1; wave 1: w1; wave 2: r2
    assert_eq!(order, vec!["r1", "l1", "w1", "r2"]);
    assert_eq!(tools[0].content, "export function foo() {}");
    assert_eq!(tools[3].content, "export const v = 2;");

    use codeloom::core::store::ProjectStore;
    assert_eq!(
        store.read_file("test", "src/a.ts").await.unwrap().as_deref(),
        Some("export const v = 2;")
    );
}

#[tokio::test]
async fn test_step_budget_returns_last_text() {
    let script = (1..=5)
        .map(|i| {
            Ok(tool_turn(
                &format!("looking {}", i),
                vec![ToolCall::native(format!("c{}", i), "list_files", "{}")],
            ))
        })
        .collect();
    let primary = ScriptedProvider::new("primary", script);
    let outcome = orchestrator(primary.clone())
        .run(RunRequest::prompt("explore").with_max_steps(3))
        .await
        .unwrap();

    assert_eq!(outcome.steps, 3);
    assert_eq!(outcome.text, "looking 3");
    assert_eq!(primary.calls(), 3);
    assert_eq!(tool_messages(&outcome.history).len(), 3);
}

#[tokio::test]
async fn test_fallback_discards_text_streamed_by_failed_primary() {
    let primary = ScriptedProvider::new(
        "primary",
        vec![
            Ok(tool_turn(
                "Let me check. ",
                vec![ToolCall::native("c1", "list_files", "{}")],
            )),
            Err(rate_limited()),
        ],
    );
    let fallback = ScriptedProvider::new("fallback", vec![Ok(text_turn("From fallback"))]);
    let sink = BufferSink::new();
    let outcome = orchestrator(primary)
        .with_fallback(fallback)
        .run_streaming(RunRequest::prompt("check"), &sink)
        .await
        .unwrap();

    assert!(outcome.used_fallback);
    assert_eq!(outcome.text, "From fallback");
    assert_eq!(sink.chunks().concat(), "From fallback");
}

#[tokio::test]
async fn test_streaming_delivers_chunks_in_order() {
    let primary = ScriptedProvider::new(
        "primary",
        vec![
            Ok(tool_turn(
                "Let me check. ",
                vec![ToolCall::native("c1", "list_files", "{}")],
            )),
            Ok(text_turn("All good here")),
        ],
    );
    let sink = BufferSink::new();
    let outcome = orchestrator(primary)
        .run_streaming(RunRequest::prompt("check"), &sink)
        .await
        .unwrap();

    assert_eq!(outcome.text, "All good here");
    assert_eq!(sink.chunks().concat(), "Let me check. All good here");
}
