//! HTTP server.
//!
//! Exposes the tool registry and the orchestration loop as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool against the configured project |
//! | `POST` | `/chat` | Run the orchestration loop, returns a `RunOutcome` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "prompt must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500),
//! `provider_error` (502), `internal` (500).
//!
//! `POST /chat` accepts either a `prompt` string or a full `messages`
//! history, plus an optional `current_file` that is mentioned to the model.
//! The whole run is wrapped in the `[retry]` policy.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use codeloom_core::store::ProjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::conversation::{Message, Role};
use crate::fs_store::FsProjectStore;
use crate::orchestrator::{Orchestrator, RunOutcome, RunRequest};
use crate::providers::ProviderError;
use crate::retry::{with_retry, RetryPolicy};
use crate::traits::{DispatchError, ToolContext, ToolInfo, ToolRegistry};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    /// `None` when no primary provider is configured; `/chat` then fails
    /// with 400 while the tool routes keep working.
    orchestrator: Option<Arc<Orchestrator>>,
    retry: RetryPolicy,
}

impl AppState {
    /// Build state over `store` with the built-in tools.
    pub fn new(config: &Config, store: Arc<dyn ProjectStore>) -> anyhow::Result<Self> {
        Self::with_registry(config, store, ToolRegistry::with_builtins())
    }

    pub fn with_registry(
        config: &Config,
        store: Arc<dyn ProjectStore>,
        registry: ToolRegistry,
    ) -> anyhow::Result<Self> {
        let tools = Arc::new(registry);
        let ctx = ToolContext::new(store, config.project.id.clone())
            .with_settings(config.compiler.clone());
        let orchestrator = match config.providers.primary {
            Some(_) => Some(Arc::new(Orchestrator::from_config(
                config,
                Arc::clone(&tools),
                ctx.clone(),
            )?)),
            None => None,
        };
        Ok(Self {
            tools,
            ctx,
            orchestrator,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Replace the orchestrator, e.g. with one built on custom providers.
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = Some(Arc::new(orchestrator));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Serve the project at `[project].root` on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(FsProjectStore::from_config(&config.project)?);
    let state = AppState::new(config, store)?;
    serve(config, state).await
}

/// Serve with a caller-built state.
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    for t in state.tools.tools() {
        info!(tool = t.name(), builtin = t.is_builtin(), "registered tool");
    }
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        chat = state.orchestrator.is_some(),
        "server listening"
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn tool_error(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", message)
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Config(msg) => {
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
            }
            other => app_error(StatusCode::BAD_GATEWAY, "provider_error", other.to_string()),
        }
    }
}

/// Map tool failures to a status by message: missing things are 404,
/// rejected input is 400, the rest is 500.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if msg.contains("not found") {
        not_found(format!("{}: {}", tool_name, msg))
    } else if msg.contains("must not be empty") || msg.contains("invalid") {
        bad_request(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.infos(),
    })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = state
        .tools
        .dispatch(&name, params, &state.ctx)
        .await
        .map_err(|e| match e {
            DispatchError::UnknownTool { .. } => {
                not_found(format!("no tool registered with name: {}", name))
            }
            DispatchError::InvalidParams(msg) => bad_request(msg),
            DispatchError::Execution(err) => classify_tool_error(&name, err),
        })?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub max_steps: Option<usize>,
}

impl ChatRequest {
    fn into_run_request(self) -> Result<RunRequest, AppError> {
        let mut messages = match (self.messages, self.prompt) {
            (Some(messages), _) if !messages.is_empty() => messages,
            (_, Some(prompt)) if !prompt.trim().is_empty() => vec![Message::user(prompt)],
            _ => return Err(bad_request("prompt or messages must not be empty")),
        };
        if let Some(file) = self.current_file.filter(|f| !f.trim().is_empty()) {
            match messages.iter_mut().rev().find(|m| m.role == Role::User) {
                Some(last) => last.content = with_current_file(&last.content, &file),
                None => messages.push(Message::user(with_current_file("", &file))),
            }
        }
        Ok(RunRequest {
            messages,
            max_steps: self.max_steps,
            max_output_tokens: None,
        })
    }
}

/// Append the editor's current file to a user prompt.
pub fn with_current_file(prompt: &str, file: &str) -> String {
    let note = format!("(The user currently has `{}` open.)", file);
    if prompt.is_empty() {
        note
    } else {
        format!("{}\n\n{}", prompt, note)
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<RunOutcome>, AppError> {
    let orchestrator = state
        .orchestrator
        .clone()
        .ok_or_else(|| bad_request("no primary provider configured"))?;
    let request = body.into_run_request()?;

    let outcome = with_retry(&state.retry, |_| {
        let orchestrator = Arc::clone(&orchestrator);
        let request = request.clone();
        async move { orchestrator.run(request).await }
    })
    .await?;

    info!(
        provider = %outcome.provider,
        used_fallback = outcome.used_fallback,
        steps = outcome.steps,
        "chat run finished"
    );
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_appends_current_file() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({
            "prompt": "why does this fail?",
            "current_file": "src/app.ts"
        }))
        .unwrap();
        let run = req.into_run_request().ok().unwrap();
        assert_eq!(run.messages.len(), 1);
        assert!(run.messages[0].content.starts_with("why does this fail?\n\n"));
        assert!(run.messages[0].content.contains("`src/app.ts`"));
    }

    #[test]
    fn test_chat_request_requires_input() {
        let req: ChatRequest = serde_json::from_value(serde_json::json!({ "prompt": "  " })).unwrap();
        let err = req.into_run_request().err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_classify_tool_error() {
        let err = classify_tool_error("read_file", anyhow::anyhow!("invalid path: empty"));
        assert_eq!(err.code, "bad_request");
        let err = classify_tool_error("x", anyhow::anyhow!("disk on fire"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
