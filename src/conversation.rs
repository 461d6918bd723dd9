//! Canonical conversation model.
//!
//! Providers speak different wire shapes for tool calls: OpenAI-compatible
//! endpoints send native function calls whose arguments are a raw JSON
//! string, Ollama sends already-parsed argument objects without ids. Both
//! are carried as one [`ToolCall`] union so grouping and execution never
//! look at provider specifics. Each provider translates at its boundary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-issued tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ToolCall {
    /// Raw function call; `arguments` is the JSON text the model produced.
    NativeFunctionCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// Call with arguments already decoded by the provider.
    NormalizedToolCall { id: String, name: String, args: Value },
}

impl ToolCall {
    pub fn native(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        ToolCall::NativeFunctionCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn normalized(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        ToolCall::NormalizedToolCall {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ToolCall::NativeFunctionCall { id, .. } | ToolCall::NormalizedToolCall { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolCall::NativeFunctionCall { name, .. } | ToolCall::NormalizedToolCall { name, .. } => {
                name
            }
        }
    }

    /// Decoded arguments. Blank native arguments decode to `{}`.
    pub fn arguments(&self) -> Result<Value> {
        match self {
            ToolCall::NativeFunctionCall { arguments, .. } => {
                if arguments.trim().is_empty() {
                    return Ok(Value::Object(Default::default()));
                }
                serde_json::from_str(arguments)
                    .with_context(|| format!("arguments are not valid JSON: {}", arguments))
            }
            ToolCall::NormalizedToolCall { args, .. } => Ok(args.clone()),
        }
    }

    /// Arguments as JSON text, for wire formats that want a string.
    pub fn arguments_text(&self) -> String {
        match self {
            ToolCall::NativeFunctionCall { arguments, .. } => arguments.clone(),
            ToolCall::NormalizedToolCall { args, .. } => args.to_string(),
        }
    }
}

/// Outcome of one tool call, keyed by the call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id().to_string(),
            name: call.name().to_string(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::ok(call, content)
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            name: Some(result.name.clone()),
            ..Self::plain(Role::Tool, result.content.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_union_serialization() {
        let call = ToolCall::native("call_1", "read_file", r#"{"path":"a.ts"}"#);
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v["kind"], "native-function-call");
        assert_eq!(v["arguments"], r#"{"path":"a.ts"}"#);

        let call = ToolCall::normalized("call_2", "read_file", json!({"path": "a.ts"}));
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v["kind"], "normalized-tool-call");
        let back: ToolCall = serde_json::from_value(v).unwrap();
        assert_eq!(back, call);
    }

    #[test]
    fn test_arguments_decode() {
        let native = ToolCall::native("1", "t", r#"{"line": 3}"#);
        assert_eq!(native.arguments().unwrap(), json!({"line": 3}));
        assert_eq!(ToolCall::native("1", "t", "").arguments().unwrap(), json!({}));
        assert!(ToolCall::native("1", "t", "{oops").arguments().is_err());
        let normalized = ToolCall::normalized("2", "t", json!({"a": 1}));
        assert_eq!(normalized.arguments_text(), r#"{"a":1}"#);
    }

    #[test]
    fn test_tool_message_keeps_call_id() {
        let call = ToolCall::native("call_9", "list_files", "{}");
        let msg = Message::tool(&ToolResult::ok(&call, "src/"));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(msg.name.as_deref(), Some("list_files"));
    }

    #[test]
    fn test_message_deserializes_without_optional_fields() {
        let msg: Message = serde_json::from_value(json!({"role": "user", "content": "hi"})).unwrap();
        assert_eq!(msg, Message::user("hi"));
    }
}
