//! Tool extension trait and registry.
//!
//! Every capability the model can invoke is a [`Tool`]: the analytical
//! services (symbols, search, relevance) and the file-management
//! operations alike. Tools are registered in a [`ToolRegistry`] that the
//! orchestrator, the HTTP server and the CLI all dispatch through.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ToolRegistry                │
//! │  ┌───────────┐ ┌─────────┐ ┌──────────┐  │
//! │  │ symbols   │ │ search  │ │ files    │  │
//! │  │ relevance │ │         │ │          │  │
//! │  └───────────┘ └─────────┘ └──────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     Orchestrator waves / POST /tools/{name} / loom call
//! ```
//!
//! # Usage
//!
//! ```rust
//! use codeloom::traits::ToolRegistry;
//!
//! let mut tools = ToolRegistry::with_builtins();
//! // tools.register(Box::new(MyTool::new()));
//! assert!(tools.find("find_symbol").is_some());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use codeloom_core::host::CompilerSettings;
use codeloom_core::models::ProjectFile;
use codeloom_core::store::{normalize_path, ProjectStore};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════
// Resource claims
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

/// The project path a tool call touches and how.
///
/// The empty path is the project root and overlaps everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceClaim {
    pub path: String,
    pub access: Access,
}

impl ResourceClaim {
    pub fn read(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            access: Access::Read,
        }
    }

    pub fn write(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            access: Access::Write,
        }
    }

    /// Read access to the whole project.
    pub fn project() -> Self {
        Self::read("")
    }

    /// Equal paths, or one is an ancestor directory of the other.
    pub fn overlaps(&self, other: &ResourceClaim) -> bool {
        let (a, b) = (self.path.as_str(), other.path.as_str());
        a.is_empty()
            || b.is_empty()
            || a == b
            || b.strip_prefix(a).is_some_and(|rest| rest.starts_with('/'))
            || a.strip_prefix(b).is_some_and(|rest| rest.starts_with('/'))
    }

    /// Overlapping claims where at least one side writes must be ordered.
    pub fn conflicts_with(&self, other: &ResourceClaim) -> bool {
        (self.access == Access::Write || other.access == Access::Write) && self.overlaps(other)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A capability the model can discover and call.
///
/// # Lifecycle
///
/// 1. The tool is registered via [`ToolRegistry::register`].
/// 2. [`name`](Tool::name), [`description`](Tool::description), and
///    [`parameters_schema`](Tool::parameters_schema) are advertised to the
///    model and listed by `GET /tools/list`.
/// 3. [`resource_claim`](Tool::resource_claim) is asked for each call so the
///    orchestrator can order dependent calls.
/// 4. [`execute`](Tool::execute) runs with validated parameters.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use codeloom::traits::{ResourceClaim, Tool, ToolContext};
///
/// pub struct LineCountTool;
///
/// #[async_trait]
/// impl Tool for LineCountTool {
///     fn name(&self) -> &str { "line_count" }
///     fn description(&self) -> &str { "Count lines in a file" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({
///             "type": "object",
///             "properties": { "path": { "type": "string" } },
///             "required": ["path"]
///         })
///     }
///
///     fn resource_claim(&self, params: &Value) -> Option<ResourceClaim> {
///         params["path"].as_str().map(ResourceClaim::read)
///     }
///
///     async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
///         let path = params["path"].as_str().unwrap_or("");
///         let text = ctx.store().read_file(ctx.project_id(), path).await?;
///         Ok(format!("{} lines", text.map(|t| t.lines().count()).unwrap_or(0)))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"find_symbol"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call.
    fn description(&self) -> &str;

    /// Whether this tool ships with Codeloom. Defaults to `false`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema for parameters: `type: "object"`, `properties`,
    /// optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// The resource a call with `params` touches. `None` means the call
    /// is independent of every other call.
    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        None
    }

    /// Execute with validated parameters and render plain text for the model.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// What a tool execution can reach: the project store client, the project
/// id, and the compiler settings for the virtual compilation host.
///
/// Created once per server or run and shared by reference; it holds no
/// analysis state, so every tool fetches its own snapshot.
#[derive(Clone)]
pub struct ToolContext {
    store: Arc<dyn ProjectStore>,
    project_id: String,
    settings: CompilerSettings,
}

impl ToolContext {
    pub fn new(store: Arc<dyn ProjectStore>, project_id: impl Into<String>) -> Self {
        Self {
            store,
            project_id: project_id.into(),
            settings: CompilerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CompilerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &dyn ProjectStore {
        self.store.as_ref()
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Fresh whole-project snapshot.
    pub async fn snapshot(&self) -> Result<Vec<ProjectFile>> {
        self.store.get_all_project_files(&self.project_id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter validation
// ═══════════════════════════════════════════════════════════════════════

/// Serializable tool info for `GET /tools/list` and `loom tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

/// Check `params` against a tool schema: required keys present, primitive
/// types match, enum values allowed. Missing optional keys receive their
/// schema `default`.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    for req_field in &required {
        if params_obj.get(req_field).map_or(true, Value::is_null) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(Value::Null) | None => {
                result.remove(prop_name);
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        bail!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        );
                    }
                }

                if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                        bail!(
                            "parameter '{}' must be one of [{}], got {}",
                            prop_name,
                            allowed.join(", "),
                            value
                        );
                    }
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Why a call could not produce a tool result.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown tool '{name}'. Available tools: {available}")]
    UnknownTool { name: String, available: String },

    #[error("{0}")]
    InvalidParams(String),

    #[error("{0:#}")]
    Execution(anyhow::Error),
}

/// Registry of callable tools.
///
/// Use [`ToolRegistry::with_builtins`] for the full built-in set, then
/// optionally [`register`](ToolRegistry::register) custom ones.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the analytical and file-management tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in crate::tools::builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                builtin: t.is_builtin(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Resource claim of a call, when its tool is known and its
    /// parameters decode.
    pub fn claim_for(&self, name: &str, params: &Value) -> Option<ResourceClaim> {
        self.find(name)?.resource_claim(params)
    }

    /// Look up, validate and execute one call.
    pub async fn dispatch(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> std::result::Result<String, DispatchError> {
        let tool = self.find(name).ok_or_else(|| DispatchError::UnknownTool {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;
        let params = validate_params(&tool.parameters_schema(), &params)
            .map_err(|e| DispatchError::InvalidParams(e.to_string()))?;
        tool.execute(params, ctx).await.map_err(DispatchError::Execution)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_claim_overlap_by_ancestry() {
        let dir = ResourceClaim::write("src/lib");
        assert!(dir.conflicts_with(&ResourceClaim::read("src/lib/a.ts")));
        assert!(dir.conflicts_with(&ResourceClaim::write("./src/lib")));
        assert!(!dir.conflicts_with(&ResourceClaim::read("src/library.ts")));
        assert!(!ResourceClaim::read("a.ts").conflicts_with(&ResourceClaim::read("a.ts")));
        assert!(ResourceClaim::project().conflicts_with(&ResourceClaim::write("x/y.ts")));
    }

    #[test]
    fn test_validate_params_defaults_and_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "line": { "type": "integer" },
                "severity": { "type": "string", "enum": ["error", "warning", "all"], "default": "all" }
            },
            "required": ["path"]
        });
        let out = validate_params(&schema, &json!({"path": "a.ts"})).unwrap();
        assert_eq!(out["severity"], "all");

        let err = validate_params(&schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: path"));

        let err = validate_params(&schema, &json!({"path": "a.ts", "line": "3"})).unwrap_err();
        assert!(err.to_string().contains("must be of type 'integer'"));

        let err = validate_params(&schema, &json!({"path": "a.ts", "severity": "fatal"})).unwrap_err();
        assert!(err.to_string().contains("must be one of"));

        assert!(validate_params(&schema, &json!([1])).is_err());
    }

    #[test]
    fn test_builtins_registered() {
        let tools = ToolRegistry::with_builtins();
        for name in [
            "find_symbol",
            "get_references",
            "get_diagnostics",
            "go_to_definition",
            "search_files",
            "search_codebase",
            "find_files_by_pattern",
            "get_relevant_files",
            "read_file",
            "write_file",
            "delete_file",
            "list_files",
            "get_project_structure",
        ] {
            assert!(tools.find(name).is_some(), "missing {}", name);
        }
        assert_eq!(tools.len(), 13);
        assert!(tools.infos().iter().all(|t| t.builtin));
    }
}
