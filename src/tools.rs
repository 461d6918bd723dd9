//! Built-in tools.
//!
//! Two families share the registry:
//!
//! | Tool | Backing service | Claim |
//! |------|-----------------|-------|
//! | `find_symbol`, `get_references`, `get_diagnostics`, `go_to_definition` | virtual compilation host | project read |
//! | `search_files`, `search_codebase`, `find_files_by_pattern` | heuristic search | project read |
//! | `get_relevant_files` | relevance scorer | project read |
//! | `read_file`, `list_files` | project store | path read |
//! | `get_project_structure` | project store | project read |
//! | `write_file`, `delete_file` | project store | path write |
//!
//! Analytical tools fetch a fresh snapshot for every call and render plain
//! text. Input problems they can describe (bad regex, missing file) come
//! back as text; only store failures surface as `Err`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use codeloom_core::host::{CompilationHost, CompilerSettings};
use codeloom_core::models::{FileKind, ProjectFile};
use codeloom_core::relevance::{RelevanceRequest, RelevanceScorer, DEFAULT_LIMIT};
use codeloom_core::search;
use codeloom_core::store::normalize_path;
use serde_json::{json, Value};

use crate::traits::{ResourceClaim, Tool, ToolContext};

/// Every built-in tool, in advertised order.
pub fn builtin_tools() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(FindSymbolTool),
        Box::new(GetReferencesTool),
        Box::new(GetDiagnosticsTool),
        Box::new(GoToDefinitionTool),
        Box::new(SearchFilesTool),
        Box::new(SearchCodebaseTool),
        Box::new(FindFilesByPatternTool),
        Box::new(GetRelevantFilesTool),
        Box::new(ReadFileTool),
        Box::new(WriteFileTool),
        Box::new(DeleteFileTool),
        Box::new(ListFilesTool),
        Box::new(GetProjectStructureTool),
    ]
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match str_param(params, key) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => bail!("{} must not be empty", key),
    }
}

fn position_params(params: &Value) -> Result<(String, usize, usize)> {
    let path = normalize_path(required_str(params, "path")?);
    let line = params.get("line").and_then(Value::as_u64).unwrap_or(0) as usize;
    let column = params.get("column").and_then(Value::as_u64).unwrap_or(0) as usize;
    Ok((path, line, column))
}

fn position_schema(path_doc: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": path_doc },
            "line": { "type": "integer", "description": "1-based line number" },
            "column": { "type": "integer", "description": "1-based column number" }
        },
        "required": ["path", "line", "column"]
    })
}

/// Fetch a fresh snapshot and run `work` over it on the blocking pool.
/// Parsing, binding and regex scans are CPU-bound and must not hold an
/// executor thread.
async fn analyze<F>(ctx: &ToolContext, work: F) -> Result<String>
where
    F: FnOnce(Vec<ProjectFile>, CompilerSettings) -> Result<String> + Send + 'static,
{
    let files = ctx.snapshot().await?;
    let settings = ctx.settings().clone();
    tokio::task::spawn_blocking(move || work(files, settings))
        .await
        .context("analysis task failed")?
}

/// Run `query` against a compilation host built from a fresh snapshot.
async fn with_host<F>(ctx: &ToolContext, query: F) -> Result<String>
where
    F: FnOnce(&CompilationHost) -> String + Send + 'static,
{
    analyze(ctx, move |files, settings| {
        let host = CompilationHost::new(&files, settings)?;
        Ok(query(&host))
    })
    .await
}

// ═══════════════════════════════════════════════════════════════════════
// Virtual compilation host
// ═══════════════════════════════════════════════════════════════════════

pub struct FindSymbolTool;

#[async_trait]
impl Tool for FindSymbolTool {
    fn name(&self) -> &str {
        "find_symbol"
    }

    fn description(&self) -> &str {
        "Find functions, classes, variables, interfaces and types whose name contains the query"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Case-insensitive substring of the symbol name" },
                "kind": {
                    "type": "string",
                    "enum": ["function", "class", "variable", "interface", "type", "all"],
                    "default": "all"
                }
            },
            "required": ["query"]
        })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = str_param(&params, "query").unwrap_or("").to_string();
        let kind = str_param(&params, "kind").map(str::to_string);
        with_host(ctx, move |host| host.find_symbol(&query, kind.as_deref())).await
    }
}

pub struct GetReferencesTool;

#[async_trait]
impl Tool for GetReferencesTool {
    fn name(&self) -> &str {
        "get_references"
    }

    fn description(&self) -> &str {
        "List every reference to the symbol at a position, with read/write access"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        position_schema("File containing the symbol")
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let (path, line, column) = position_params(&params)?;
        with_host(ctx, move |host| host.get_references(&path, line, column)).await
    }
}

pub struct GetDiagnosticsTool;

#[async_trait]
impl Tool for GetDiagnosticsTool {
    fn name(&self) -> &str {
        "get_diagnostics"
    }

    fn description(&self) -> &str {
        "Report syntax, type and lint diagnostics for a file"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to check" },
                "severity": {
                    "type": "string",
                    "enum": ["error", "warning", "all"],
                    "default": "all",
                    "description": "Minimum severity; warning includes errors"
                }
            },
            "required": ["path"]
        })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let path = normalize_path(required_str(&params, "path")?);
        let severity = str_param(&params, "severity").map(str::to_string);
        with_host(ctx, move |host| host.get_diagnostics(&path, severity.as_deref())).await
    }
}

pub struct GoToDefinitionTool;

#[async_trait]
impl Tool for GoToDefinitionTool {
    fn name(&self) -> &str {
        "go_to_definition"
    }

    fn description(&self) -> &str {
        "Find where the symbol at a position is defined"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        position_schema("File containing the symbol usage")
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let (path, line, column) = position_params(&params)?;
        with_host(ctx, move |host| host.go_to_definition(&path, line, column)).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Heuristic search
// ═══════════════════════════════════════════════════════════════════════

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression, optionally limited by a path glob"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression" },
                "file_pattern": { "type": "string", "description": "Glob such as src/**/*.ts" },
                "case_sensitive": { "type": "boolean", "default": false }
            },
            "required": ["pattern"]
        })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let pattern = required_str(&params, "pattern")?.to_string();
        let file_pattern = str_param(&params, "file_pattern").map(str::to_string);
        let case_sensitive = params
            .get("case_sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        analyze(ctx, move |files, _| {
            Ok(search::search_files_report(
                &files,
                &pattern,
                file_pattern.as_deref(),
                case_sensitive,
            ))
        })
        .await
    }
}

pub struct SearchCodebaseTool;

#[async_trait]
impl Tool for SearchCodebaseTool {
    fn name(&self) -> &str {
        "search_codebase"
    }

    fn description(&self) -> &str {
        "Find imports, functions, classes, variables, exports or calls by a line-level scan"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern_type": {
                    "type": "string",
                    "description": "One of: imports, functions, classes, variables, exports, calls"
                },
                "search_term": { "type": "string", "description": "Case-insensitive name filter" },
                "file_pattern": { "type": "string", "description": "Glob such as src/**/*.ts" }
            },
            "required": ["pattern_type"]
        })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let pattern_type = required_str(&params, "pattern_type")?.to_string();
        let term = str_param(&params, "search_term").map(str::to_string);
        let file_pattern = str_param(&params, "file_pattern").map(str::to_string);
        analyze(ctx, move |files, _| {
            Ok(search::search_codebase_report(
                &files,
                &pattern_type,
                term.as_deref(),
                file_pattern.as_deref(),
            ))
        })
        .await
    }
}

pub struct FindFilesByPatternTool;

#[async_trait]
impl Tool for FindFilesByPatternTool {
    fn name(&self) -> &str {
        "find_files_by_pattern"
    }

    fn description(&self) -> &str {
        "List file paths matching a glob (* stays within a folder, ** crosses folders)"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob such as **/*.test.ts" }
            },
            "required": ["pattern"]
        })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let pattern = required_str(&params, "pattern")?.to_string();
        analyze(ctx, move |files, _| Ok(search::find_files_by_pattern_report(&files, &pattern))).await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Relevance
// ═══════════════════════════════════════════════════════════════════════

pub struct GetRelevantFilesTool;

#[async_trait]
impl Tool for GetRelevantFilesTool {
    fn name(&self) -> &str {
        "get_relevant_files"
    }

    fn description(&self) -> &str {
        "Rank project files by relevance to a query and the file currently being edited"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What the user is working on" },
                "current_file": { "type": "string", "description": "Path of the file being edited" },
                "max_files": { "type": "integer", "default": DEFAULT_LIMIT }
            },
            "required": ["query"]
        })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = str_param(&params, "query").unwrap_or("").to_string();
        let current = str_param(&params, "current_file")
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string);
        let limit = params
            .get("max_files")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIMIT);
        analyze(ctx, move |files, settings| {
            let scorer = RelevanceScorer::new(&files, settings.resolver());
            Ok(scorer.report(
                &RelevanceRequest::new(&query)
                    .with_current_file(current.as_deref())
                    .with_limit(limit),
            ))
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
// File management
// ═══════════════════════════════════════════════════════════════════════

fn path_claim(params: &Value, key: &str, write: bool) -> Option<ResourceClaim> {
    let path = str_param(params, key)?;
    Some(if write {
        ResourceClaim::write(path)
    } else {
        ResourceClaim::read(path)
    })
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file's full text"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn resource_claim(&self, params: &Value) -> Option<ResourceClaim> {
        path_claim(params, "path", false)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let path = normalize_path(required_str(&params, "path")?);
        match ctx.store().read_file(ctx.project_id(), &path).await? {
            Some(text) => Ok(text),
            None => Ok(format!("File not found: {}", path)),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file; missing folders are created"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn resource_claim(&self, params: &Value) -> Option<ResourceClaim> {
        path_claim(params, "path", true)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let path = normalize_path(required_str(&params, "path")?);
        if path.is_empty() {
            bail!("invalid path: refers to the project root");
        }
        let content = str_param(&params, "content").unwrap_or("");
        ctx.store().write_file(ctx.project_id(), &path, content).await?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file, or a folder with everything beneath it"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn resource_claim(&self, params: &Value) -> Option<ResourceClaim> {
        path_claim(params, "path", true)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let path = normalize_path(required_str(&params, "path")?);
        if path.is_empty() {
            bail!("invalid path: refusing to delete the project root");
        }
        if ctx.store().delete_file(ctx.project_id(), &path).await? {
            Ok(format!("Deleted {}", path))
        } else {
            Ok(format!("Nothing to delete at {}", path))
        }
    }
}

fn render_entries(entries: &[ProjectFile]) -> String {
    let mut out = String::new();
    for e in entries {
        match e.kind {
            FileKind::Folder => out.push_str(&format!("{}/\n", e.path)),
            FileKind::File => out.push_str(&format!("{}\n", e.path)),
        }
    }
    out
}

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the direct children of a folder (empty for the project root)"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "folder": { "type": "string", "default": "" } }
        })
    }

    fn resource_claim(&self, params: &Value) -> Option<ResourceClaim> {
        Some(path_claim(params, "folder", false).unwrap_or_else(ResourceClaim::project))
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let folder = normalize_path(str_param(&params, "folder").unwrap_or(""));
        let entries = ctx.store().list_files(ctx.project_id(), &folder).await?;
        let label = if folder.is_empty() { "/" } else { folder.as_str() };
        if entries.is_empty() {
            return Ok(format!("No entries in {}", label));
        }
        Ok(format!(
            "{} entr{} in {}:\n{}",
            entries.len(),
            if entries.len() == 1 { "y" } else { "ies" },
            label,
            render_entries(&entries)
        ))
    }
}

pub struct GetProjectStructureTool;

#[async_trait]
impl Tool for GetProjectStructureTool {
    fn name(&self) -> &str {
        "get_project_structure"
    }

    fn description(&self) -> &str {
        "List every file and folder in the project"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn resource_claim(&self, _params: &Value) -> Option<ResourceClaim> {
        Some(ResourceClaim::project())
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<String> {
        let entries = ctx.store().get_project_structure(ctx.project_id()).await?;
        if entries.is_empty() {
            return Ok("Project is empty.".to_string());
        }
        let files = entries.iter().filter(|e| e.is_file()).count();
        Ok(format!(
            "{} file(s), {} folder(s):\n{}",
            files,
            entries.len() - files,
            render_entries(&entries)
        ))
    }
}

/// Build tool parameters from `key=value` pairs, typed by the schema.
///
/// Integer, number and boolean properties are parsed; everything else is
/// kept as a string.
pub fn params_from_pairs(schema: &Value, pairs: &[(String, String)]) -> Result<Value> {
    let mut map = serde_json::Map::new();
    for (key, raw) in pairs {
        let kind = schema
            .get("properties")
            .and_then(|p| p.get(key))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("string");
        let value = match kind {
            "integer" => match raw.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => bail!("parameter '{}' expects an integer, got '{}'", key, raw),
            },
            "number" => match raw.parse::<f64>() {
                Ok(n) => json!(n),
                Err(_) => bail!("parameter '{}' expects a number, got '{}'", key, raw),
            },
            "boolean" => match raw.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => bail!("parameter '{}' expects true or false, got '{}'", key, raw),
            },
            _ => Value::String(raw.clone()),
        };
        map.insert(key.clone(), value);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Access, ToolRegistry};
    use codeloom_core::store::memory::InMemoryProjectStore;
    use std::sync::Arc;

    fn context() -> ToolContext {
        let store = InMemoryProjectStore::with_files([
            ("src/a.ts", "export function foo(){}"),
            ("src/b.ts", "import {foo} from './a'; foo();"),
        ]);
        ToolContext::new(Arc::new(store), "p1")
    }

    async fn call(name: &str, params: Value) -> String {
        let registry = ToolRegistry::with_builtins();
        registry.dispatch(name, params, &context()).await.unwrap()
    }

    #[tokio::test]
    async fn test_find_symbol_tool() {
        let out = call("find_symbol", json!({"query": "foo"})).await;
        assert!(out.contains("[function] foo (src/a.ts:1:1)"), "{}", out);
    }

    #[tokio::test]
    async fn test_search_codebase_calls() {
        let out = call("search_codebase", json!({"pattern_type": "call", "search_term": "foo"})).await;
        assert!(out.starts_with("Found 1 call pattern(s) matching 'foo'"), "{}", out);
        assert!(out.contains("src/b.ts:1 [call] foo"), "{}", out);
    }

    #[tokio::test]
    async fn test_relevant_files_tool() {
        let out = call(
            "get_relevant_files",
            json!({"query": "foo", "current_file": "src/b.ts"}),
        )
        .await;
        assert!(out.contains("1. src/a.ts"), "{}", out);
    }

    #[tokio::test]
    async fn test_file_tools_round_trip_through_store() {
        let ctx = context();
        let registry = ToolRegistry::with_builtins();
        let wrote = registry
            .dispatch("write_file", json!({"path": "./lib/c.ts", "content": "let x = 1;"}), &ctx)
            .await
            .unwrap();
        assert_eq!(wrote, "Wrote 10 bytes to lib/c.ts");
        let read = registry
            .dispatch("read_file", json!({"path": "lib/c.ts"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read, "let x = 1;");
        let listed = registry
            .dispatch("list_files", json!({}), &ctx)
            .await
            .unwrap();
        assert!(listed.contains("lib/"), "{}", listed);
        let deleted = registry
            .dispatch("delete_file", json!({"path": "lib"}), &ctx)
            .await
            .unwrap();
        assert_eq!(deleted, "Deleted lib");
        let missing = registry
            .dispatch("read_file", json!({"path": "lib/c.ts"}), &ctx)
            .await
            .unwrap();
        assert_eq!(missing, "File not found: lib/c.ts");
    }

    #[tokio::test]
    async fn test_analysis_yields_the_executor() {
        use std::sync::Mutex;

        let order = Arc::new(Mutex::new(Vec::new()));
        let tool_order = order.clone();
        let tool = tokio::spawn(async move {
            let out = call("find_symbol", json!({"query": "foo"})).await;
            tool_order.lock().unwrap().push("tool");
            out
        });
        let tick_order = order.clone();
        let tick = tokio::spawn(async move {
            tick_order.lock().unwrap().push("tick");
        });
        let out = tool.await.unwrap();
        tick.await.unwrap();
        assert!(out.contains("[function] foo (src/a.ts:1:1)"), "{}", out);
        assert_eq!(*order.lock().unwrap(), vec!["tick", "tool"]);
    }

    #[tokio::test]
    async fn test_invalid_regex_is_reported_text() {
        let out = call("search_files", json!({"pattern": "("})).await;
        assert!(out.starts_with("Error: invalid regular expression"), "{}", out);
    }

    #[test]
    fn test_claims() {
        let registry = ToolRegistry::with_builtins();
        let w = registry
            .claim_for("write_file", &json!({"path": "src/a.ts", "content": ""}))
            .unwrap();
        assert_eq!(w.access, Access::Write);
        assert_eq!(w.path, "src/a.ts");
        assert_eq!(
            registry.claim_for("find_symbol", &json!({"query": "x"})),
            Some(ResourceClaim::project())
        );
        assert!(registry.claim_for("nope", &json!({})).is_none());
    }

    #[test]
    fn test_params_from_pairs() {
        let schema = FindSymbolTool.parameters_schema();
        let v = params_from_pairs(&schema, &[("query".into(), "foo".into())]).unwrap();
        assert_eq!(v, json!({"query": "foo"}));
        let schema = GetReferencesTool.parameters_schema();
        let v = params_from_pairs(
            &schema,
            &[("path".into(), "a.ts".into()), ("line".into(), "3".into())],
        )
        .unwrap();
        assert_eq!(v["line"], 3);
        assert!(params_from_pairs(&schema, &[("line".into(), "x".into())]).is_err());
    }
}
