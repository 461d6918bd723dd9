use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn loom_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("loom");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let project = root.join("project");
    fs::create_dir_all(project.join("src/lib")).unwrap();
    fs::create_dir_all(project.join("node_modules/left-pad")).unwrap();
    fs::write(
        project.join("src/a.ts"),
        "export function foo(): number {\n  return 1;\n}\n",
    )
    .unwrap();
    fs::write(
        project.join("src/b.ts"),
        "import { foo } from './a';\nconst n: number = foo();\nimport { bar } from './a';\n",
    )
    .unwrap();
    fs::write(
        project.join("src/lib/userProfile.ts"),
        "export class UserProfile {\n  name = '';\n}\n",
    )
    .unwrap();
    fs::write(
        project.join("node_modules/left-pad/index.js"),
        "module.exports = function foo() {};\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[project]
root = "{}"
id = "demo"

[compiler]
strict = true

[orchestrator]
max_steps = 4

[logging]
filter = "warn"
"#,
        project.display()
    );
    let config_path = root.join("loom.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_loom(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = loom_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run loom binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_tools_lists_builtins() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_loom(&config, &["tools"]);
    assert!(success, "tools failed: {}", stderr);
    assert!(stdout.contains("13 tools:"));
    assert!(stdout.contains("find_symbol"));
    assert!(stdout.contains("get_relevant_files"));

    let (stdout, _, success) = run_loom(&config, &["tools", "--json"]);
    assert!(success);
    let tools: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(tools.as_array().unwrap().len(), 13);
}

#[test]
fn test_call_find_symbol() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) =
        run_loom(&config, &["call", "find_symbol", "--param", "query=foo"]);
    assert!(success, "call failed: {}", stderr);
    assert!(stdout.contains("[function] foo"), "stdout: {}", stdout);
    assert!(!stdout.contains("node_modules"));
}

#[test]
fn test_call_search_codebase_calls() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_loom(
        &config,
        &[
            "call",
            "search_codebase",
            "--param",
            "pattern_type=calls",
            "--param",
            "search_term=foo",
        ],
    );
    assert!(success, "call failed: {}", stderr);
    assert!(stdout.contains("src/b.ts:2"), "stdout: {}", stdout);
}

#[test]
fn test_call_get_diagnostics_reports_missing_export() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_loom(
        &config,
        &[
            "call",
            "get_diagnostics",
            "--param",
            "path=src/b.ts",
            "--param",
            "severity=error",
        ],
    );
    assert!(success, "call failed: {}", stderr);
    assert!(stdout.contains("TS2305"), "stdout: {}", stdout);
    assert!(stdout.contains("no exported member 'bar'"));
}

#[test]
fn test_call_write_then_read() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_loom(
        &config,
        &[
            "call",
            "write_file",
            "--param",
            "path=src/new/c.ts",
            "--param",
            "content=export const c = 3;",
        ],
    );
    assert!(success, "write failed: {}", stderr);
    assert!(stdout.contains("Wrote 19 bytes to src/new/c.ts"));
    assert!(tmp.path().join("project/src/new/c.ts").exists());

    let (stdout, _, success) = run_loom(&config, &["call", "read_file", "--param", "path=src/new/c.ts"]);
    assert!(success);
    assert_eq!(stdout.trim(), "export const c = 3;");
}

#[test]
fn test_call_relevant_files() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_loom(
        &config,
        &[
            "call",
            "get_relevant_files",
            "--param",
            "query=foo",
            "--param",
            "current_file=src/b.ts",
        ],
    );
    assert!(success, "call failed: {}", stderr);
    assert!(stdout.contains("1. src/a.ts"), "stdout: {}", stdout);
}

#[test]
fn test_unknown_tool_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_loom(&config, &["call", "nope"]);
    assert!(!success);
    assert!(stderr.contains("Unknown tool 'nope'"));
}

#[test]
fn test_bad_param_type_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_loom(
        &config,
        &["call", "get_references", "--param", "path=src/a.ts", "--param", "line=one", "--param", "column=1"],
    );
    assert!(!success);
    assert!(stderr.contains("expects an integer"));
}

#[test]
fn test_ask_without_provider_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_loom(&config, &["ask", "hello"]);
    assert!(!success);
    assert!(stderr.contains("no primary provider configured"));
}

#[test]
fn test_missing_config_uses_root_override() {
    let (tmp, _config) = setup_test_env();
    let missing = tmp.path().join("absent.toml");
    let project = tmp.path().join("project");
    let (stdout, stderr, success) = run_loom(
        &missing,
        &[
            "--root",
            project.to_str().unwrap(),
            "call",
            "find_files_by_pattern",
            "--param",
            "pattern=**/*.ts",
        ],
    );
    assert!(success, "call failed: {}", stderr);
    assert!(stdout.contains("src/lib/userProfile.ts"));
    assert!(!stdout.contains("left-pad"));
}
