//! # Structural/Textual Search Engine
//!
//! Cheap, line-oriented search over a snapshot. This is the heuristic tier
//! next to the compiler-backed [`crate::host`]: it scans any text file
//! (configs, styles, markdown) and never builds a program.
//!
//! The structural extractors are regexes over single lines. They are
//! tuned for conventional formatting and accept noise in both directions:
//!
//! - declarations split across lines are missed;
//! - a class method definition `run() {` is reported as a call to `run`;
//! - text inside strings and comments is matched like code.
//!
//! Results feed a language model, which tolerates these hints. Anything
//! that needs exact answers goes through the compilation host instead.
//!
//! All three searches stop at [`MATCH_LIMIT`] results.

use std::fmt;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use regex::{Regex, RegexBuilder};

use crate::glob::{optional_pattern, PathPattern};
use crate::models::ProjectFile;

/// Result cap shared by every search.
pub const MATCH_LIMIT: usize = 50;

/// One regex hit.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub path: String,
    pub line: usize,
    /// 1-based character column of the match start.
    pub column: usize,
    pub matched: String,
    pub line_text: String,
}

/// Run `pattern` over every text file, line by line.
///
/// Matching is case-insensitive unless `case_sensitive` is set. Each match
/// on a line counts separately toward the cap.
pub fn search_files(
    files: &[ProjectFile],
    pattern: &str,
    file_pattern: Option<&str>,
    case_sensitive: bool,
) -> Result<Vec<TextMatch>> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| anyhow!("invalid regular expression '{}': {}", pattern, e))?;
    let filter = optional_pattern(file_pattern)?;

    let mut out = Vec::new();
    'files: for file in files {
        let Some(text) = file.text() else { continue };
        if !admits(&filter, &file.path) {
            continue;
        }
        for (idx, line) in text.lines().enumerate() {
            // `find_iter` steps past empty matches, so `^` or `a*` terminate.
            for m in regex.find_iter(line) {
                out.push(TextMatch {
                    path: file.path.clone(),
                    line: idx + 1,
                    column: line[..m.start()].chars().count() + 1,
                    matched: m.as_str().to_string(),
                    line_text: line.trim().to_string(),
                });
                if out.len() >= MATCH_LIMIT {
                    break 'files;
                }
            }
        }
    }
    Ok(out)
}

/// Text rendering of [`search_files`]; errors become the message.
pub fn search_files_report(
    files: &[ProjectFile],
    pattern: &str,
    file_pattern: Option<&str>,
    case_sensitive: bool,
) -> String {
    match search_files(files, pattern, file_pattern, case_sensitive) {
        Err(e) => format!("Error: {:#}", e),
        Ok(matches) if matches.is_empty() => format!("No matches found for /{}/.", pattern),
        Ok(matches) => {
            let mut out = format!("Found {} match(es) for /{}/:\n", matches.len(), pattern);
            for m in &matches {
                out.push_str(&format!("{}:{}:{}: {}\n", m.path, m.line, m.column, m.line_text));
            }
            if matches.len() >= MATCH_LIMIT {
                out.push_str(&format!("(results limited to {} matches)\n", MATCH_LIMIT));
            }
            out
        }
    }
}

/// Structure kinds understood by [`search_codebase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    Import,
    Function,
    Class,
    Variable,
    Export,
    Call,
}

impl PatternType {
    pub const ALL: [PatternType; 6] = [
        PatternType::Import,
        PatternType::Function,
        PatternType::Class,
        PatternType::Variable,
        PatternType::Export,
        PatternType::Call,
    ];

    /// Accepts singular or plural names (`call`, `calls`).
    pub fn parse(value: &str) -> Option<PatternType> {
        let lower = value.trim().to_ascii_lowercase();
        let singular = match lower.as_str() {
            "class" | "classes" => "class",
            other => other.strip_suffix('s').unwrap_or(other),
        };
        match singular {
            "import" => Some(PatternType::Import),
            "function" => Some(PatternType::Function),
            "class" => Some(PatternType::Class),
            "variable" => Some(PatternType::Variable),
            "export" => Some(PatternType::Export),
            "call" => Some(PatternType::Call),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Import => "import",
            PatternType::Function => "function",
            PatternType::Class => "class",
            PatternType::Variable => "variable",
            PatternType::Export => "export",
            PatternType::Call => "call",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted structure.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureMatch {
    pub path: String,
    pub line: usize,
    pub kind: PatternType,
    pub name: String,
    pub line_text: String,
}

const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "typeof", "do", "else", "with",
    "new", "await", "super", "import",
];

struct Extractors {
    import_from: Regex,
    import_bare: Regex,
    require: Regex,
    function_decl: Regex,
    arrow_fn: Regex,
    function_expr: Regex,
    class_decl: Regex,
    variable: Regex,
    export_decl: Regex,
    export_list: Regex,
    export_default: Regex,
    export_star: Regex,
    call: Regex,
}

fn extractors() -> &'static Extractors {
    static CELL: OnceLock<Extractors> = OnceLock::new();
    CELL.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("extractor regex is valid");
        Extractors {
            import_from: re(r#"^\s*import\s+(?:type\s+)?(.+?)\s+from\s+['"]([^'"]+)['"]"#),
            import_bare: re(r#"^\s*import\s+['"]([^'"]+)['"]"#),
            require: re(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#),
            function_decl: re(r"\bfunction\s*\*?\s*([A-Za-z_$][\w$]*)\s*[<(]"),
            arrow_fn: re(
                r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::\s*[^=]+)?=>",
            ),
            function_expr: re(r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?function\b"),
            class_decl: re(r"\bclass\s+([A-Za-z_$][\w$]*)"),
            variable: re(r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)"),
            export_decl: re(
                r"^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:async\s+)?(?:abstract\s+)?(?:function\*?|class|const|let|var|interface|type|enum|namespace)\s+([A-Za-z_$][\w$]*)",
            ),
            export_list: re(r"^\s*export\s+(?:type\s+)?\{([^}]*)\}"),
            export_default: re(r"^\s*export\s+default\s+([A-Za-z_$][\w$]*)\s*;?\s*$"),
            export_star: re(r#"^\s*export\s+\*\s+(?:as\s+([A-Za-z_$][\w$]*)\s+)?from\s+['"]([^'"]+)['"]"#),
            call: re(r"([A-Za-z_$][\w$]*(?:\s*\.\s*[A-Za-z_$][\w$]*)*)\s*\("),
        }
    })
}

/// Names of `kind` structures found on one line.
fn extract(kind: PatternType, line: &str) -> Vec<String> {
    let x = extractors();
    let captures = |re: &Regex, group: usize| -> Vec<String> {
        re.captures_iter(line)
            .filter_map(|c| c.get(group).map(|m| m.as_str().to_string()))
            .collect()
    };
    match kind {
        PatternType::Import => {
            let mut names = captures(&x.import_from, 2);
            names.extend(captures(&x.import_bare, 1));
            names.extend(captures(&x.require, 1));
            names
        }
        PatternType::Function => {
            let mut names = captures(&x.function_decl, 1);
            for name in captures(&x.arrow_fn, 1)
                .into_iter()
                .chain(captures(&x.function_expr, 1))
            {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            names
        }
        PatternType::Class => captures(&x.class_decl, 1),
        PatternType::Variable => captures(&x.variable, 1),
        PatternType::Export => {
            let mut names = captures(&x.export_decl, 1);
            if let Some(c) = x.export_list.captures(line) {
                let list = c.get(1).map(|m| m.as_str()).unwrap_or("");
                for item in list.split(',') {
                    let name = item
                        .trim()
                        .trim_start_matches("type ")
                        .split(" as ")
                        .next()
                        .unwrap_or("")
                        .trim();
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }
            if names.is_empty() {
                names.extend(captures(&x.export_default, 1));
            }
            for c in x.export_star.captures_iter(line) {
                names.push(
                    c.get(1)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_else(|| "*".to_string()),
                );
            }
            names
        }
        PatternType::Call => {
            let mut names = Vec::new();
            for c in x.call.captures_iter(line) {
                let Some(m) = c.get(1) else { continue };
                let callee: String = m.as_str().chars().filter(|ch| !ch.is_whitespace()).collect();
                let head = callee.split('.').next().unwrap_or("");
                if CALL_KEYWORDS.contains(&callee.as_str()) || (CALL_KEYWORDS.contains(&head) && !callee.contains('.')) {
                    continue;
                }
                let before = line[..m.start()].trim_end();
                if before.ends_with("function") || before.ends_with("function*") {
                    continue;
                }
                names.push(callee);
            }
            names
        }
    }
}

/// Extract structures of one kind, optionally filtered by name.
pub fn search_codebase(
    files: &[ProjectFile],
    kind: PatternType,
    search_term: Option<&str>,
    file_pattern: Option<&str>,
) -> Result<Vec<StructureMatch>> {
    let filter = optional_pattern(file_pattern)?;
    let term = search_term
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty());

    let mut out = Vec::new();
    'files: for file in files {
        let Some(text) = file.text() else { continue };
        if !admits(&filter, &file.path) {
            continue;
        }
        for (idx, line) in text.lines().enumerate() {
            for name in extract(kind, line) {
                if let Some(term) = &term {
                    if !name.to_lowercase().contains(term) {
                        continue;
                    }
                }
                out.push(StructureMatch {
                    path: file.path.clone(),
                    line: idx + 1,
                    kind,
                    name,
                    line_text: line.trim().to_string(),
                });
                if out.len() >= MATCH_LIMIT {
                    break 'files;
                }
            }
        }
    }
    Ok(out)
}

/// Text rendering of [`search_codebase`], parsing the pattern type.
pub fn search_codebase_report(
    files: &[ProjectFile],
    pattern_type: &str,
    search_term: Option<&str>,
    file_pattern: Option<&str>,
) -> String {
    let Some(kind) = PatternType::parse(pattern_type) else {
        return format!(
            "Error: unknown pattern type '{}'. Expected one of: imports, functions, classes, variables, exports, calls.",
            pattern_type
        );
    };
    let scope = match search_term {
        Some(t) if !t.trim().is_empty() => format!(" matching '{}'", t.trim()),
        _ => String::new(),
    };
    match search_codebase(files, kind, search_term, file_pattern) {
        Err(e) => format!("Error: {:#}", e),
        Ok(matches) if matches.is_empty() => format!("No {} patterns found{}.", kind, scope),
        Ok(matches) => {
            let mut out = format!("Found {} {} pattern(s){}:\n", matches.len(), kind, scope);
            for m in &matches {
                out.push_str(&format!("{}:{} [{}] {}: {}\n", m.path, m.line, m.kind, m.name, m.line_text));
            }
            if matches.len() >= MATCH_LIMIT {
                out.push_str(&format!("(results limited to {} matches)\n", MATCH_LIMIT));
            }
            out
        }
    }
}

/// Paths of files (never folders) matching a glob, plus the total count.
pub fn find_files_by_pattern(files: &[ProjectFile], pattern: &str) -> Result<(Vec<String>, usize)> {
    let glob = PathPattern::new(pattern).context("find_files_by_pattern")?;
    let all: Vec<&ProjectFile> = files
        .iter()
        .filter(|f| f.is_file() && glob.is_match(&f.path))
        .collect();
    let total = all.len();
    let shown = all
        .into_iter()
        .take(MATCH_LIMIT)
        .map(|f| f.path.clone())
        .collect();
    Ok((shown, total))
}

pub fn find_files_by_pattern_report(files: &[ProjectFile], pattern: &str) -> String {
    match find_files_by_pattern(files, pattern) {
        Err(e) => format!("Error: {:#}", e),
        Ok((paths, _)) if paths.is_empty() => format!("No files found matching '{}'.", pattern),
        Ok((paths, total)) => {
            let mut out = format!("Found {} file(s) matching '{}':\n", total, pattern);
            for p in &paths {
                out.push_str(p);
                out.push('\n');
            }
            if total > paths.len() {
                out.push_str(&format!("(showing {} of {})\n", paths.len(), total));
            }
            out
        }
    }
}

fn admits(filter: &Option<PathPattern>, path: &str) -> bool {
    filter.as_ref().map(|g| g.is_match(path)).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<ProjectFile> {
        vec![
            ProjectFile::file("src/a.ts", "export function foo(){}"),
            ProjectFile::file("src/b.ts", "import {foo} from './a'; foo();"),
            ProjectFile::folder("src"),
            ProjectFile::file("README.md", "Foo docs\nfoo again foo"),
        ]
    }

    #[test]
    fn test_search_files_counts_each_match() {
        let m = search_files(&snapshot(), "foo", Some("*.md"), false).unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!((m[2].line, m[2].column), (2, 11));
    }

    #[test]
    fn test_search_files_case_sensitive() {
        let m = search_files(&snapshot(), "Foo", None, true).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].path, "README.md");
    }

    #[test]
    fn test_search_files_zero_length_pattern_terminates() {
        let m = search_files(&snapshot(), "^", None, false).unwrap();
        assert_eq!(m.len(), 4);
    }

    #[test]
    fn test_search_files_is_idempotent_and_capped() {
        let big = vec![ProjectFile::file("big.txt", "x\n".repeat(200))];
        let first = search_files(&big, "x", None, false).unwrap();
        let second = search_files(&big, "x", None, false).unwrap();
        assert_eq!(first.len(), MATCH_LIMIT);
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let text = search_files_report(&snapshot(), "foo(", None, false);
        assert!(text.starts_with("Error: invalid regular expression"));
    }

    #[test]
    fn test_call_scenario() {
        let m = search_codebase(&snapshot(), PatternType::Call, Some("foo"), None).unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].path, "src/b.ts");
        assert_eq!(m[0].name, "foo");
    }

    #[test]
    fn test_calls_skip_keywords_and_keep_dotted_callees() {
        let names = extract(PatternType::Call, "if (ok) { console.log(x); return wrap(y); }");
        assert_eq!(names, vec!["console.log".to_string(), "wrap".to_string()]);
    }

    #[test]
    fn test_export_lists_are_split_and_unaliased() {
        let names = extract(PatternType::Export, "export { alpha, beta as gamma, type Delta } from './x';");
        assert_eq!(names, vec!["alpha", "beta", "Delta"]);
        assert_eq!(extract(PatternType::Export, "export default App;"), vec!["App"]);
        assert_eq!(extract(PatternType::Export, "export const x = 1;"), vec!["x"]);
    }

    #[test]
    fn test_function_forms() {
        assert_eq!(extract(PatternType::Function, "export async function load(id) {"), vec!["load"]);
        assert_eq!(extract(PatternType::Function, "const handle = async (e) => {"), vec!["handle"]);
        assert_eq!(extract(PatternType::Function, "let f = function () {}"), vec!["f"]);
    }

    #[test]
    fn test_imports_and_pattern_type_plurals() {
        assert_eq!(PatternType::parse("imports"), Some(PatternType::Import));
        assert_eq!(PatternType::parse("classes"), Some(PatternType::Class));
        assert_eq!(PatternType::parse("nope"), None);
        assert_eq!(
            extract(PatternType::Import, "import React, { useState } from 'react';"),
            vec!["react"]
        );
        assert_eq!(extract(PatternType::Import, "const fs = require('fs');"), vec!["fs"]);
    }

    #[test]
    fn test_find_files_respects_separators() {
        let files = vec![
            ProjectFile::file("a.ts", ""),
            ProjectFile::file("src/b.ts", ""),
            ProjectFile::file("src/deep/c.ts", ""),
            ProjectFile::folder("src/x.ts"),
        ];
        let (top, _) = find_files_by_pattern(&files, "*.ts").unwrap();
        assert_eq!(top, vec!["a.ts"]);
        let (all, total) = find_files_by_pattern(&files, "**/*.ts").unwrap();
        assert_eq!(total, 3);
        assert!(all.iter().all(|p| p.ends_with(".ts")));
    }

    #[test]
    fn test_find_files_route_segments_match_literally() {
        let files = vec![
            ProjectFile::file("app/[id]/page.tsx", ""),
            ProjectFile::file("app/i/page.tsx", ""),
            ProjectFile::file("src/{a,b}.ts", ""),
            ProjectFile::file("src/a.ts", ""),
        ];
        let (paths, _) = find_files_by_pattern(&files, "app/[id]/page.tsx").unwrap();
        assert_eq!(paths, vec!["app/[id]/page.tsx"]);

        let text = find_files_by_pattern_report(&files, "src/{a,b}.ts");
        assert_eq!(text, "Found 1 file(s) matching 'src/{a,b}.ts':\nsrc/{a,b}.ts\n");
    }

    #[test]
    fn test_find_files_truncation_suffix() {
        let files: Vec<ProjectFile> = (0..60)
            .map(|i| ProjectFile::file(format!("f{}.ts", i), ""))
            .collect();
        let text = find_files_by_pattern_report(&files, "*.ts");
        assert!(text.ends_with("(showing 50 of 60)\n"));
    }
}
