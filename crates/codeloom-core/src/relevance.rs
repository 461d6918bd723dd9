//! # Relevance Scorer
//!
//! Ranks snapshot files for a free-text query and an optional anchor file
//! (the file the user is editing). The score is a sum of independent,
//! explainable signals; each contributing signal appends a reason.
//!
//! | signal                                         | weight            |
//! |------------------------------------------------|-------------------|
//! | anchor imports candidate, or candidate imports anchor | 10         |
//! | candidate exports names the anchor mentions    | 5                 |
//! | candidate identifiers contain query terms      | 7 × fraction      |
//! | path contains the whitespace-stripped query    | 7                 |
//! | modified < 1h / < 24h / < 168h ago             | 5 / 2.5 / 1       |
//! | directory proximity to anchor (> 0.5 only)     | 3 × proximity     |
//! | same file-type category as anchor              | 2                 |
//! | content contains the query                     | 3                 |
//!
//! Anchor-dependent signals only ever add, so dropping the anchor can never
//! raise a file's score. Folders and files without content are skipped, and
//! zero-score files never appear in results.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::models::{ProjectFile, RelevanceScore};
use crate::resolve::ModuleResolver;
use crate::store::normalize_path;

pub const DEFAULT_LIMIT: usize = 5;

const IMPORT_WEIGHT: f64 = 10.0;
const SHARED_SYMBOL_WEIGHT: f64 = 5.0;
const QUERY_SYMBOL_WEIGHT: f64 = 7.0;
const PATH_QUERY_WEIGHT: f64 = 7.0;
const RECENCY_WEIGHT: f64 = 5.0;
const PROXIMITY_WEIGHT: f64 = 3.0;
const TYPE_AFFINITY_WEIGHT: f64 = 2.0;
const CONTENT_WEIGHT: f64 = 3.0;

const KEYWORDS: &[&str] = &[
    "abstract", "any", "as", "async", "await", "boolean", "break", "case", "catch", "class",
    "const", "continue", "constructor", "declare", "default", "delete", "else", "enum", "export",
    "extends", "false", "finally", "for", "from", "function", "get", "implements", "import", "in",
    "instanceof", "interface", "let", "new", "null", "number", "private", "protected", "public",
    "readonly", "return", "set", "static", "string", "super", "switch", "this", "throw", "true",
    "try", "type", "typeof", "undefined", "var", "void", "while", "yield",
];

/// Broad file-type buckets for the affinity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    TypedScript,
    Script,
    Style,
    Markup,
    Config,
    Prose,
}

impl FileCategory {
    pub fn of(path: &str) -> Option<FileCategory> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "ts" | "tsx" | "mts" | "cts" => Some(FileCategory::TypedScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(FileCategory::Script),
            "css" | "scss" | "sass" | "less" => Some(FileCategory::Style),
            "html" | "htm" | "svg" | "xml" | "vue" | "svelte" => Some(FileCategory::Markup),
            "json" | "yaml" | "yml" | "toml" | "ini" | "env" => Some(FileCategory::Config),
            "md" | "mdx" | "txt" | "rst" => Some(FileCategory::Prose),
            _ => None,
        }
    }
}

struct Patterns {
    specifier: Regex,
    export_decl: Regex,
    export_list: Regex,
    identifier: Regex,
}

fn patterns() -> &'static Patterns {
    static CELL: OnceLock<Patterns> = OnceLock::new();
    CELL.get_or_init(|| Patterns {
        specifier: Regex::new(
            r#"(?:\bfrom\s*['"]([^'"]+)['"])|(?:\bimport\s*['"]([^'"]+)['"])|(?:\b(?:require|import)\(\s*['"]([^'"]+)['"]\s*\))"#,
        )
        .expect("specifier regex is valid"),
        export_decl: Regex::new(
            r"\bexport\s+(?:default\s+)?(?:declare\s+)?(?:async\s+)?(?:abstract\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
        )
        .expect("export regex is valid"),
        export_list: Regex::new(r"\bexport\s+(?:type\s+)?\{([^}]*)\}").expect("export list regex is valid"),
        identifier: Regex::new(r"[A-Za-z_$][\w$]*").expect("identifier regex is valid"),
    })
}

/// Module specifiers a file imports or re-exports from.
fn import_specifiers(content: &str) -> Vec<&str> {
    patterns()
        .specifier
        .captures_iter(content)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str())
        .collect()
}

fn exported_names(content: &str) -> Vec<String> {
    let p = patterns();
    let mut names: Vec<String> = p
        .export_decl
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    for c in p.export_list.captures_iter(content) {
        let Some(list) = c.get(1) else { continue };
        for item in list.as_str().split(',') {
            let name = item
                .trim()
                .trim_start_matches("type ")
                .split(" as ")
                .next()
                .unwrap_or("")
                .trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Every identifier-shaped token, short names included.
fn referenced_names(content: &str) -> HashSet<&str> {
    patterns().identifier.find_iter(content).map(|m| m.as_str()).collect()
}

/// Identifiers longer than two characters, keywords removed.
fn identifiers(content: &str) -> HashSet<&str> {
    patterns()
        .identifier
        .find_iter(content)
        .map(|m| m.as_str())
        .filter(|s| s.len() > 2 && !KEYWORDS.contains(s))
        .collect()
}

fn directories(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    segments
}

/// Shared leading directories over the deeper directory depth.
pub fn proximity(a: &str, b: &str) -> f64 {
    let (da, db) = (directories(a), directories(b));
    let depth = da.len().max(db.len());
    if depth == 0 {
        return 0.0;
    }
    let shared = da.iter().zip(db.iter()).take_while(|(x, y)| x == y).count();
    shared as f64 / depth as f64
}

/// Parameters of one ranking request.
#[derive(Debug, Clone)]
pub struct RelevanceRequest<'a> {
    pub query: &'a str,
    pub current_file: Option<&'a str>,
    pub limit: usize,
}

impl<'a> RelevanceRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            current_file: None,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_current_file(mut self, path: Option<&'a str>) -> Self {
        self.current_file = path;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

struct Anchor<'f> {
    path: String,
    imports: HashSet<String>,
    names: HashSet<&'f str>,
}

/// Scores the files of one snapshot.
pub struct RelevanceScorer<'f> {
    files: &'f [ProjectFile],
    known: HashSet<&'f str>,
    resolver: ModuleResolver,
    now: DateTime<Utc>,
}

impl<'f> RelevanceScorer<'f> {
    pub fn new(files: &'f [ProjectFile], resolver: ModuleResolver) -> Self {
        let known = files
            .iter()
            .filter(|f| f.is_file())
            .map(|f| f.path.as_str())
            .collect();
        Self {
            files,
            known,
            resolver,
            now: Utc::now(),
        }
    }

    /// Fix the clock used by the recency signal.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn resolved_imports(&self, from: &str, content: &str) -> HashSet<String> {
        import_specifiers(content)
            .into_iter()
            .filter_map(|spec| self.resolver.resolve(from, spec, |p| self.known.contains(p)))
            .collect()
    }

    fn anchor(&self, current_file: Option<&str>) -> Option<Anchor<'f>> {
        let path = normalize_path(current_file?.trim());
        if path.is_empty() {
            return None;
        }
        let content = self
            .files
            .iter()
            .find(|f| f.path == path)
            .and_then(|f| f.text());
        let (imports, names) = match content {
            Some(text) => (self.resolved_imports(&path, text), referenced_names(text)),
            None => (HashSet::new(), HashSet::new()),
        };
        Some(Anchor {
            path,
            imports,
            names,
        })
    }

    /// Ranked files, best first, at most `request.limit` (minimum one).
    pub fn rank(&self, request: &RelevanceRequest<'_>) -> Vec<RelevanceScore> {
        let anchor = self.anchor(request.current_file);
        let query = request.query.trim().to_lowercase();
        let terms: Vec<String> = query
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect();
        let compact: String = query.chars().filter(|c| !c.is_whitespace()).collect();

        let mut scored: Vec<RelevanceScore> = Vec::new();
        for file in self.files {
            let Some(content) = file.text() else { continue };
            let mut score = 0.0;
            let mut reasons = Vec::new();

            if let Some(anchor) = &anchor {
                if anchor.imports.contains(&file.path) {
                    score += IMPORT_WEIGHT;
                    reasons.push(format!("Imported by {}", anchor.path));
                } else if file.path != anchor.path
                    && self.resolved_imports(&file.path, content).contains(&anchor.path)
                {
                    score += IMPORT_WEIGHT;
                    reasons.push(format!("Imports {}", anchor.path));
                }

                if file.path != anchor.path {
                    let shared: Vec<String> = exported_names(content)
                        .into_iter()
                        .filter(|n| anchor.names.contains(n.as_str()))
                        .collect();
                    if !shared.is_empty() {
                        score += SHARED_SYMBOL_WEIGHT;
                        let shown: Vec<&str> = shared.iter().take(3).map(String::as_str).collect();
                        reasons.push(format!("Exports symbols used by current file: {}", shown.join(", ")));
                    }
                }
            }

            if !terms.is_empty() {
                let idents: Vec<String> = identifiers(content).into_iter().map(str::to_lowercase).collect();
                let matched = terms
                    .iter()
                    .filter(|t| idents.iter().any(|i| i.contains(t.as_str())))
                    .count();
                if matched > 0 {
                    let fraction = matched as f64 / terms.len() as f64;
                    score += QUERY_SYMBOL_WEIGHT * fraction;
                    reasons.push(format!("Symbols match {}/{} query terms", matched, terms.len()));
                }
            }

            if !compact.is_empty() && file.path.to_lowercase().contains(&compact) {
                score += PATH_QUERY_WEIGHT;
                reasons.push("Path matches query".to_string());
            }

            if let Some(modified) = file.last_modified {
                let hours = (self.now - modified).num_minutes() as f64 / 60.0;
                let (weight, label) = if hours < 1.0 {
                    (RECENCY_WEIGHT, "within the last hour")
                } else if hours < 24.0 {
                    (RECENCY_WEIGHT / 2.0, "within the last day")
                } else if hours < 168.0 {
                    (RECENCY_WEIGHT / 5.0, "within the last week")
                } else {
                    (0.0, "")
                };
                if weight > 0.0 {
                    score += weight;
                    reasons.push(format!("Modified {}", label));
                }
            }

            if let Some(anchor) = &anchor {
                let p = proximity(&file.path, &anchor.path);
                if p > 0.5 {
                    score += PROXIMITY_WEIGHT * p;
                    reasons.push(format!("Near current file ({:.0}% shared path)", p * 100.0));
                }
                let category = FileCategory::of(&file.path);
                if category.is_some() && category == FileCategory::of(&anchor.path) {
                    score += TYPE_AFFINITY_WEIGHT;
                    reasons.push("Same file type as current file".to_string());
                }
            }

            if !query.is_empty() && content.to_lowercase().contains(&query) {
                score += CONTENT_WEIGHT;
                reasons.push("Content mentions query".to_string());
            }

            if score > 0.0 {
                scored.push(RelevanceScore {
                    path: file.path.clone(),
                    score,
                    reasons,
                });
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.limit.max(1));
        scored
    }

    pub fn report(&self, request: &RelevanceRequest<'_>) -> String {
        let ranked = self.rank(request);
        if ranked.is_empty() {
            return format!("No relevant files found for '{}'.", request.query);
        }
        let mut out = format!("Top {} relevant file(s) for '{}':\n", ranked.len(), request.query);
        for (i, r) in ranked.iter().enumerate() {
            out.push_str(&format!("{}. {} (score {:.1})\n", i + 1, r.path, r.score));
            for reason in &r.reasons {
                out.push_str(&format!("   - {}\n", reason));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scenario() -> Vec<ProjectFile> {
        vec![
            ProjectFile::file("src/a.ts", "export function foo(){}"),
            ProjectFile::file("src/b.ts", "import {foo} from './a'; foo();"),
            ProjectFile::file("lib/c.ts", "export const unrelated = 1;"),
            ProjectFile::folder("src"),
        ]
    }

    #[test]
    fn test_import_adjacency_ranks_dependency_first() {
        let files = scenario();
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let ranked = scorer.rank(&RelevanceRequest::new("foo").with_current_file(Some("src/b.ts")));
        let pos = |p: &str| ranked.iter().position(|r| r.path == p);
        assert!(pos("src/a.ts").is_some());
        assert!(pos("src/a.ts") < pos("lib/c.ts") || pos("lib/c.ts").is_none());
        let a = &ranked[pos("src/a.ts").unwrap()];
        assert!(a.reasons.iter().any(|r| r.starts_with("Imported by")));
    }

    #[test]
    fn test_short_export_counts_as_shared_symbol() {
        let files = vec![
            ProjectFile::file("src/db.ts", "export const db = connect();"),
            ProjectFile::file("lib/user.ts", "db.query('select 1');"),
        ];
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let ranked = scorer.rank(&RelevanceRequest::new("").with_current_file(Some("lib/user.ts")));
        let db = ranked.iter().find(|r| r.path == "src/db.ts").unwrap();
        assert!(
            db.reasons.iter().any(|r| r == "Exports symbols used by current file: db"),
            "{:?}",
            db.reasons
        );
    }

    #[test]
    fn test_reverse_import_direction() {
        let files = scenario();
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let ranked = scorer.rank(&RelevanceRequest::new("").with_current_file(Some("src/a.ts")));
        let b = ranked.iter().find(|r| r.path == "src/b.ts").unwrap();
        assert!(b.reasons.iter().any(|r| r == "Imports src/a.ts"));
    }

    #[test]
    fn test_no_zero_scores() {
        let files = scenario();
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let ranked = scorer.rank(&RelevanceRequest::new("zzzz").with_limit(10));
        assert!(ranked.is_empty());
        let ranked = scorer.rank(&RelevanceRequest::new("foo").with_limit(10));
        assert!(ranked.iter().all(|r| r.score > 0.0));
    }

    #[test]
    fn test_dropping_anchor_never_raises_scores() {
        let files = scenario();
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let with = scorer.rank(&RelevanceRequest::new("foo").with_current_file(Some("src/b.ts")).with_limit(10));
        let without = scorer.rank(&RelevanceRequest::new("foo").with_limit(10));
        for r in &without {
            let anchored = with.iter().find(|w| w.path == r.path).map(|w| w.score).unwrap_or(0.0);
            assert!(r.score <= anchored + 1e-9, "{} rose without anchor", r.path);
        }
    }

    #[test]
    fn test_unresolvable_anchor_degrades() {
        let files = scenario();
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let ranked = scorer.rank(&RelevanceRequest::new("").with_current_file(Some("src/missing.ts")));
        let a = ranked.iter().find(|r| r.path == "src/a.ts").unwrap();
        assert!((a.score - (PROXIMITY_WEIGHT + TYPE_AFFINITY_WEIGHT)).abs() < 1e-9);
    }

    #[test]
    fn test_recency_tiers() {
        let now = Utc::now();
        let files = vec![
            ProjectFile::file("x/fresh.md", "a").with_last_modified(now - Duration::minutes(5)),
            ProjectFile::file("x/today.md", "a").with_last_modified(now - Duration::hours(3)),
            ProjectFile::file("x/week.md", "a").with_last_modified(now - Duration::hours(100)),
            ProjectFile::file("x/old.md", "a").with_last_modified(now - Duration::days(30)),
        ];
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default()).at(now);
        let ranked = scorer.rank(&RelevanceRequest::new("").with_limit(10));
        let scores: Vec<(String, f64)> = ranked.into_iter().map(|r| (r.path, r.score)).collect();
        assert_eq!(
            scores,
            vec![
                ("x/fresh.md".to_string(), 5.0),
                ("x/today.md".to_string(), 2.5),
                ("x/week.md".to_string(), 1.0),
            ]
        );
    }

    #[test]
    fn test_proximity_fraction() {
        assert_eq!(proximity("a.ts", "b.ts"), 0.0);
        assert_eq!(proximity("src/ui/a.ts", "src/ui/b.ts"), 1.0);
        assert_eq!(proximity("src/ui/a.ts", "src/b.ts"), 0.5);
    }

    #[test]
    fn test_path_and_limit() {
        let files: Vec<ProjectFile> = (0..8)
            .map(|i| ProjectFile::file(format!("src/userProfile{}.ts", i), "x"))
            .collect();
        let scorer = RelevanceScorer::new(&files, ModuleResolver::default());
        let ranked = scorer.rank(&RelevanceRequest::new("user profile"));
        assert_eq!(ranked.len(), DEFAULT_LIMIT);
        assert!(ranked.iter().all(|r| r.reasons.iter().any(|x| x == "Path matches query")));
        // stable order among ties
        assert_eq!(ranked[0].path, "src/userProfile0.ts");
    }
}
