//! Core data models shared by the analytical services.
//!
//! A [`ProjectFile`] is one entry of a snapshot fetched from the external
//! project store. Snapshots are immutable for the lifetime of one analysis:
//! every service receives a slice of files and never mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a snapshot entry is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// One entry of a project snapshot.
///
/// Paths are slash-separated and relative to the project root. `content` is
/// `None` for folders and for files the store could not decode as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    pub kind: FileKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

impl ProjectFile {
    /// A text file with content and no modification time.
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::File,
            content: Some(content.into()),
            last_modified: None,
        }
    }

    /// A folder entry.
    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Folder,
            content: None,
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, ts: DateTime<Utc>) -> Self {
        self.last_modified = Some(ts);
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Returns the content when this entry is a file with text content.
    pub fn text(&self) -> Option<&str> {
        match self.kind {
            FileKind::File => self.content.as_deref(),
            FileKind::Folder => None,
        }
    }
}

/// Coarse symbol classification used by `find_symbol` filters.
///
/// [`SymbolKind::Other`] is the unclassified bucket: it passes every filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Variable,
    Interface,
    Type,
    Other,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Class => "class",
            SymbolKind::Variable => "variable",
            SymbolKind::Interface => "interface",
            SymbolKind::Type => "type",
            SymbolKind::Other => "other",
        }
    }

    /// Parses a filter value. `"all"` and unknown values yield `None`
    /// (no filtering).
    pub fn parse_filter(value: &str) -> Option<SymbolKind> {
        match value.trim().to_ascii_lowercase().as_str() {
            "function" => Some(SymbolKind::Function),
            "class" => Some(SymbolKind::Class),
            "variable" => Some(SymbolKind::Variable),
            "interface" => Some(SymbolKind::Interface),
            "type" => Some(SymbolKind::Type),
            _ => None,
        }
    }

    /// True when a symbol of this kind passes `filter`.
    pub fn matches_filter(&self, filter: Option<SymbolKind>) -> bool {
        match filter {
            None => true,
            Some(f) => *self == f || *self == SymbolKind::Other,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A symbol found in a file's navigation tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolResult {
    /// Display name, dotted for nested scopes (`Outer.Inner`).
    pub name: String,
    pub kind: SymbolKind,
    pub path: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

/// Diagnostic severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive severity filter for `get_diagnostics`.
///
/// `Warning` includes errors; `All` includes everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeverityFilter {
    Error,
    Warning,
    #[default]
    All,
}

impl SeverityFilter {
    pub fn parse(value: &str) -> SeverityFilter {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => SeverityFilter::Error,
            "warning" => SeverityFilter::Warning,
            _ => SeverityFilter::All,
        }
    }

    pub fn admits(&self, severity: Severity) -> bool {
        match self {
            SeverityFilter::Error => severity == Severity::Error,
            SeverityFilter::Warning => severity <= Severity::Warning,
            SeverityFilter::All => true,
        }
    }
}

/// A compiler-style diagnostic with 1-based position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub code: u32,
}

/// A file's relevance to a query, with the factors that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceScore {
    pub path: String,
    pub score: f64,
    pub reasons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_filter_admits_unclassified() {
        let filter = SymbolKind::parse_filter("class");
        assert!(SymbolKind::Class.matches_filter(filter));
        assert!(SymbolKind::Other.matches_filter(filter));
        assert!(!SymbolKind::Function.matches_filter(filter));
        assert!(SymbolKind::Function.matches_filter(SymbolKind::parse_filter("all")));
    }

    #[test]
    fn test_severity_filter_is_inclusive() {
        let error = SeverityFilter::parse("error");
        let warning = SeverityFilter::parse("warning");
        let all = SeverityFilter::parse("all");
        for sev in [Severity::Error, Severity::Warning, Severity::Info, Severity::Hint] {
            if error.admits(sev) {
                assert!(warning.admits(sev));
            }
            if warning.admits(sev) {
                assert!(all.admits(sev));
            }
        }
        assert!(!warning.admits(Severity::Hint));
    }

    #[test]
    fn test_folder_has_no_text() {
        let f = ProjectFile::folder("src");
        assert!(f.text().is_none());
        assert!(ProjectFile::file("a.ts", "x").text().is_some());
    }
}
