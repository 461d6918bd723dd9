//! Parsed source files and position arithmetic.
//!
//! Positions exposed to callers are 1-based lines and 1-based columns
//! counted in characters. Internally everything is a byte offset into the
//! file's text, which is what tree-sitter nodes report.

use anyhow::{anyhow, Context, Result};
use tree_sitter::{Language, Node, Parser, Tree};
use tree_sitter_language::LanguageFn;

/// Grammar flavour for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    TypeScript,
    Tsx,
}

impl Dialect {
    fn language_fn(self) -> LanguageFn {
        match self {
            Dialect::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
            Dialect::Tsx => tree_sitter_typescript::LANGUAGE_TSX,
        }
    }
}

/// One parsed file of the compilation unit.
pub struct SourceFile {
    pub path: String,
    pub text: String,
    pub tree: Tree,
    /// True for `.ts`-family files, where type annotations are expected.
    pub typed: bool,
    /// True for `.d.ts` declaration files.
    pub declaration: bool,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn parse(path: &str, text: &str, dialect: Dialect) -> Result<Self> {
        let language = Language::from(dialect.language_fn());
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .context("failed to load TypeScript grammar")?;
        let tree = parser
            .parse(text, None)
            .ok_or_else(|| anyhow!("parser returned no tree for {}", path))?;

        let lower = path.to_ascii_lowercase();
        let typed = [".ts", ".tsx", ".mts", ".cts"]
            .iter()
            .any(|ext| lower.ends_with(ext));

        Ok(Self {
            path: path.to_string(),
            text: text.to_string(),
            tree,
            typed,
            declaration: lower.ends_with(".d.ts"),
            line_starts: line_starts(text),
        })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Source text covered by `node`.
    pub fn node_text(&self, node: Node<'_>) -> &str {
        self.text.get(node.byte_range()).unwrap_or("")
    }

    /// 1-based (line, column) of a byte offset.
    pub fn position(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let start = self.line_starts[line_idx];
        let column = self
            .text
            .get(start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0);
        (line_idx + 1, column + 1)
    }

    /// Byte offset of a 1-based (line, column). Columns past the end of
    /// the line clamp to the line end; lines out of range yield `None`.
    pub fn offset_at(&self, line: usize, column: usize) -> Option<usize> {
        if line == 0 || line > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line - 1];
        let line_text = self.line_text(line);
        let delta = line_text
            .char_indices()
            .nth(column.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(line_text.len());
        Some(start + delta)
    }

    /// Text of a 1-based line without its terminator.
    pub fn line_text(&self, line: usize) -> &str {
        if line == 0 || line > self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line - 1];
        let end = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(self.text.len());
        self.text
            .get(start..end)
            .unwrap_or("")
            .trim_end_matches(['\n', '\r'])
    }
}

fn line_starts(text: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Named children of a node, collected so callers can recurse freely.
pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let nodes = node.named_children(&mut cursor).collect();
    nodes
}

/// All children including anonymous tokens such as `default` or `const`.
pub fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let nodes = node.children(&mut cursor).collect();
    nodes
}

/// True when `node` has an anonymous child token of the given kind.
pub fn has_token(node: Node<'_>, token: &str) -> bool {
    children(node)
        .iter()
        .any(|c| !c.is_named() && c.kind() == token)
}

/// Function-like initializer values.
pub fn is_function_like(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

/// Unquoted value of a string literal node.
pub fn string_value(file: &SourceFile, node: Node<'_>) -> String {
    let raw = file.node_text(node);
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}
