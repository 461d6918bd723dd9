//! # Virtual Compilation Host
//!
//! Symbol-level intelligence over a project snapshot with no real
//! filesystem behind it.
//!
//! A [`CompilationHost`] is built from the files of one snapshot. The
//! analyzable subset (TypeScript and, optionally, JavaScript sources) is
//! copied into a [`VirtualFileSystem`], which answers every host callback
//! (file existence, content, directory listing) from memory. The files are
//! parsed into a [`Program`]; module specifiers resolve bundler-style
//! against the same map.
//!
//! The host is ephemeral: build it, run one query, drop it. Nothing is
//! cached between calls, so a query never observes stale content.
//!
//! All four operations render plain text for a language model. A target
//! file missing from the analyzable subset is reported in the returned
//! text, never as an `Err`.

pub mod binder;
pub mod diagnostics;
pub mod navigation;
pub mod syntax;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{Diagnostic, ProjectFile, Severity, SeverityFilter, SymbolKind, SymbolResult};
use crate::resolve::ModuleResolver;
use crate::store::{normalize_path, parent_dir};
use binder::{Access, Binder};
use syntax::{Dialect, SourceFile};

/// Maximum entries returned by `find_symbol`.
pub const SYMBOL_LIMIT: usize = 50;

/// JSX handling for `.tsx`/`.jsx` sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum JsxMode {
    Preserve,
    #[default]
    ReactJsx,
    None,
}

/// Settings fixed for one compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Language-feature level, informational (the grammar accepts all).
    pub target: String,
    pub jsx: JsxMode,
    /// Report implicitly-any parameters as errors rather than warnings.
    pub strict: bool,
    /// Include `.js`-family files in the analyzable subset.
    pub allow_js: bool,
    pub alias_prefix: String,
    pub alias_target: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            target: "es2022".into(),
            jsx: JsxMode::ReactJsx,
            strict: false,
            allow_js: true,
            alias_prefix: "@/".into(),
            alias_target: String::new(),
        }
    }
}

impl CompilerSettings {
    pub fn is_analyzable(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        let jsx = self.jsx != JsxMode::None;
        if lower.ends_with(".ts") || lower.ends_with(".mts") || lower.ends_with(".cts") {
            true
        } else if lower.ends_with(".tsx") {
            jsx
        } else if lower.ends_with(".js") || lower.ends_with(".mjs") || lower.ends_with(".cjs") {
            self.allow_js
        } else if lower.ends_with(".jsx") {
            self.allow_js && jsx
        } else {
            false
        }
    }

    pub fn dialect_for(&self, path: &str) -> Dialect {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".tsx") || lower.ends_with(".jsx") {
            Dialect::Tsx
        } else if (lower.ends_with(".js") || lower.ends_with(".mjs") || lower.ends_with(".cjs"))
            && self.jsx != JsxMode::None
        {
            Dialect::Tsx
        } else {
            Dialect::TypeScript
        }
    }

    pub fn resolver(&self) -> ModuleResolver {
        ModuleResolver::new(self.alias_prefix.clone(), self.alias_target.clone())
    }
}

/// In-memory host callbacks over one snapshot.
#[derive(Debug, Clone, Default)]
pub struct VirtualFileSystem {
    sources: BTreeMap<String, String>,
    files: BTreeSet<String>,
    directories: BTreeSet<String>,
}

impl VirtualFileSystem {
    pub fn from_snapshot(files: &[ProjectFile], settings: &CompilerSettings) -> Self {
        let mut vfs = VirtualFileSystem::default();
        vfs.directories.insert(String::new());
        for entry in files {
            let path = normalize_path(&entry.path);
            if path.is_empty() {
                continue;
            }
            let mut dir = if entry.is_file() {
                vfs.files.insert(path.clone());
                if let Some(text) = entry.text() {
                    if settings.is_analyzable(&path) {
                        vfs.sources.insert(path.clone(), text.to_string());
                    }
                }
                parent_dir(&path).to_string()
            } else {
                path.clone()
            };
            while !dir.is_empty() && vfs.directories.insert(dir.clone()) {
                dir = parent_dir(&dir).to_string();
            }
        }
        vfs
    }

    /// Any snapshot file, analyzable or not.
    pub fn file_exists(&self, path: &str) -> bool {
        self.files.contains(&normalize_path(path))
    }

    /// Content of an analyzable source.
    pub fn read_file(&self, path: &str) -> Option<&str> {
        self.sources.get(&normalize_path(path)).map(String::as_str)
    }

    pub fn directory_exists(&self, path: &str) -> bool {
        self.directories.contains(&normalize_path(path))
    }

    /// Names of the immediate subdirectories of `path`.
    pub fn get_directories(&self, path: &str) -> Vec<String> {
        let base = normalize_path(path);
        self.directories
            .iter()
            .filter(|d| !d.is_empty() && parent_dir(d) == base)
            .map(|d| d.rsplit('/').next().unwrap_or(d).to_string())
            .collect()
    }

    pub fn source_paths(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// The parsed compilation unit.
pub struct Program {
    settings: CompilerSettings,
    resolver: ModuleResolver,
    vfs: VirtualFileSystem,
    files: Vec<SourceFile>,
    index: HashMap<String, usize>,
}

impl Program {
    pub fn new(vfs: VirtualFileSystem, settings: CompilerSettings) -> Result<Self> {
        let mut files = Vec::with_capacity(vfs.source_count());
        let mut index = HashMap::new();
        for path in vfs.source_paths() {
            let text = vfs.read_file(path).unwrap_or_default();
            let file = SourceFile::parse(path, text, settings.dialect_for(path))?;
            index.insert(path.to_string(), files.len());
            files.push(file);
        }
        Ok(Self {
            resolver: settings.resolver(),
            settings,
            vfs,
            files,
            index,
        })
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file_index(&self, path: &str) -> Option<usize> {
        self.index.get(&normalize_path(path)).copied()
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    pub fn vfs(&self) -> &VirtualFileSystem {
        &self.vfs
    }

    /// Snapshot path a specifier in `from` resolves to.
    pub fn resolve_path(&self, from: usize, specifier: &str) -> Option<String> {
        let from_path = &self.files[from].path;
        self.resolver
            .resolve(from_path, specifier, |p| self.vfs.file_exists(p))
    }

    /// Program file a specifier in `from` resolves to.
    pub fn resolve_module(&self, from: usize, specifier: &str) -> Option<usize> {
        self.resolve_path(from, specifier)
            .and_then(|p| self.file_index(&p))
    }
}

/// A reference site returned by [`CompilationHost::references_at`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSite {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub access: Access,
    pub context: String,
}

/// A definition site returned by [`CompilationHost::definitions_at`].
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionSite {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub kind: &'static str,
    pub name: String,
    pub context: String,
}

/// Language-service facade over one snapshot.
pub struct CompilationHost {
    program: Program,
}

impl CompilationHost {
    pub fn new(files: &[ProjectFile], settings: CompilerSettings) -> Result<Self> {
        let vfs = VirtualFileSystem::from_snapshot(files, &settings);
        Ok(Self {
            program: Program::new(vfs, settings)?,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Outline entries whose name contains `query` (case-insensitive).
    ///
    /// Returns every match; callers apply [`SYMBOL_LIMIT`].
    pub fn symbols(&self, query: &str, kind: Option<SymbolKind>) -> Vec<SymbolResult> {
        let needle = query.trim().to_lowercase();
        let mut out = Vec::new();
        for file in self.program.files() {
            for item in navigation::navigation_items(file) {
                if !item.name.to_lowercase().contains(&needle) || !item.kind.matches_filter(kind) {
                    continue;
                }
                let (line, column) = file.position(item.start);
                out.push(SymbolResult {
                    name: item.name,
                    kind: item.kind,
                    path: file.path.clone(),
                    line,
                    column,
                });
            }
        }
        out
    }

    pub fn find_symbol(&self, query: &str, kind: Option<&str>) -> String {
        let filter = kind.and_then(SymbolKind::parse_filter);
        let matches = self.symbols(query, filter);
        if matches.is_empty() {
            return match filter {
                Some(k) => format!("No symbols found matching '{}' (kind: {}).", query, k),
                None => format!("No symbols found matching '{}'.", query),
            };
        }
        let mut out = format!("Found {} symbol(s) matching '{}':\n", matches.len(), query);
        for m in matches.iter().take(SYMBOL_LIMIT) {
            out.push_str(&format!(
                "[{}] {} ({}:{}:{})\n",
                m.kind, m.name, m.path, m.line, m.column
            ));
        }
        if matches.len() > SYMBOL_LIMIT {
            out.push_str(&format!("Showing first {} of {} matches.\n", SYMBOL_LIMIT, matches.len()));
        }
        out
    }

    fn locate(&self, path: &str, line: usize, column: usize) -> std::result::Result<(usize, usize), String> {
        let Some(file_idx) = self.program.file_index(path) else {
            return Err(format!("File not found or not analyzable: {}", path));
        };
        let file = &self.program.files()[file_idx];
        match file.offset_at(line, column) {
            Some(offset) => Ok((file_idx, offset)),
            None => Err(format!(
                "Position {}:{} is outside {} ({} lines).",
                line,
                column,
                file.path,
                file.line_count()
            )),
        }
    }

    /// Symbol name and reference sites at a position, or a message.
    pub fn references_at(
        &self,
        path: &str,
        line: usize,
        column: usize,
    ) -> std::result::Result<(String, Vec<ReferenceSite>), String> {
        let (file_idx, offset) = self.locate(path, line, column)?;
        let binder = Binder::bind(&self.program);
        let Some(occurrence) = binder.occurrence_at(file_idx, offset) else {
            return Err(format!("No symbol found at {}:{}:{}.", path, line, column));
        };
        let name = self.program.files()[file_idx]
            .text
            .get(occurrence.start..occurrence.end)
            .unwrap_or("")
            .to_string();
        let Some(key) = occurrence.key.clone() else {
            return Err(format!("No references found for '{}'.", name));
        };
        let sites = binder
            .references(&key)
            .into_iter()
            .map(|o| {
                let file = &self.program.files()[o.file];
                let (line, column) = file.position(o.start);
                ReferenceSite {
                    path: file.path.clone(),
                    line,
                    column,
                    access: o.access,
                    context: file.line_text(line).trim().to_string(),
                }
            })
            .collect();
        Ok((name, sites))
    }

    pub fn get_references(&self, path: &str, line: usize, column: usize) -> String {
        match self.references_at(path, line, column) {
            Err(message) => message,
            Ok((name, sites)) if sites.is_empty() => format!("No references found for '{}'.", name),
            Ok((name, sites)) => {
                let mut out = format!("Found {} reference(s) to '{}':\n", sites.len(), name);
                for s in sites {
                    out.push_str(&format!(
                        "{}:{}:{} [{}] {}\n",
                        s.path,
                        s.line,
                        s.column,
                        s.access.as_str(),
                        s.context
                    ));
                }
                out
            }
        }
    }

    /// Symbol name and definition sites at a position, or a message.
    pub fn definitions_at(
        &self,
        path: &str,
        line: usize,
        column: usize,
    ) -> std::result::Result<(String, Vec<DefinitionSite>), String> {
        let (file_idx, offset) = self.locate(path, line, column)?;
        let binder = Binder::bind(&self.program);
        let Some(occurrence) = binder.occurrence_at(file_idx, offset) else {
            return Err(format!("No symbol found at {}:{}:{}.", path, line, column));
        };
        let name = self.program.files()[file_idx]
            .text
            .get(occurrence.start..occurrence.end)
            .unwrap_or("")
            .to_string();
        let Some(key) = occurrence.key.clone() else {
            return Err(format!("No definition found for '{}'.", name));
        };
        let sites = binder
            .definitions(&key)
            .into_iter()
            .map(|id| {
                let decl = &binder.decls[id];
                let file = &self.program.files()[decl.file];
                let (line, column) = file.position(decl.name_start);
                DefinitionSite {
                    path: file.path.clone(),
                    line,
                    column,
                    kind: decl.kind.label(),
                    name: decl.name.clone(),
                    context: file.line_text(line).trim().to_string(),
                }
            })
            .collect();
        Ok((name, sites))
    }

    pub fn go_to_definition(&self, path: &str, line: usize, column: usize) -> String {
        match self.definitions_at(path, line, column) {
            Err(message) => message,
            Ok((name, sites)) => match sites.as_slice() {
                [] => format!("No definition found for '{}'.", name),
                [site] => format!(
                    "Definition of '{}':\n[{}] {} at {}:{}:{}\n  {}\n",
                    name, site.kind, site.name, site.path, site.line, site.column, site.context
                ),
                _ => {
                    let mut out = format!(
                        "Found {} definitions for '{}' (ambiguous or overloaded):\n",
                        sites.len(),
                        name
                    );
                    for (i, s) in sites.iter().enumerate() {
                        out.push_str(&format!(
                            "{}. [{}] {} at {}:{}:{}\n   {}\n",
                            i + 1,
                            s.kind,
                            s.name,
                            s.path,
                            s.line,
                            s.column,
                            s.context
                        ));
                    }
                    out
                }
            },
        }
    }

    /// All diagnostics for `path`, or `None` when it is not analyzable.
    pub fn diagnostics(&self, path: &str) -> Option<Vec<Diagnostic>> {
        let file_idx = self.program.file_index(path)?;
        let binder = Binder::bind(&self.program);
        Some(diagnostics::file_diagnostics(&self.program, &binder, file_idx))
    }

    pub fn get_diagnostics(&self, path: &str, severity: Option<&str>) -> String {
        let filter = severity.map(SeverityFilter::parse).unwrap_or_default();
        let label = severity.unwrap_or("all");
        let Some(all) = self.diagnostics(path) else {
            return format!("File not found or not analyzable: {}", path);
        };
        let shown: Vec<&Diagnostic> = all.iter().filter(|d| filter.admits(d.severity)).collect();
        if shown.is_empty() {
            return format!("No diagnostics for {} (severity: {}).", path, label);
        }
        let count = |s: Severity| shown.iter().filter(|d| d.severity == s).count();
        let mut out = format!(
            "Diagnostics for {} (severity: {}): {} error(s), {} warning(s), {} info, {} hint(s)\n",
            path,
            label,
            count(Severity::Error),
            count(Severity::Warning),
            count(Severity::Info),
            count(Severity::Hint)
        );
        for d in shown {
            out.push_str(&format!(
                "[{}] {}:{} TS{}: {}\n",
                d.severity, d.line, d.column, d.code, d.message
            ));
        }
        out
    }
}
