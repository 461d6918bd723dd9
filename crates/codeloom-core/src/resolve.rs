//! Bundler-style module specifier resolution against a snapshot.
//!
//! Only project-local specifiers are resolved: relative paths (`./`, `../`),
//! root-absolute paths (`/x`), and the single project alias (`@/` by
//! default). Bare package specifiers (`react`, `node:fs`) are external and
//! never resolve. A base path is tried against a fixed, ordered list of
//! suffixes; the first candidate that exists wins.

use crate::store::{normalize_path, parent_dir};

/// Suffixes tried, in order, after the specifier's base path.
pub const RESOLUTION_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".d.ts",
    ".js",
    ".jsx",
    ".mjs",
    ".cjs",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

/// Resolves import specifiers to snapshot paths.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    alias_prefix: String,
    alias_target: String,
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new("@/", "")
    }
}

impl ModuleResolver {
    /// `alias_prefix` (e.g. `"@/"`) maps to `alias_target`, a directory
    /// relative to the project root (`""` for the root itself).
    pub fn new(alias_prefix: impl Into<String>, alias_target: impl Into<String>) -> Self {
        Self {
            alias_prefix: alias_prefix.into(),
            alias_target: normalize_path(&alias_target.into()),
        }
    }

    /// True for specifiers that point into the project.
    pub fn is_local(&self, specifier: &str) -> bool {
        specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier == "."
            || specifier == ".."
            || specifier.starts_with('/')
            || (!self.alias_prefix.is_empty() && specifier.starts_with(&self.alias_prefix))
    }

    /// The normalized path a local specifier denotes, before suffixes.
    pub fn base_path(&self, from_file: &str, specifier: &str) -> Option<String> {
        if !self.alias_prefix.is_empty() && specifier.starts_with(&self.alias_prefix) {
            let rest = &specifier[self.alias_prefix.len()..];
            return Some(normalize_path(&format!("{}/{}", self.alias_target, rest)));
        }
        if specifier.starts_with('/') {
            return Some(normalize_path(specifier));
        }
        if self.is_local(specifier) {
            let dir = parent_dir(&normalize_path(from_file)).to_string();
            return Some(normalize_path(&format!("{}/{}", dir, specifier)));
        }
        None
    }

    /// Resolve `specifier` imported from `from_file`.
    ///
    /// `exists` answers whether a normalized path is a file in the snapshot.
    pub fn resolve<F>(&self, from_file: &str, specifier: &str, exists: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let base = self.base_path(from_file, specifier)?;
        for suffix in RESOLUTION_SUFFIXES {
            let candidate = if suffix.is_empty() {
                base.clone()
            } else if base.is_empty() {
                suffix.trim_start_matches('/').to_string()
            } else {
                format!("{}{}", base, suffix)
            };
            if !candidate.is_empty() && exists(&candidate) {
                return Some(candidate);
            }
        }
        // ESM-style `./a.js` written against a `./a.ts` source.
        for (js, ts) in [(".js", ".ts"), (".js", ".tsx"), (".jsx", ".tsx"), (".mjs", ".mts")] {
            if let Some(stem) = base.strip_suffix(js) {
                let candidate = format!("{}{}", stem, ts);
                if exists(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}
