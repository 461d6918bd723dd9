//! Path glob matching for file filters.
//!
//! Patterns are compiled with `globset` in literal-separator mode, which
//! gives the path semantics the tools document:
//!
//! - `*` matches any run of characters except `/`
//! - `**` matches any run of characters including `/` (including none, so
//!   `**/*.ts` also matches `a.ts` at the root)
//! - `?` matches a single character
//!
//! Every other character is literal, so `app/[id]/page.tsx` and
//! `src/{a,b}.ts` match only themselves. Matching is anchored: the whole
//! path must match.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    matcher: GlobMatcher,
}

impl PathPattern {
    /// Compile a glob. An invalid pattern is an error the caller reports.
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim().trim_start_matches("./");
        let glob = GlobBuilder::new(&restrict(trimmed))
            .literal_separator(true)
            .backslash_escape(false)
            .build()
            .with_context(|| format!("invalid file pattern '{}'", pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Rewrite a pattern so only `*` and `?` stay special; literal runs are
/// escaped for globset.
fn restrict(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut literal = String::new();
    for c in pattern.chars() {
        if c == '*' || c == '?' {
            out.push_str(&globset::escape(&literal));
            literal.clear();
            out.push(c);
        } else {
            literal.push(c);
        }
    }
    out.push_str(&globset::escape(&literal));
    out
}

/// Compile an optional filter; `None` or a blank pattern matches everything.
pub fn optional_pattern(pattern: Option<&str>) -> Result<Option<PathPattern>> {
    match pattern {
        Some(p) if !p.trim().is_empty() => Ok(Some(PathPattern::new(p)?)),
        _ => Ok(None),
    }
}
