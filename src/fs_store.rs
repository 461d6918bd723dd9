//! Local filesystem [`ProjectStore`].
//!
//! Serves one project rooted at a directory. The walk skips `.git`,
//! `node_modules` and `target` directories plus any configured exclude
//! globs. Files that are not valid UTF-8 come back with no content.
//! Paths are normalized before they touch the disk, so `..` cannot escape
//! the root.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeloom_core::models::{FileKind, ProjectFile};
use codeloom_core::store::{normalize_path, ProjectStore};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::ProjectConfig;

const SKIPPED_DIRS: [&str; 3] = [".git", "node_modules", "target"];

pub struct FsProjectStore {
    root: PathBuf,
    excludes: Arc<GlobSet>,
}

impl FsProjectStore {
    pub fn new(root: impl Into<PathBuf>, exclude_globs: &[String]) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Project root does not exist: {}", root.display());
        }
        let mut patterns: Vec<String> = SKIPPED_DIRS.iter().map(|d| format!("**/{}/**", d)).collect();
        patterns.extend(exclude_globs.iter().cloned());
        Ok(Self {
            root,
            excludes: Arc::new(build_globset(&patterns)?),
        })
    }

    pub fn from_config(cfg: &ProjectConfig) -> Result<Self> {
        Self::new(cfg.root.clone(), &cfg.exclude_globs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> (String, PathBuf) {
        let rel = normalize_path(path);
        let abs = if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(&rel)
        };
        (rel, abs)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid exclude glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn modified_at(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

fn relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    normalize_path(&rel.to_string_lossy())
}

fn walk(root: &Path, excludes: &GlobSet) -> Result<Vec<ProjectFile>> {
    let mut out = Vec::new();
    let walker = WalkDir::new(root).min_depth(1).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !(e.file_type().is_dir() && SKIPPED_DIRS.contains(&&*name))
    });
    for entry in walker {
        let entry = entry?;
        let rel = relative(root, entry.path());
        if excludes.is_match(&rel) {
            continue;
        }
        let meta = entry.metadata()?;
        if entry.file_type().is_dir() {
            out.push(ProjectFile {
                last_modified: modified_at(&meta),
                ..ProjectFile::folder(rel)
            });
        } else if entry.file_type().is_file() {
            let content = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            out.push(ProjectFile {
                path: rel,
                kind: FileKind::File,
                content: String::from_utf8(content).ok(),
                last_modified: modified_at(&meta),
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

#[async_trait]
impl ProjectStore for FsProjectStore {
    async fn get_all_project_files(&self, _project_id: &str) -> Result<Vec<ProjectFile>> {
        let root = self.root.clone();
        let excludes = Arc::clone(&self.excludes);
        tokio::task::spawn_blocking(move || walk(&root, &excludes)).await?
    }

    async fn read_file(&self, _project_id: &str, path: &str) -> Result<Option<String>> {
        let (rel, abs) = self.resolve(path);
        if rel.is_empty() || abs.is_dir() {
            return Ok(None);
        }
        match tokio::fs::read(&abs).await {
            Ok(bytes) => Ok(String::from_utf8(bytes).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", rel)),
        }
    }

    async fn write_file(&self, _project_id: &str, path: &str, content: &str) -> Result<()> {
        let (rel, abs) = self.resolve(path);
        if rel.is_empty() {
            bail!("invalid path: empty");
        }
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs, content)
            .await
            .with_context(|| format!("Failed to write {}", rel))
    }

    async fn delete_file(&self, _project_id: &str, path: &str) -> Result<bool> {
        let (rel, abs) = self.resolve(path);
        if rel.is_empty() {
            bail!("refusing to delete the project root");
        }
        let meta = match tokio::fs::metadata(&abs).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&abs).await?;
        } else {
            tokio::fs::remove_file(&abs).await?;
        }
        Ok(true)
    }

    async fn list_files(&self, _project_id: &str, folder: &str) -> Result<Vec<ProjectFile>> {
        let (_, abs) = self.resolve(folder);
        let mut dir = match tokio::fs::read_dir(&abs).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() && SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            let rel = relative(&self.root, &entry.path());
            if self.excludes.is_match(&rel) {
                continue;
            }
            let last_modified = entry.metadata().await.ok().as_ref().and_then(modified_at);
            let kind = if file_type.is_dir() {
                FileKind::Folder
            } else {
                FileKind::File
            };
            out.push(ProjectFile {
                path: rel,
                kind,
                content: None,
                last_modified,
            });
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, FsProjectStore) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("src/lib")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join("dist")).unwrap();
        std::fs::write(root.join("src/a.ts"), "export const a = 1;").unwrap();
        std::fs::write(root.join("src/lib/b.ts"), "export const b = 2;").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join("dist/out.js"), "y").unwrap();
        std::fs::write(root.join("logo.png"), [0x89u8, 0x50, 0xff, 0xfe]).unwrap();
        let store = FsProjectStore::new(root, &["**/*.js".to_string()]).unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_snapshot_skips_excluded() {
        let (_tmp, store) = project();
        let files = store.get_all_project_files("local").await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["dist", "logo.png", "src", "src/a.ts", "src/lib", "src/lib/b.ts"]);
        let logo = files.iter().find(|f| f.path == "logo.png").unwrap();
        assert!(logo.content.is_none());
        assert!(logo.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_stays_in_root() {
        let (tmp, store) = project();
        store.write_file("local", "../../new/deep/c.ts", "c").await.unwrap();
        assert!(tmp.path().join("new/deep/c.ts").exists());
        assert_eq!(
            store.read_file("local", "new/deep/c.ts").await.unwrap().as_deref(),
            Some("c")
        );
        assert_eq!(store.read_file("local", "missing.ts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let (_tmp, store) = project();
        let listed = store.list_files("local", "src").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.ts", "src/lib"]);

        assert!(store.delete_file("local", "src/lib").await.unwrap());
        assert!(!store.delete_file("local", "src/lib").await.unwrap());
        assert!(store.delete_file("local", "").await.is_err());
    }
}
