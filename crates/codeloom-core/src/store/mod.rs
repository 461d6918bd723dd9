//! Storage abstraction for project snapshots.
//!
//! The [`ProjectStore`] trait is the contract with the external file store
//! that owns a project's files. The analytical services only ever need
//! [`get_all_project_files`](ProjectStore::get_all_project_files); the
//! path-level operations back the file-management tools that run through
//! the same tool loop.
//!
//! Implementations must be `Send + Sync` so a single client can be shared
//! across concurrently executing tool calls. The store is the sole arbiter
//! of consistency for concurrent writes; callers do not lock around it.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ProjectFile;

/// Remote, versioned file store for one or more projects.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_all_project_files`](ProjectStore::get_all_project_files) | Whole-project snapshot |
/// | [`read_file`](ProjectStore::read_file) | Read one file's text |
/// | [`write_file`](ProjectStore::write_file) | Create or overwrite a file |
/// | [`delete_file`](ProjectStore::delete_file) | Delete a file or folder (recursively) |
/// | [`list_files`](ProjectStore::list_files) | Direct children of a folder |
/// | [`get_project_structure`](ProjectStore::get_project_structure) | All entries without content |
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetch every file and folder of the project, with content.
    async fn get_all_project_files(&self, project_id: &str) -> Result<Vec<ProjectFile>>;

    /// Read a file's text. `Ok(None)` when the path does not exist.
    async fn read_file(&self, project_id: &str, path: &str) -> Result<Option<String>>;

    /// Create or overwrite a file. Missing parent folders are created.
    async fn write_file(&self, project_id: &str, path: &str, content: &str) -> Result<()>;

    /// Delete a file, or a folder and everything beneath it.
    ///
    /// Returns `false` when nothing existed at `path`.
    async fn delete_file(&self, project_id: &str, path: &str) -> Result<bool>;

    /// List the direct children of `folder` (`""` for the project root).
    async fn list_files(&self, project_id: &str, folder: &str) -> Result<Vec<ProjectFile>>;

    /// All entries of the project with content stripped.
    async fn get_project_structure(&self, project_id: &str) -> Result<Vec<ProjectFile>> {
        let mut files = self.get_all_project_files(project_id).await?;
        for f in &mut files {
            f.content = None;
        }
        Ok(files)
    }
}

/// Normalizes a project-relative path: backslashes become `/`, leading `./`
/// and `/` are dropped, and `.`/`..` segments are collapsed.
///
/// `..` segments that would climb above the root are discarded.
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in replaced.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Parent folder of a normalized path (`""` for root-level entries).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src/a.ts"), "src/a.ts");
        assert_eq!(normalize_path("/src//lib/../a.ts"), "src/a.ts");
        assert_eq!(normalize_path("src\\b.ts"), "src/b.ts");
        assert_eq!(normalize_path("../../x.ts"), "x.ts");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("src/lib/a.ts"), "src/lib");
        assert_eq!(parent_dir("a.ts"), "");
    }
}
