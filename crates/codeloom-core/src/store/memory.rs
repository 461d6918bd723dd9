//! In-memory [`ProjectStore`] implementation for tests and embedding hosts.
//!
//! Files live in a `BTreeMap` keyed by normalized path behind a
//! `std::sync::RwLock`, so snapshots come back in path order. Folders are
//! implicit: they are derived from file paths, plus any folder explicitly
//! inserted with [`InMemoryProjectStore::insert_folder`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{FileKind, ProjectFile};

use super::{normalize_path, parent_dir, ProjectStore};

struct StoredFile {
    content: Option<String>,
    last_modified: Option<DateTime<Utc>>,
}

/// Single-project in-memory store. The `project_id` argument is ignored.
pub struct InMemoryProjectStore {
    files: RwLock<BTreeMap<String, StoredFile>>,
    folders: RwLock<BTreeSet<String>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            folders: RwLock::new(BTreeSet::new()),
        }
    }

    /// Build a store from `(path, content)` pairs.
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let store = Self::new();
        for (path, content) in files {
            store.insert(path.as_ref(), content);
        }
        store
    }

    /// Insert or replace a text file.
    pub fn insert(&self, path: &str, content: impl Into<String>) {
        self.insert_file(path, Some(content.into()), None);
    }

    /// Insert or replace a file with explicit content and modification time.
    pub fn insert_file(
        &self,
        path: &str,
        content: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    ) {
        let path = normalize_path(path);
        self.files.write().unwrap().insert(
            path,
            StoredFile {
                content,
                last_modified,
            },
        );
    }

    /// Register an (possibly empty) folder.
    pub fn insert_folder(&self, path: &str) {
        self.folders.write().unwrap().insert(normalize_path(path));
    }

    fn all_folders(&self) -> BTreeSet<String> {
        let mut folders = self.folders.read().unwrap().clone();
        for path in self.files.read().unwrap().keys() {
            let mut dir = parent_dir(path);
            while !dir.is_empty() {
                folders.insert(dir.to_string());
                dir = parent_dir(dir);
            }
        }
        folders
    }
}

impl Default for InMemoryProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_within(path: &str, folder: &str) -> bool {
    path == folder || path.starts_with(&format!("{}/", folder))
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn get_all_project_files(&self, _project_id: &str) -> Result<Vec<ProjectFile>> {
        let mut out: Vec<ProjectFile> = self
            .all_folders()
            .into_iter()
            .map(ProjectFile::folder)
            .collect();
        let files = self.files.read().unwrap();
        out.extend(files.iter().map(|(path, f)| ProjectFile {
            path: path.clone(),
            kind: FileKind::File,
            content: f.content.clone(),
            last_modified: f.last_modified,
        }));
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn read_file(&self, _project_id: &str, path: &str) -> Result<Option<String>> {
        let path = normalize_path(path);
        let files = self.files.read().unwrap();
        Ok(files.get(&path).and_then(|f| f.content.clone()))
    }

    async fn write_file(&self, _project_id: &str, path: &str, content: &str) -> Result<()> {
        let path = normalize_path(path);
        if path.is_empty() {
            anyhow::bail!("invalid path: empty");
        }
        self.insert_file(&path, Some(content.to_string()), Some(Utc::now()));
        Ok(())
    }

    async fn delete_file(&self, _project_id: &str, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        if path.is_empty() {
            anyhow::bail!("refusing to delete the project root");
        }
        let mut removed = false;
        {
            let mut files = self.files.write().unwrap();
            let before = files.len();
            files.retain(|p, _| !is_within(p, &path));
            removed |= files.len() != before;
        }
        {
            let mut folders = self.folders.write().unwrap();
            let before = folders.len();
            folders.retain(|p| !is_within(p, &path));
            removed |= folders.len() != before;
        }
        Ok(removed)
    }

    async fn list_files(&self, project_id: &str, folder: &str) -> Result<Vec<ProjectFile>> {
        let folder = normalize_path(folder);
        let all = self.get_project_structure(project_id).await?;
        Ok(all
            .into_iter()
            .filter(|f| parent_dir(&f.path) == folder && f.path != folder)
            .collect())
    }
}
