// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Filesystem-based definition store
//!
//! Stores one pretty-printed JSON file per function, `<dir>/<name>.json`.
//! Writes go to a temporary file that is then renamed over the target, so a
//! reader never sees a half-written definition.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{matches_search, DefinitionStore};
use crate::errors::{CrudflowError, CrudflowResult};
use crate::pipeline::{check_name, FunctionDefinition};

pub const TRACING_TARGET: &str = "crudflow::store";

const EXTENSION: &str = "json";

/// Filesystem-based definition store
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Open a store, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> CrudflowResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| CrudflowError::StoreError {
                message: format!("Failed to create store directory '{}': {}", dir.display(), e),
            })?;
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a definition file
    fn path(&self, name: &str) -> CrudflowResult<PathBuf> {
        // Names become file names; never let one escape the directory
        check_name(name).map_err(|e| CrudflowError::StoreError {
            message: e.to_string(),
        })?;
        Ok(self.dir.join(format!("{}.{}", name, EXTENSION)))
    }
}

fn store_error(action: &str, path: &Path, e: impl std::fmt::Display) -> CrudflowError {
    CrudflowError::StoreError {
        message: format!("Failed to {} '{}': {}", action, path.display(), e),
    }
}

#[async_trait]
impl DefinitionStore for FilesystemStore {
    async fn load(&self, name: &str) -> CrudflowResult<Option<FunctionDefinition>> {
        let path = self.path(name)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error("read", &path, e)),
        };

        let definition = serde_json::from_str(&content).map_err(|e| store_error("parse", &path, e))?;
        Ok(Some(definition))
    }

    async fn save(&self, definition: &FunctionDefinition) -> CrudflowResult<()> {
        let path = self.path(&definition.name)?;
        let staging = path.with_extension(format!("{}.tmp", EXTENSION));

        let json = serde_json::to_string_pretty(definition)
            .map_err(|e| store_error("serialize", &path, e))?;

        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| store_error("write", &staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| store_error("replace", &path, e))?;

        Ok(())
    }

    async fn remove(&self, name: &str) -> CrudflowResult<bool> {
        let path = self.path(name)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(store_error("remove", &path, e)),
        }
    }

    async fn list(&self, search: Option<&str>) -> CrudflowResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| store_error("read", &self.dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| store_error("read", &self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Files dropped in by hand may not be loadable under their stem
            if check_name(stem).is_err() {
                tracing::warn!(
                    target: TRACING_TARGET,
                    file = %path.display(),
                    "Skipping definition file with an invalid function name"
                );
                continue;
            }
            if matches_search(stem, search) {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Action, FunctionStep};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn def(name: &str, table: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.into(),
            steps: vec![FunctionStep {
                idx: 1,
                name: None,
                table: table.into(),
                action: Action::Delete,
                multiple: false,
                columns: vec![],
                values: BTreeMap::new(),
                filters: vec![],
                order: None,
                limit: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_round_trip_and_replace() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path().join("functions")).unwrap();

        store.save(&def("purge", "sessions")).await.unwrap();
        assert_eq!(
            store.load("purge").await.unwrap(),
            Some(def("purge", "sessions"))
        );

        store.save(&def("purge", "tokens")).await.unwrap();
        assert_eq!(store.load("purge").await.unwrap().unwrap().steps[0].table, "tokens");
        assert!(!temp.path().join("functions/purge.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        store.save(&def("purge_tokens", "tokens")).await.unwrap();
        store.save(&def("archive", "orders")).await.unwrap();

        assert_eq!(store.list(None).await.unwrap(), vec!["archive", "purge_tokens"]);
        assert_eq!(store.list(Some("TOK")).await.unwrap(), vec!["purge_tokens"]);

        assert!(store.remove("archive").await.unwrap());
        assert!(!store.remove("archive").await.unwrap());
        assert!(store.load("archive").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_skips_unloadable_names() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path()).unwrap();
        store.save(&def("archive", "orders")).await.unwrap();

        let stray = serde_json::to_string(&def("archive", "orders")).unwrap();
        std::fs::write(temp.path().join("my notes.json"), &stray).unwrap();
        std::fs::write(temp.path().join("step_3.json"), &stray).unwrap();

        let names = store.list(None).await.unwrap();
        assert_eq!(names, vec!["archive"]);
        for name in names {
            assert!(store.load(&name).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path()).unwrap();

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.save(&def("a/b", "t")).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemStore::new(temp.path()).unwrap();
        std::fs::write(temp.path().join("broken.json"), "{ not json").unwrap();

        let err = store.load("broken").await.unwrap_err();
        assert!(matches!(err, CrudflowError::StoreError { .. }));
    }
}
