//! `LIBDIR/<folder>` container: every archive in a folder of the consuming project

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use grove_core::model::remaining_segments;
use grove_core::{Container, Entry, ProjectId};

use super::ContainerProvider;
use crate::manager::ClasspathManager;

pub const LIBRARY_DIR_ID: &str = "LIBDIR";

const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "zip"];

pub struct LibraryDirProvider {
    root: PathBuf,
}

impl LibraryDirProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LibraryDirProvider { root: root.into() }
    }
}

impl ContainerProvider for LibraryDirProvider {
    fn initialize(
        &self,
        path: &Path,
        project: &ProjectId,
        _manager: &ClasspathManager,
    ) -> Result<Option<Container>> {
        let folder = remaining_segments(path);
        if folder.as_os_str().is_empty() {
            return Ok(None);
        }
        let dir = self.root.join(project.name()).join(&folder);
        if !dir.is_dir() {
            tracing::debug!("Library folder {} does not exist", dir.display());
            return Ok(None);
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_archive = Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| ARCHIVE_EXTENSIONS.contains(&e));
            if is_archive {
                names.push(name);
            }
        }
        names.sort();

        let base = project.path().join(&folder);
        let entries = names
            .into_iter()
            .map(|name| Arc::new(Entry::library(base.join(name)).with_exported(true)))
            .collect();
        let description = format!("Libraries in {}", grove_core::model::portable(&base));
        Ok(Some(Container::new(path, description, entries)))
    }
}
