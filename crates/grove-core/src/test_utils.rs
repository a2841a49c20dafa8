//! Test utilities for Grove

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use crate::model::{Entry, ProjectId, ResolvedEntry};
use crate::workspace::{DECLARATION_FILE, ResolvedClasspath};

/// Create a temporary workspace with one directory per project, each holding
/// the given classpath declaration.
pub fn create_workspace(projects: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    for (name, declaration) in projects {
        let project_dir = root.join(name);
        fs::create_dir_all(project_dir.join("src")).unwrap();
        fs::write(project_dir.join(DECLARATION_FILE), declaration).unwrap();
    }

    temp_dir
}

/// Resolved classpath made of already-concrete entries, each its own raw entry.
pub fn resolved_classpath(entries: Vec<Entry>) -> Arc<ResolvedClasspath> {
    let entries = entries
        .into_iter()
        .map(|entry| {
            let entry = Arc::new(entry);
            ResolvedEntry::new(entry.clone(), entry)
        })
        .collect();
    Arc::new(ResolvedClasspath {
        entries,
        ..ResolvedClasspath::default()
    })
}

/// `/<name>/src` source folder plus a PROJECT entry for each reference.
pub fn project_referencing(name: &str, references: &[&str], exported: bool) -> Arc<ResolvedClasspath> {
    let mut entries = vec![Entry::source(format!("/{}/src", name))];
    for reference in references {
        entries.push(Entry::project(ProjectId::new(*reference).path()).with_exported(exported));
    }
    resolved_classpath(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_workspace() {
        let temp_dir = create_workspace(&[("core", "entries = []"), ("app", "entries = []")]);
        let root = temp_dir.path();

        assert!(root.join("core").join(DECLARATION_FILE).exists());
        assert!(root.join("app/src").is_dir());
    }
}
