//! Variable and container tables shared by every project of a workspace

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{Container, ProjectId};

/// Workspace-global variable bindings. Thread-safe for concurrent access.
///
/// Besides the live values the table keeps the values restored from the
/// previous session; those answer lookups made with `use_previous_session`
/// and let a provider that returns the same value avoid invalidation.
pub struct VariableTable {
    values: DashMap<String, PathBuf>,
    previous: DashMap<String, PathBuf>,
}

impl VariableTable {
    pub fn new() -> Self {
        VariableTable {
            values: DashMap::new(),
            previous: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<PathBuf> {
        self.values.get(name).map(|r| r.value().clone())
    }

    pub fn get_previous(&self, name: &str) -> Option<PathBuf> {
        self.previous.get(name).map(|r| r.value().clone())
    }

    /// Bind or unbind a variable. Returns whether the value changed.
    pub fn put(&self, name: &str, value: Option<PathBuf>) -> bool {
        match value {
            Some(value) => match self.values.insert(name.to_string(), value.clone()) {
                Some(old) => old != value,
                None => true,
            },
            None => self.values.remove(name).is_some(),
        }
    }

    pub fn put_previous(&self, name: &str, value: PathBuf) {
        self.previous.insert(name.to_string(), value);
    }

    /// Bound variable names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> BTreeMap<String, PathBuf> {
        self.values
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    pub fn previous_snapshot(&self) -> BTreeMap<String, PathBuf> {
        self.previous
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }
}

impl Default for VariableTable {
    fn default() -> Self {
        Self::new()
    }
}

type ContainerKey = (ProjectId, PathBuf);

/// Per-project container bindings, with a previous-session shadow.
pub struct ContainerTable {
    containers: DashMap<ContainerKey, Arc<Container>>,
    previous: DashMap<ContainerKey, Arc<Container>>,
}

impl ContainerTable {
    pub fn new() -> Self {
        ContainerTable {
            containers: DashMap::new(),
            previous: DashMap::new(),
        }
    }

    pub fn get(&self, project: &ProjectId, path: &Path) -> Option<Arc<Container>> {
        self.containers
            .get(&(project.clone(), path.to_path_buf()))
            .map(|r| r.value().clone())
    }

    pub fn get_previous(&self, project: &ProjectId, path: &Path) -> Option<Arc<Container>> {
        self.previous
            .get(&(project.clone(), path.to_path_buf()))
            .map(|r| r.value().clone())
    }

    /// Bind or unbind a container for one project. Returns the old binding.
    pub fn put(
        &self,
        project: &ProjectId,
        path: &Path,
        container: Option<Arc<Container>>,
    ) -> Option<Arc<Container>> {
        let key = (project.clone(), path.to_path_buf());
        match container {
            Some(container) => self.containers.insert(key, container),
            None => self.containers.remove(&key).map(|(_, old)| old),
        }
    }

    pub fn put_previous(&self, project: &ProjectId, path: &Path, container: Arc<Container>) {
        self.previous
            .insert((project.clone(), path.to_path_buf()), container);
    }

    /// Containers bound for a project, by path.
    pub fn containers_of(&self, project: &ProjectId) -> BTreeMap<PathBuf, Arc<Container>> {
        self.containers
            .iter()
            .filter(|r| &r.key().0 == project)
            .map(|r| (r.key().1.clone(), r.value().clone()))
            .collect()
    }

    /// Previous-session containers of a project, by path.
    pub fn previous_of(&self, project: &ProjectId) -> BTreeMap<PathBuf, Arc<Container>> {
        self.previous
            .iter()
            .filter(|r| &r.key().0 == project)
            .map(|r| (r.key().1.clone(), r.value().clone()))
            .collect()
    }

    /// Projects with at least one live or previous-session binding.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = self
            .containers
            .iter()
            .map(|r| r.key().0.clone())
            .chain(self.previous.iter().map(|r| r.key().0.clone()))
            .collect();
        projects.sort();
        projects.dedup();
        projects
    }

    /// Forget every binding of a project removed from the workspace.
    pub fn remove_project(&self, project: &ProjectId) {
        self.containers.retain(|key, _| &key.0 != project);
        self.previous.retain(|key, _| &key.0 != project);
    }
}

impl Default for ContainerTable {
    fn default() -> Self {
        Self::new()
    }
}
