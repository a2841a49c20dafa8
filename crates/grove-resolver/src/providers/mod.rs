//! Pluggable variable and container providers

pub mod config;
pub mod env;
pub mod library_dir;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use grove_core::{Container, ProjectId};

use crate::manager::ClasspathManager;

/// Computes the value of a classpath variable on first use.
///
/// Providers may query the manager while initializing; a query for the
/// variable being initialized answers `InProgress` instead of recursing.
pub trait VariableProvider: Send + Sync {
    fn initialize(&self, name: &str, manager: &ClasspathManager) -> Result<Option<PathBuf>>;
}

/// Computes the entries of a container for one consuming project.
pub trait ContainerProvider: Send + Sync {
    /// Returns `Ok(None)` when the provider cannot bind the container. A
    /// provider may also bind it itself through `ClasspathManager::container_put`.
    fn initialize(
        &self,
        path: &Path,
        project: &ProjectId,
        manager: &ClasspathManager,
    ) -> Result<Option<Container>>;

    /// Placeholder bound when initialization produced nothing.
    fn failure_container(&self, _path: &Path, _project: &ProjectId) -> Option<Container> {
        None
    }
}

/// Providers looked up by variable name or container provider id.
#[derive(Default)]
pub struct ProviderRegistry {
    variables: HashMap<String, Arc<dyn VariableProvider>>,
    variable_fallbacks: Vec<Arc<dyn VariableProvider>>,
    containers: HashMap<String, Arc<dyn ContainerProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_variable(&mut self, name: impl Into<String>, provider: Arc<dyn VariableProvider>) {
        self.variables.insert(name.into(), provider);
    }

    /// Provider consulted for variables without a dedicated provider.
    pub fn register_variable_fallback(&mut self, provider: Arc<dyn VariableProvider>) {
        self.variable_fallbacks.push(provider);
    }

    pub fn register_container(&mut self, id: impl Into<String>, provider: Arc<dyn ContainerProvider>) {
        self.containers.insert(id.into(), provider);
    }

    /// Providers to try for a variable, dedicated one first.
    pub fn variable_providers(&self, name: &str) -> Vec<Arc<dyn VariableProvider>> {
        self.variables
            .get(name)
            .into_iter()
            .chain(self.variable_fallbacks.iter())
            .cloned()
            .collect()
    }

    pub fn container_provider(&self, id: &str) -> Option<Arc<dyn ContainerProvider>> {
        self.containers.get(id).cloned()
    }
}
