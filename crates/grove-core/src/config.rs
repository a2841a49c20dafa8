//! Workspace configuration read from an optional `grove.toml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::STATE_DIR;
use crate::error::{GroveError, GroveResult};
use crate::graph::Severity;

/// Name of the configuration file at the workspace root.
pub const CONFIG_FILE: &str = "grove.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroveConfig {
    /// Maximum number of element infos kept in the structural cache.
    pub element_cache_capacity: usize,
    /// Severity of the diagnostics raised for projects in a reference cycle.
    pub cycle_severity: Severity,
    /// Follow `Class-Path` manifests of raw and variable libraries.
    pub resolve_chained_libraries: bool,
    /// Follow `Class-Path` manifests of libraries contributed by containers.
    pub resolve_chained_libraries_for_containers: bool,
    /// Directory for the session state, relative to the workspace root.
    pub state_dir: PathBuf,
    /// Statically configured classpath variables.
    pub variables: BTreeMap<String, PathBuf>,
}

impl Default for GroveConfig {
    fn default() -> Self {
        GroveConfig {
            element_cache_capacity: 2000,
            cycle_severity: Severity::Error,
            resolve_chained_libraries: true,
            resolve_chained_libraries_for_containers: true,
            state_dir: PathBuf::from(STATE_DIR),
            variables: BTreeMap::new(),
        }
    }
}

impl GroveConfig {
    /// Load `grove.toml` from the workspace root; defaults when absent.
    pub fn load(root: &Path) -> GroveResult<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(GroveConfig::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let config = Self::parse(&text).map_err(|reason| GroveError::ConfigInvalid {
            path: path.clone(),
            reason,
        })?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        let config: GroveConfig = toml::from_str(text).map_err(|e| e.to_string())?;
        if config.element_cache_capacity == 0 {
            return Err("element_cache_capacity must be at least 1".to_string());
        }
        Ok(config)
    }

    /// Absolute state directory for a workspace rooted at `root`.
    pub fn state_dir_in(&self, root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            root.join(&self.state_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = GroveConfig::parse("").unwrap();
        assert_eq!(config, GroveConfig::default());
        assert_eq!(config.element_cache_capacity, 2000);
        assert_eq!(config.cycle_severity, Severity::Error);
    }

    #[test]
    fn test_partial_file() {
        let config = GroveConfig::parse(
            r#"
cycle_severity = "warning"
resolve_chained_libraries = false

[variables]
JRE_LIB = "/opt/jre/lib"
"#,
        )
        .unwrap();
        assert_eq!(config.cycle_severity, Severity::Warning);
        assert!(!config.resolve_chained_libraries);
        assert!(config.resolve_chained_libraries_for_containers);
        assert_eq!(config.variables["JRE_LIB"], PathBuf::from("/opt/jre/lib"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        assert!(GroveConfig::parse("element_cache_capacity = 0").is_err());
    }
}
