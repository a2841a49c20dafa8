//! Variables taken from the process environment

use std::path::PathBuf;

use anyhow::Result;

use super::VariableProvider;
use crate::manager::ClasspathManager;

/// Default prefix: variable `JRE_LIB` is read from `GROVE_VAR_JRE_LIB`.
pub const ENV_PREFIX: &str = "GROVE_VAR_";

pub struct EnvVariableProvider {
    prefix: String,
}

impl EnvVariableProvider {
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        EnvVariableProvider { prefix: prefix.into() }
    }
}

impl Default for EnvVariableProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableProvider for EnvVariableProvider {
    fn initialize(&self, name: &str, _manager: &ClasspathManager) -> Result<Option<PathBuf>> {
        match std::env::var_os(format!("{}{}", self.prefix, name)) {
            Some(value) if !value.is_empty() => Ok(Some(PathBuf::from(value))),
            _ => Ok(None),
        }
    }
}
