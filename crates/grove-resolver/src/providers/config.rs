//! Variables declared in the `[variables]` table of `grove.toml`

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use super::VariableProvider;
use crate::manager::ClasspathManager;

pub struct ConfigVariableProvider {
    values: BTreeMap<String, PathBuf>,
}

impl ConfigVariableProvider {
    pub fn new(values: BTreeMap<String, PathBuf>) -> Self {
        ConfigVariableProvider { values }
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

impl VariableProvider for ConfigVariableProvider {
    fn initialize(&self, name: &str, _manager: &ClasspathManager) -> Result<Option<PathBuf>> {
        Ok(self.values.get(name).cloned())
    }
}
