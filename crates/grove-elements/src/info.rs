//! Structural information cached for an opened element

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use crate::handle::Handle;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementInfo {
    /// Child handles in structural order.
    pub children: Vec<Handle>,
    /// Hash of whatever the element was built from; changes when it does.
    pub fingerprint: u64,
    /// Non-source files of a root, relative to it. Only roots carry one.
    pub resources: Option<Vec<PathBuf>>,
}

impl ElementInfo {
    pub fn new(children: Vec<Handle>, fingerprint: u64) -> Self {
        ElementInfo {
            children,
            fingerprint,
            resources: None,
        }
    }

    pub fn with_resources(mut self, resources: Vec<PathBuf>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn leaf(fingerprint: u64) -> Self {
        ElementInfo::new(Vec::new(), fingerprint)
    }
}

/// Infos produced by one build: the requested element and any descendants
/// built along the way.
pub type BuiltInfos = HashMap<Handle, Arc<ElementInfo>>;

pub fn fingerprint<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
