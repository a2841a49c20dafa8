//! Structural diff between two snapshots of a unit's elements

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Flattened structure of a unit: element key (e.g. `Type.method`) to a
/// fingerprint of its content.
pub type StructureSnapshot = BTreeMap<String, u64>;

/// Change notification emitted when a working copy's structure diverged from
/// its committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDiff {
    /// Monotonically increasing diff sequence number.
    pub sequence: u64,
    /// Unit the diff is about.
    pub unit: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Elements present on both sides whose fingerprint differs.
    pub changed: Vec<String>,
}

impl StructureDiff {
    pub fn new(sequence: u64, unit: impl Into<String>) -> Self {
        StructureDiff {
            sequence,
            unit: unit.into(),
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        }
    }

    /// Check if this diff is empty (no changes).
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub struct DiffEngine {
    sequence: u64,
}

impl DiffEngine {
    pub fn new() -> Self {
        DiffEngine { sequence: 0 }
    }

    /// Compare two snapshots of `unit`. The returned diff carries the next
    /// sequence number.
    pub fn compute_diff(
        &mut self,
        unit: &str,
        old: &StructureSnapshot,
        new: &StructureSnapshot,
    ) -> StructureDiff {
        self.sequence += 1;
        let mut diff = StructureDiff::new(self.sequence, unit);

        for (key, fingerprint) in new {
            match old.get(key) {
                None => diff.added.push(key.clone()),
                Some(previous) if previous != fingerprint => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = old
            .keys()
            .filter(|key| !new.contains_key(*key))
            .cloned()
            .collect();

        diff
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}
