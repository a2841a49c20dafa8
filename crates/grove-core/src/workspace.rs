//! Per-project classpath state and the workspace-wide store holding it

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::model::{Entry, EntryKind, ProjectId, ResolutionStatus, ResolvedEntry};

/// Name of the per-project classpath declaration file.
pub const DECLARATION_FILE: &str = ".classpath.toml";

/// Find the projects of a workspace: every direct subdirectory of `root`
/// holding a classpath declaration.
pub fn detect_projects(root: &Path) -> std::io::Result<Vec<ProjectId>> {
    let mut projects = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && path.join(DECLARATION_FILE).exists() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                projects.push(ProjectId::new(name));
            }
        }
    }
    projects.sort();
    Ok(projects)
}

/// Whether the persisted declaration of a project could be read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum DeclarationStatus {
    #[default]
    Verified,
    Malformed(String),
}

/// Result of one resolution pass over a raw classpath.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedClasspath {
    pub entries: Vec<ResolvedEntry>,
    pub status: ResolutionStatus,
    /// Resolved path → raw entry that produced it.
    #[serde(skip)]
    pub path_to_raw: HashMap<PathBuf, Arc<Entry>>,
    #[serde(skip)]
    pub path_to_resolved: HashMap<PathBuf, ResolvedEntry>,
    /// Referenced entries still relevant after resolution (chained library
    /// overrides that are not raw libraries themselves).
    pub referenced_entries: Vec<Arc<Entry>>,
}

impl ResolvedClasspath {
    pub fn raw_entry_for(&self, path: &Path) -> Option<&Arc<Entry>> {
        self.path_to_raw.get(path)
    }

    pub fn resolved_entry_for(&self, path: &Path) -> Option<&ResolvedEntry> {
        self.path_to_resolved.get(path)
    }

    /// Paths of the projects this classpath refers to directly.
    pub fn project_references(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|e| e.kind() == EntryKind::Project)
            .map(|e| e.path())
    }
}

/// Consistent copy of the raw side of a project state.
#[derive(Debug, Clone)]
pub struct RawSnapshot {
    pub entries: Vec<Arc<Entry>>,
    pub referenced_entries: Vec<Arc<Entry>>,
    pub output_location: Option<PathBuf>,
    pub status: DeclarationStatus,
    pub stamp: u64,
}

/// Previous values of a project state, returned by every setter so callers
/// can tell what changed.
#[derive(Debug, Clone)]
pub struct ClasspathChange {
    pub project: ProjectId,
    pub old_raw: Option<Vec<Arc<Entry>>>,
    pub old_output: Option<PathBuf>,
    pub old_resolved: Option<Arc<ResolvedClasspath>>,
}

impl ClasspathChange {
    /// Project references of the previous resolved classpath.
    pub fn old_project_references(&self) -> Vec<PathBuf> {
        self.old_resolved
            .as_ref()
            .map(|r| r.project_references().map(Path::to_path_buf).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct ResolvedSlot {
    classpath: Arc<ResolvedClasspath>,
    stamp: u64,
    /// Computed from previous-session values; must be recomputed before use.
    provisional: bool,
}

/// Classpath state of one project. Always accessed under the per-project
/// mutex held by [`ProjectStateStore`].
#[derive(Debug)]
pub struct ProjectClasspathState {
    project: ProjectId,
    raw_entries: Option<Vec<Arc<Entry>>>,
    raw_status: DeclarationStatus,
    raw_stamp: u64,
    output_location: Option<PathBuf>,
    referenced_entries: Vec<Arc<Entry>>,
    resolved: Option<ResolvedSlot>,
}

impl ProjectClasspathState {
    pub fn new(project: ProjectId) -> Self {
        ProjectClasspathState {
            project,
            raw_entries: None,
            raw_status: DeclarationStatus::Verified,
            raw_stamp: 0,
            output_location: None,
            referenced_entries: Vec::new(),
            resolved: None,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn raw_stamp(&self) -> u64 {
        self.raw_stamp
    }

    pub fn raw_status(&self) -> &DeclarationStatus {
        &self.raw_status
    }

    pub fn output_location(&self) -> Option<&Path> {
        self.output_location.as_deref()
    }

    /// Raw side of the state, or `None` if the declaration was never read.
    pub fn raw_snapshot(&self) -> Option<RawSnapshot> {
        let entries = self.raw_entries.clone()?;
        Some(RawSnapshot {
            entries,
            referenced_entries: self.referenced_entries.clone(),
            output_location: self.output_location.clone(),
            status: self.raw_status.clone(),
            stamp: self.raw_stamp,
        })
    }

    /// Replace the raw classpath. Advances the stamp, which invalidates any
    /// resolution computed from the previous raw entries.
    pub fn set_raw(
        &mut self,
        entries: Vec<Arc<Entry>>,
        referenced: Option<Vec<Arc<Entry>>>,
        output_location: Option<PathBuf>,
        status: DeclarationStatus,
    ) -> ClasspathChange {
        let change = self.change();
        self.raw_stamp += 1;
        self.raw_entries = Some(entries);
        if let Some(referenced) = referenced {
            self.referenced_entries = referenced;
        }
        self.output_location = output_location;
        self.raw_status = status;
        self.resolved = None;
        change
    }

    /// The committed resolution, if it is current and not provisional.
    pub fn resolved(&self) -> Option<Arc<ResolvedClasspath>> {
        self.resolved
            .as_ref()
            .filter(|slot| slot.stamp == self.raw_stamp && !slot.provisional)
            .map(|slot| slot.classpath.clone())
    }

    /// The committed resolution even if it came from previous-session values.
    pub fn provisional_resolved(&self) -> Option<Arc<ResolvedClasspath>> {
        self.resolved
            .as_ref()
            .filter(|slot| slot.stamp == self.raw_stamp)
            .map(|slot| slot.classpath.clone())
    }

    /// Commit a resolution computed from the raw entries at `stamp`. Returns
    /// `None` and keeps the state untouched when the raw classpath changed in
    /// the meantime.
    pub fn set_resolved(
        &mut self,
        classpath: Arc<ResolvedClasspath>,
        stamp: u64,
        provisional: bool,
    ) -> Option<ClasspathChange> {
        if stamp != self.raw_stamp {
            tracing::debug!(
                "Discarding stale resolution of {} (stamp {} != {})",
                self.project,
                stamp,
                self.raw_stamp
            );
            return None;
        }
        if !provisional {
            // referenced entries are rewritten by resolution
            self.referenced_entries = classpath.referenced_entries.clone();
        }
        let change = self.change();
        self.resolved = Some(ResolvedSlot {
            classpath,
            stamp,
            provisional,
        });
        Some(change)
    }

    /// Drop the resolution, e.g. because a variable or container changed.
    pub fn reset_resolved(&mut self) -> ClasspathChange {
        let change = self.change();
        self.resolved = None;
        change
    }

    /// Whether any raw entry of `kind` has `name` as its first segment.
    pub fn refers_to(&self, kind: EntryKind, name: &str) -> bool {
        self.raw_entries.as_ref().is_some_and(|entries| {
            entries
                .iter()
                .any(|e| e.kind == kind && crate::model::first_segment(&e.path) == Some(name))
        })
    }

    fn change(&self) -> ClasspathChange {
        ClasspathChange {
            project: self.project.clone(),
            old_raw: self.raw_entries.clone(),
            old_output: self.output_location.clone(),
            old_resolved: self.resolved.as_ref().map(|s| s.classpath.clone()),
        }
    }
}

/// All project states of a workspace. Thread-safe; each project state has its
/// own mutex so unrelated projects never contend.
#[derive(Default)]
pub struct ProjectStateStore {
    states: DashMap<ProjectId, Arc<Mutex<ProjectClasspathState>>>,
}

impl ProjectStateStore {
    pub fn new() -> Self {
        ProjectStateStore {
            states: DashMap::new(),
        }
    }

    /// State of a project, created on first access.
    pub fn state(&self, project: &ProjectId) -> Arc<Mutex<ProjectClasspathState>> {
        self.states
            .entry(project.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ProjectClasspathState::new(project.clone()))))
            .clone()
    }

    pub fn get(&self, project: &ProjectId) -> Option<Arc<Mutex<ProjectClasspathState>>> {
        self.states.get(project).map(|r| r.value().clone())
    }

    pub fn contains(&self, project: &ProjectId) -> bool {
        self.states.contains_key(project)
    }

    /// Forget a project removed from the workspace.
    pub fn remove(&self, project: &ProjectId) -> bool {
        self.states.remove(project).is_some()
    }

    /// Known projects in name order.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut projects: Vec<ProjectId> = self.states.iter().map(|r| r.key().clone()).collect();
        projects.sort();
        projects
    }

    /// Drop the resolution of every project whose raw classpath matches.
    pub fn reset_resolved_where(
        &self,
        mut predicate: impl FnMut(&ProjectClasspathState) -> bool,
    ) -> Vec<ClasspathChange> {
        let states: Vec<_> = self.states.iter().map(|r| r.value().clone()).collect();
        let mut changes = Vec::new();
        for state in states {
            let mut state = state.lock();
            if predicate(&state) {
                changes.push(state.reset_resolved());
            }
        }
        changes
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
