//! Resolution of one project's raw classpath into concrete entries

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use grove_core::model::{first_segment, portable, remaining_segments};
use grove_core::{
    Entry, EntryKind, Lookup, ProjectId, ResolutionStatus, ResolvedClasspath, ResolvedEntry,
    combine_access_rules,
};
use indexmap::IndexMap;

use crate::manager::ClasspathManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Answer variables and containers from the previous session instead of
    /// initializing them.
    pub use_previous_session: bool,
    pub resolve_chained_libraries: bool,
    pub resolve_chained_libraries_for_containers: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            use_previous_session: false,
            resolve_chained_libraries: true,
            resolve_chained_libraries_for_containers: true,
        }
    }
}

/// Lexically normalize `.` and `..` segments. `None` when `..` climbs above
/// the start of the path.
pub fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(segment) => {
                out.push(segment);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Resolved entries keyed by path, in first-insertion order.
#[derive(Default)]
struct Accumulator {
    entries: IndexMap<PathBuf, ResolvedEntry>,
    path_to_raw: HashMap<PathBuf, Arc<Entry>>,
    status: ResolutionStatus,
}

impl Accumulator {
    fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    /// First writer wins. A later entry for the same path only folds its
    /// export flag and access rules into the kept one.
    fn add(&mut self, raw: &Arc<Entry>, resolved: ResolvedEntry) {
        if let Some(kept) = self.entries.get_mut(resolved.path()) {
            let merged = Entry {
                exported: kept.entry.exported && resolved.entry.exported,
                access_rules: combine_access_rules(&kept.entry.access_rules, &resolved.entry.access_rules),
                ..(*kept.entry).clone()
            };
            if merged != *kept.entry {
                kept.entry = Arc::new(merged);
            }
            return;
        }
        let path = resolved.path().to_path_buf();
        self.path_to_raw.insert(path.clone(), raw.clone());
        self.entries.insert(path, resolved);
    }

    fn fail(&mut self, status: ResolutionStatus) {
        tracing::debug!("Resolution problem: {}", status);
        self.status = status;
    }

    fn finish(self, referenced_entries: Vec<Arc<Entry>>) -> ResolvedClasspath {
        let path_to_resolved = self.entries.clone().into_iter().collect();
        ResolvedClasspath {
            entries: self.entries.into_values().collect(),
            status: self.status,
            path_to_raw: self.path_to_raw,
            path_to_resolved,
            referenced_entries,
        }
    }
}

/// Libraries that must not be chained in and persisted attributes of
/// previously chained ones.
struct ChainContext {
    raw_libraries: HashSet<PathBuf>,
    referenced: HashMap<PathBuf, Arc<Entry>>,
}

pub struct PathResolver<'a> {
    manager: &'a ClasspathManager,
    project: &'a ProjectId,
    options: ResolveOptions,
}

impl<'a> PathResolver<'a> {
    pub fn new(manager: &'a ClasspathManager, project: &'a ProjectId, options: ResolveOptions) -> Self {
        PathResolver {
            manager,
            project,
            options,
        }
    }

    /// Resolve `raw_entries` in order. Problems are recorded in the status of
    /// the result; every resolvable entry is still produced.
    pub fn resolve(&self, raw_entries: &[Arc<Entry>], referenced: &[Arc<Entry>]) -> ResolvedClasspath {
        let mut chain = ChainContext {
            raw_libraries: HashSet::new(),
            referenced: HashMap::new(),
        };
        let mut referenced_entries = Vec::new();
        if self.options.resolve_chained_libraries {
            chain.raw_libraries = raw_entries
                .iter()
                .filter(|e| e.kind == EntryKind::Library)
                .filter_map(|e| self.library_path(&e.path))
                .collect();
            for entry in referenced {
                if !chain.raw_libraries.contains(&entry.path) && !chain.referenced.contains_key(&entry.path) {
                    chain.referenced.insert(entry.path.clone(), entry.clone());
                    referenced_entries.push(entry.clone());
                }
            }
        }

        let mut acc = Accumulator::default();
        for raw in raw_entries {
            match raw.kind {
                EntryKind::Variable => self.resolve_variable(raw, &chain, &mut acc),
                EntryKind::Container => self.resolve_container(raw, &chain, &mut acc),
                EntryKind::Library => match self.library_path(&raw.path) {
                    Some(path) => {
                        let entry = if path == raw.path {
                            raw.clone()
                        } else {
                            Arc::new(raw.with_path(EntryKind::Library, path))
                        };
                        if self.options.resolve_chained_libraries {
                            self.add_chained(raw, &entry, true, &chain, &mut acc);
                        }
                        acc.add(raw, ResolvedEntry::new(entry, raw.clone()));
                    }
                    None => acc.fail(ResolutionStatus::InvalidPath(format!(
                        "{} climbs above the workspace root",
                        portable(&raw.path)
                    ))),
                },
                EntryKind::Source | EntryKind::Project | EntryKind::Output => {
                    acc.add(raw, ResolvedEntry::new(raw.clone(), raw.clone()));
                }
            }
        }
        acc.finish(referenced_entries)
    }

    /// Absolute, normalized location of a library; relative paths are taken
    /// against the project folder.
    fn library_path(&self, path: &Path) -> Option<PathBuf> {
        if path.has_root() {
            normalize(path)
        } else {
            normalize(&self.project.path().join(path))
        }
    }

    fn resolve_variable(&self, raw: &Arc<Entry>, chain: &ChainContext, acc: &mut Accumulator) {
        let Some(resolved) = self.resolve_variable_entry(raw) else {
            let name = first_segment(&raw.path).unwrap_or_default().to_string();
            acc.fail(ResolutionStatus::VariableUnbound(name));
            return;
        };
        let resolved = Arc::new(resolved);
        if resolved.kind == EntryKind::Library && self.options.resolve_chained_libraries {
            self.add_chained(raw, &resolved, true, chain, acc);
        }
        acc.add(raw, ResolvedEntry::new(resolved, raw.clone()));
    }

    /// Substitute the variable at the head of the entry's path (and of its
    /// source attachment). A result naming a workspace project becomes a
    /// PROJECT entry, anything else a LIBRARY.
    pub fn resolve_variable_entry(&self, raw: &Entry) -> Option<Entry> {
        let path = self.substitute(&raw.path)?;
        let path = normalize(&path)?;

        let is_project = path.has_root()
            && path.components().count() == 2
            && ProjectId::from_path(&path).is_some_and(|p| self.manager.project_exists(&p));
        let kind = if is_project {
            EntryKind::Project
        } else {
            EntryKind::Library
        };

        let mut entry = raw.with_path(kind, path);
        if let Some(attachment) = &raw.source_attachment {
            // attachments only resolve through a variable when one is bound
            if let Some(resolved) = self.substitute(attachment) {
                entry.source_attachment = Some(resolved);
            }
        }
        if kind == EntryKind::Project {
            entry.source_attachment = None;
            entry.source_attachment_root = None;
        }
        Some(entry)
    }

    fn substitute(&self, path: &Path) -> Option<PathBuf> {
        let name = first_segment(path)?;
        let value = match self
            .manager
            .variable_lookup(name, self.options.use_previous_session)
        {
            Lookup::Resolved(value) => value,
            Lookup::InProgress => {
                tracing::debug!("Variable {} is being initialized; treating as unbound", name);
                return None;
            }
            Lookup::Unbound => return None,
        };
        let rest = remaining_segments(path);
        Some(if rest.as_os_str().is_empty() {
            value
        } else {
            value.join(rest)
        })
    }

    fn resolve_container(&self, raw: &Arc<Entry>, chain: &ChainContext, acc: &mut Accumulator) {
        let container = match self
            .manager
            .container_lookup(self.project, &raw.path, self.options.use_previous_session)
        {
            Lookup::Resolved(container) => container,
            Lookup::InProgress => {
                tracing::debug!(
                    "Container {} of {} is being initialized on this thread; skipping",
                    portable(&raw.path),
                    self.project
                );
                return;
            }
            Lookup::Unbound => {
                acc.fail(ResolutionStatus::ContainerUnbound(raw.path.clone()));
                return;
            }
        };

        for contributed in &container.entries {
            if !contributed.kind.is_concrete() {
                acc.fail(ResolutionStatus::InvalidPath(format!(
                    "container {} contributes a {:?} entry {}",
                    portable(&raw.path),
                    contributed.kind,
                    portable(&contributed.path)
                )));
                continue;
            }
            let mut entry = contributed.combine_with(raw);
            if entry.kind == EntryKind::Library {
                match self.library_path(&entry.path) {
                    Some(path) => entry.path = path,
                    None => {
                        acc.fail(ResolutionStatus::InvalidPath(portable(&entry.path)));
                        continue;
                    }
                }
            }
            let entry = Arc::new(entry);
            if entry.kind == EntryKind::Library
                && self.options.resolve_chained_libraries
                && self.options.resolve_chained_libraries_for_containers
            {
                self.add_chained(raw, &entry, false, chain, acc);
            }
            acc.add(raw, ResolvedEntry::new(entry, raw.clone()));
        }
    }

    /// Insert the libraries chained by `library`'s manifest ahead of it. Each
    /// chained entry inherits the export flag and access rules of `library`.
    fn add_chained(
        &self,
        raw: &Arc<Entry>,
        library: &Arc<Entry>,
        restore_referenced: bool,
        chain: &ChainContext,
        acc: &mut Accumulator,
    ) {
        if acc.contains(&library.path) {
            return;
        }
        let mut seen = HashSet::from([library.path.clone()]);
        let mut chained = Vec::new();
        self.collect_chain(&library.path, &mut seen, &mut chained);

        for path in chained {
            if chain.raw_libraries.contains(&path) {
                continue;
            }
            let mut entry = Entry::library(path).with_exported(library.exported);
            entry.access_rules = library.access_rules.clone();
            if restore_referenced {
                if let Some(previous) = chain.referenced.get(&entry.path) {
                    if previous.source_attachment.is_some() {
                        entry.source_attachment = previous.source_attachment.clone();
                    }
                    if previous.source_attachment_root.is_some() {
                        entry.source_attachment_root = previous.source_attachment_root.clone();
                    }
                    if !previous.extra_attributes.is_empty() {
                        entry.extra_attributes = previous.extra_attributes.clone();
                    }
                }
            }
            acc.add(
                raw,
                ResolvedEntry::chained(Arc::new(entry), raw.clone(), library.path.clone()),
            );
        }
    }

    /// Depth-first over manifests, deepest library first. `seen` bounds the
    /// walk so cyclic manifests terminate.
    fn collect_chain(&self, library: &Path, seen: &mut HashSet<PathBuf>, out: &mut Vec<PathBuf>) {
        for next in self.manager.manifests().chained_libraries(library) {
            if seen.insert(next.clone()) {
                self.collect_chain(&next, seen, out);
                out.push(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/core/../lib/a.jar")), Some(PathBuf::from("/lib/a.jar")));
        assert_eq!(normalize(Path::new("/core/./lib/a.jar")), Some(PathBuf::from("/core/lib/a.jar")));
        assert_eq!(normalize(Path::new("/core/../../a.jar")), None);
        assert_eq!(normalize(Path::new("lib/a.jar")), Some(PathBuf::from("lib/a.jar")));
    }
}
