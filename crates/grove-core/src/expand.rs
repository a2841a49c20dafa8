//! Transitive closure of a project's resolved classpath

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{Entry, EntryKind, ProjectId, ResolvedEntry};
use crate::workspace::ResolvedClasspath;

struct Frame {
    classpath: Arc<ResolvedClasspath>,
    next: usize,
    /// Project entry through which this classpath is reached; `None` for the
    /// initial project.
    referring: Option<Arc<Entry>>,
}

/// Expand `project` into the entries of its classpath followed, depth first,
/// by the exported entries of every project it references.
///
/// Each contribution is keyed by its root id, so a project or library
/// reachable along several paths appears once, and a reference cycle simply
/// stops expanding. `resolved` supplies the resolved classpath of a project,
/// or `None` for projects that do not exist.
pub fn expand<F>(project: &ProjectId, mut resolved: F) -> Vec<ResolvedEntry>
where
    F: FnMut(&ProjectId) -> Option<Arc<ResolvedClasspath>>,
{
    let mut accumulated = Vec::new();
    let mut root_ids: HashSet<String> = HashSet::new();
    root_ids.insert(Entry::project(project.path()).root_id());

    let Some(initial) = resolved(project) else {
        return accumulated;
    };
    let mut stack = vec![Frame {
        classpath: initial,
        next: 0,
        referring: None,
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(entry) = frame.classpath.entries.get(frame.next).cloned() else {
            stack.pop();
            continue;
        };
        frame.next += 1;

        let is_initial = frame.referring.is_none();
        if !is_initial && !entry.is_exported() {
            continue;
        }
        let entry = match &frame.referring {
            Some(referring) => entry.combine_with(referring),
            None => entry,
        };
        if !root_ids.insert(entry.entry.root_id()) {
            continue;
        }
        let descend = entry.kind() == EntryKind::Project;
        let referring = entry.entry.clone();
        accumulated.push(entry);

        if descend {
            let Some(target) = ProjectId::from_path(&referring.path) else {
                continue;
            };
            if let Some(classpath) = resolved(&target) {
                stack.push(Frame {
                    classpath,
                    next: 0,
                    referring: Some(referring),
                });
            }
        }
    }
    accumulated
}
