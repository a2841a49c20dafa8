//! Element handles: cheap, hashable names for nodes of the structural tree

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grove_core::ProjectId;
use grove_core::model::portable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Model,
    Project,
    Root,
    Package,
    Unit,
    Member,
}

/// Names an element without holding its structure. Two handles are equal when
/// they name the same element, whether or not it exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Handle {
    Model,
    Project(ProjectId),
    /// A source folder or library of a project. `archive` roots are packed
    /// libraries whose contents are never walked.
    Root {
        project: ProjectId,
        path: PathBuf,
        archive: bool,
    },
    /// Dotted package name; empty for the default package.
    Package { root: Arc<Handle>, name: String },
    Unit { package: Arc<Handle>, name: String },
    Member { unit: Arc<Handle>, name: String },
}

impl Handle {
    pub fn project(project: ProjectId) -> Self {
        Handle::Project(project)
    }

    pub fn root(project: ProjectId, path: impl Into<PathBuf>, archive: bool) -> Self {
        Handle::Root {
            project,
            path: path.into(),
            archive,
        }
    }

    pub fn package(&self, name: impl Into<String>) -> Self {
        Handle::Package {
            root: Arc::new(self.clone()),
            name: name.into(),
        }
    }

    pub fn unit(&self, name: impl Into<String>) -> Self {
        Handle::Unit {
            package: Arc::new(self.clone()),
            name: name.into(),
        }
    }

    pub fn member(&self, name: impl Into<String>) -> Self {
        Handle::Member {
            unit: Arc::new(self.clone()),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Handle::Model => ElementKind::Model,
            Handle::Project(_) => ElementKind::Project,
            Handle::Root { .. } => ElementKind::Root,
            Handle::Package { .. } => ElementKind::Package,
            Handle::Unit { .. } => ElementKind::Unit,
            Handle::Member { .. } => ElementKind::Member,
        }
    }

    pub fn parent(&self) -> Option<Handle> {
        match self {
            Handle::Model => None,
            Handle::Project(_) => Some(Handle::Model),
            Handle::Root { project, .. } => Some(Handle::Project(project.clone())),
            Handle::Package { root: parent, .. }
            | Handle::Unit { package: parent, .. }
            | Handle::Member { unit: parent, .. } => Some((**parent).clone()),
        }
    }

    /// Distance from the model: 0 for the model, 1 for projects, and so on.
    pub fn depth(&self) -> usize {
        self.kind() as usize
    }

    /// Whether this element has children of its own.
    pub fn is_container(&self) -> bool {
        self.kind() != ElementKind::Member
    }

    pub fn is_archive_root(&self) -> bool {
        matches!(self, Handle::Root { archive: true, .. })
    }

    pub fn owning_project(&self) -> Option<&ProjectId> {
        match self {
            Handle::Model => None,
            Handle::Project(project) | Handle::Root { project, .. } => Some(project),
            Handle::Package { root: parent, .. }
            | Handle::Unit { package: parent, .. }
            | Handle::Member { unit: parent, .. } => parent.owning_project(),
        }
    }

    /// The root this element lives in, if any.
    pub fn owning_root(&self) -> Option<&Handle> {
        match self {
            Handle::Root { .. } => Some(self),
            Handle::Package { root: parent, .. }
            | Handle::Unit { package: parent, .. }
            | Handle::Member { unit: parent, .. } => parent.owning_root(),
            Handle::Model | Handle::Project(_) => None,
        }
    }

    /// Workspace path of a root.
    pub fn root_path(&self) -> Option<&Path> {
        match self.owning_root() {
            Some(Handle::Root { path, .. }) => Some(path),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Handle::Model => String::new(),
            Handle::Project(project) => project.name().to_string(),
            Handle::Root { path, .. } => portable(path),
            Handle::Package { name, .. } | Handle::Unit { name, .. } | Handle::Member { name, .. } => {
                name.clone()
            }
        }
    }

    /// Whether `self` sits strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Handle) -> bool {
        let mut current = self.parent();
        while let Some(handle) = current {
            if &handle == ancestor {
                return true;
            }
            current = handle.parent();
        }
        false
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::Model => f.write_str("<model>"),
            Handle::Project(project) => write!(f, "{}", project),
            Handle::Root { path, .. } => write!(f, "{}", portable(path)),
            Handle::Package { root, name } if name.is_empty() => write!(f, "{}/<default>", root),
            Handle::Package { root, name } => write!(f, "{}/{}", root, name),
            Handle::Unit { package, name } => write!(f, "{}/{}", package, name),
            Handle::Member { unit, name } => write!(f, "{}#{}", unit, name),
        }
    }
}
