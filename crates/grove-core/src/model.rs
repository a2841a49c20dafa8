//! Core data structures for classpath entries

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Stable identifier for a workspace project. Projects are named; their
/// workspace path is `/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new(name: impl Into<String>) -> Self {
        ProjectId(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Workspace path of the project, e.g. `/core`.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(format!("/{}", self.0))
    }

    /// The project named by the first segment of a workspace path.
    pub fn from_path(path: &Path) -> Option<Self> {
        first_segment(path).map(ProjectId::new)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminates what a classpath entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    // ── Concrete ────────────────────────────────────────────
    Source,
    Library,
    Project,
    Output,

    // ── Indirections (never survive resolution) ────────────
    Variable,
    Container,
}

impl EntryKind {
    /// Stable numeric code used by the persisted state format.
    pub fn code(self) -> u32 {
        match self {
            EntryKind::Source => 1,
            EntryKind::Library => 2,
            EntryKind::Project => 3,
            EntryKind::Variable => 4,
            EntryKind::Container => 5,
            EntryKind::Output => 6,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(EntryKind::Source),
            2 => Some(EntryKind::Library),
            3 => Some(EntryKind::Project),
            4 => Some(EntryKind::Variable),
            5 => Some(EntryKind::Container),
            6 => Some(EntryKind::Output),
            _ => None,
        }
    }

    /// Whether entries of this kind may appear in a resolved classpath.
    pub fn is_concrete(self) -> bool {
        !matches!(self, EntryKind::Variable | EntryKind::Container)
    }

    fn tag(self) -> &'static str {
        match self {
            EntryKind::Source => "SRC",
            EntryKind::Library => "LIB",
            EntryKind::Project => "PRJ",
            EntryKind::Variable => "VAR",
            EntryKind::Container => "CON",
            EntryKind::Output => "OUT",
        }
    }
}

/// Access restriction applied to types matching a pattern. Ordered from
/// least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Accessible,
    Discouraged,
    NonAccessible,
}

impl AccessKind {
    pub fn code(self) -> u32 {
        match self {
            AccessKind::Accessible => 0,
            AccessKind::Discouraged => 1,
            AccessKind::NonAccessible => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(AccessKind::Accessible),
            1 => Some(AccessKind::Discouraged),
            2 => Some(AccessKind::NonAccessible),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRule {
    /// Glob over slash-separated type paths, e.g. `com/acme/internal/**`.
    pub pattern: String,
    pub kind: AccessKind,
}

impl AccessRule {
    pub fn new(pattern: impl Into<String>, kind: AccessKind) -> Self {
        AccessRule {
            pattern: pattern.into(),
            kind,
        }
    }

    pub fn matches(&self, type_path: &str) -> bool {
        Glob::new(&self.pattern)
            .map(|glob| glob.compile_matcher().is_match(type_path))
            .unwrap_or(false)
    }
}

/// Combine two rule lists: outer rules come first, and on an exact pattern
/// conflict the outer position is kept with the stricter of the two kinds.
pub fn combine_access_rules(outer: &[AccessRule], inner: &[AccessRule]) -> Vec<AccessRule> {
    let mut rules: Vec<AccessRule> = Vec::with_capacity(outer.len() + inner.len());
    for rule in outer.iter().chain(inner) {
        match rules.iter_mut().find(|r| r.pattern == rule.pattern) {
            Some(existing) => existing.kind = existing.kind.max(rule.kind),
            None => rules.push(rule.clone()),
        }
    }
    rules
}

/// A single classpath entry as declared (raw) or as produced by resolution.
/// Entries are shared behind `Arc` and never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    pub path: PathBuf,
    pub inclusion_patterns: Vec<String>,
    pub exclusion_patterns: Vec<String>,
    pub source_attachment: Option<PathBuf>,
    pub source_attachment_root: Option<PathBuf>,
    /// Output override for source entries.
    pub output_location: Option<PathBuf>,
    pub exported: bool,
    pub access_rules: Vec<AccessRule>,
    pub extra_attributes: Vec<(String, String)>,
}

impl Entry {
    pub fn new(kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Entry {
            kind,
            path: path.into(),
            inclusion_patterns: Vec::new(),
            exclusion_patterns: Vec::new(),
            source_attachment: None,
            source_attachment_root: None,
            output_location: None,
            exported: false,
            access_rules: Vec::new(),
            extra_attributes: Vec::new(),
        }
    }

    pub fn source(path: impl Into<PathBuf>) -> Self {
        // source folders are always visible to dependents
        Entry::new(EntryKind::Source, path).with_exported(true)
    }

    pub fn library(path: impl Into<PathBuf>) -> Self {
        Entry::new(EntryKind::Library, path)
    }

    pub fn project(path: impl Into<PathBuf>) -> Self {
        Entry::new(EntryKind::Project, path)
    }

    pub fn variable(path: impl Into<PathBuf>) -> Self {
        Entry::new(EntryKind::Variable, path)
    }

    pub fn container(path: impl Into<PathBuf>) -> Self {
        Entry::new(EntryKind::Container, path)
    }

    pub fn output(path: impl Into<PathBuf>) -> Self {
        Entry::new(EntryKind::Output, path)
    }

    pub fn with_exported(mut self, exported: bool) -> Self {
        self.exported = exported;
        self
    }

    pub fn with_access_rule(mut self, rule: AccessRule) -> Self {
        self.access_rules.push(rule);
        self
    }

    pub fn with_source_attachment(mut self, path: impl Into<PathBuf>, root: Option<PathBuf>) -> Self {
        self.source_attachment = Some(path.into());
        self.source_attachment_root = root;
        self
    }

    pub fn with_output_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_location = Some(path.into());
        self
    }

    pub fn with_inclusion(mut self, pattern: impl Into<String>) -> Self {
        self.inclusion_patterns.push(pattern.into());
        self
    }

    pub fn with_exclusion(mut self, pattern: impl Into<String>) -> Self {
        self.exclusion_patterns.push(pattern.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_attributes.push((name.into(), value.into()));
        self
    }

    /// Copy of this entry pointing somewhere else.
    pub fn with_path(&self, kind: EntryKind, path: impl Into<PathBuf>) -> Self {
        Entry {
            kind,
            path: path.into(),
            ..self.clone()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.extra_attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Apply the export flag and access rules of a referring entry (a
    /// container, a chaining library or a project along an expansion chain).
    pub fn combine_with(&self, referring: &Entry) -> Entry {
        Entry {
            exported: referring.exported && self.exported,
            access_rules: combine_access_rules(&referring.access_rules, &self.access_rules),
            ..self.clone()
        }
    }

    /// Identity used to deduplicate contributions during transitive expansion.
    pub fn root_id(&self) -> String {
        let mut id = format!("[{}]{}", self.kind.tag(), portable(&self.path));
        if self.kind != EntryKind::Project {
            if let Some(attachment) = &self.source_attachment {
                id.push_str("[ATT]");
                id.push_str(&portable(attachment));
            }
            if let Some(root) = &self.source_attachment_root {
                id.push_str("[ROOT]");
                id.push_str(&portable(root));
            }
        }
        id
    }

    /// Whether a path relative to this source entry is part of it, honouring
    /// inclusion and exclusion patterns. Empty inclusions include everything.
    pub fn is_included(&self, relative: &Path) -> bool {
        let relative = portable(relative);
        let included = self.inclusion_patterns.is_empty()
            || compile_patterns(&self.inclusion_patterns).is_match(&relative);
        included && !compile_patterns(&self.exclusion_patterns).is_match(&relative)
    }

    /// Kind of the first access rule matching a type path, if any. Rules are
    /// ordered outer first, as `combine_access_rules` leaves them.
    pub fn access_for(&self, type_path: &str) -> Option<AccessKind> {
        self.access_rules
            .iter()
            .find(|rule| rule.matches(type_path))
            .map(|rule| rule.kind)
    }
}

fn compile_patterns(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::debug!("Ignoring malformed pattern {}: {}", pattern, e),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// An entry of a resolved classpath together with the raw entry that produced
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEntry {
    pub entry: Arc<Entry>,
    /// The raw entry this came from (the variable, the container, or the
    /// library whose manifest chained it in).
    pub raw: Arc<Entry>,
    /// Set when the entry was pulled in through a library manifest.
    pub chained_from: Option<PathBuf>,
}

impl ResolvedEntry {
    pub fn new(entry: Arc<Entry>, raw: Arc<Entry>) -> Self {
        debug_assert!(entry.kind.is_concrete(), "unresolved entry kind {:?}", entry.kind);
        ResolvedEntry {
            entry,
            raw,
            chained_from: None,
        }
    }

    pub fn chained(entry: Arc<Entry>, raw: Arc<Entry>, via: PathBuf) -> Self {
        ResolvedEntry {
            chained_from: Some(via),
            ..ResolvedEntry::new(entry, raw)
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.entry.kind
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn is_exported(&self) -> bool {
        self.entry.exported
    }

    pub fn combine_with(&self, referring: &Entry) -> ResolvedEntry {
        ResolvedEntry {
            entry: Arc::new(self.entry.combine_with(referring)),
            raw: self.raw.clone(),
            chained_from: self.chained_from.clone(),
        }
    }
}

/// Outcome of resolving a raw classpath. Anything but `Ok` leaves the
/// resolved list usable but incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum ResolutionStatus {
    #[default]
    Ok,
    VariableUnbound(String),
    ContainerUnbound(PathBuf),
    InvalidPath(String),
}

impl ResolutionStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ResolutionStatus::Ok)
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStatus::Ok => f.write_str("OK"),
            ResolutionStatus::VariableUnbound(name) => write!(f, "unbound classpath variable: {}", name),
            ResolutionStatus::ContainerUnbound(path) => {
                write!(f, "unbound classpath container: {}", portable(path))
            }
            ResolutionStatus::InvalidPath(reason) => write!(f, "invalid path: {}", reason),
        }
    }
}

/// How a container's entries relate to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerKind {
    Application,
    System,
    DefaultSystem,
}

/// A provider-supplied, per-project list of entries bound to a container path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub path: PathBuf,
    pub description: String,
    pub kind: ContainerKind,
    pub entries: Vec<Arc<Entry>>,
}

impl Container {
    pub fn new(path: impl Into<PathBuf>, description: impl Into<String>, entries: Vec<Arc<Entry>>) -> Self {
        Container {
            path: path.into(),
            description: description.into(),
            kind: ContainerKind::Application,
            entries,
        }
    }

    pub fn with_kind(mut self, kind: ContainerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Summary of a container restored from a previous session.
    pub fn persisted(path: impl Into<PathBuf>, project: &ProjectId, entries: Vec<Arc<Entry>>) -> Self {
        let path = path.into();
        let description = format!("Persisted container [{} for project {}]", portable(&path), project);
        Container::new(path, description, entries)
    }

    /// Provider id: the first segment of the container path.
    pub fn provider_id(path: &Path) -> Option<String> {
        first_segment(path).map(str::to_string)
    }
}

/// Result of looking up a variable or container that may be initializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Resolved(T),
    /// The current thread is already initializing this key.
    InProgress,
    Unbound,
}

impl<T> Lookup<T> {
    pub fn resolved(self) -> Option<T> {
        match self {
            Lookup::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Lookup::InProgress)
    }
}

/// Slash-separated rendering of a path, stable across platforms.
pub fn portable(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// First normal segment of a path (`/core/src` → `core`, `JDK/lib` → `JDK`).
pub fn first_segment(path: &Path) -> Option<&str> {
    path.components().find_map(|c| match c {
        Component::Normal(segment) => segment.to_str(),
        _ => None,
    })
}

/// Path without its first normal segment (`JDK/lib/rt.jar` → `lib/rt.jar`).
pub fn remaining_segments(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .skip(1)
        .collect()
}
