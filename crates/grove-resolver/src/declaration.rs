//! Reading and writing per-project classpath declarations (`.classpath.toml`)
//!
//! ```toml
//! output = "/core/bin"
//!
//! [[entries]]
//! kind = "source"
//! path = "/core/src"
//! exclude = ["**/internal/**"]
//!
//! [[entries]]
//! kind = "container"
//! path = "LIBDIR/lib"
//! exported = true
//! access_rules = [{ pattern = "com/acme/impl/**", kind = "non_accessible" }]
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use grove_core::{AccessRule, DECLARATION_FILE, Entry, EntryKind, ProjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeclarationError {
    #[error("No declaration for project {0}")]
    Missing(ProjectId),

    #[error("Malformed declaration {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Failed to write declaration {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A project's persisted classpath.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Declaration {
    pub entries: Vec<Entry>,
    pub output_location: Option<PathBuf>,
    /// Entries recorded for previously chained libraries.
    pub referenced_entries: Vec<Entry>,
}

impl Declaration {
    /// Classpath of a project without a readable declaration: the project
    /// folder as its only source root, compiled into `bin`.
    pub fn default_for(project: &ProjectId) -> Self {
        Declaration {
            entries: vec![Entry::source(project.path())],
            output_location: Some(project.path().join("bin")),
            referenced_entries: Vec::new(),
        }
    }
}

/// Source of raw classpaths.
pub trait DeclarationReader: Send + Sync {
    fn exists(&self, project: &ProjectId) -> bool;

    fn read(&self, project: &ProjectId) -> Result<Declaration, DeclarationError>;

    fn write(&self, project: &ProjectId, declaration: &Declaration) -> Result<(), DeclarationError>;
}

/// Reader for managers whose classpaths are only ever set in memory.
pub struct NoDeclarations;

impl DeclarationReader for NoDeclarations {
    fn exists(&self, _project: &ProjectId) -> bool {
        false
    }

    fn read(&self, project: &ProjectId) -> Result<Declaration, DeclarationError> {
        Err(DeclarationError::Missing(project.clone()))
    }

    fn write(&self, _project: &ProjectId, _declaration: &Declaration) -> Result<(), DeclarationError> {
        Ok(())
    }
}

/// Declarations stored as `<root>/<project>/.classpath.toml`.
pub struct FsDeclarationReader {
    root: PathBuf,
}

impl FsDeclarationReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsDeclarationReader { root: root.into() }
    }

    pub fn declaration_path(&self, project: &ProjectId) -> PathBuf {
        self.root.join(project.name()).join(DECLARATION_FILE)
    }
}

impl DeclarationReader for FsDeclarationReader {
    fn exists(&self, project: &ProjectId) -> bool {
        self.root.join(project.name()).is_dir()
    }

    fn read(&self, project: &ProjectId) -> Result<Declaration, DeclarationError> {
        let path = self.declaration_path(project);
        if !path.exists() {
            return Err(DeclarationError::Missing(project.clone()));
        }
        let text = std::fs::read_to_string(&path)?;
        parse_declaration(&text).map_err(|reason| DeclarationError::Malformed { path, reason })
    }

    fn write(&self, project: &ProjectId, declaration: &Declaration) -> Result<(), DeclarationError> {
        let path = self.declaration_path(project);
        let text = render_declaration(declaration).map_err(|reason| DeclarationError::Write {
            path: path.clone(),
            reason,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text)?;
        tracing::debug!("Wrote classpath declaration {}", path.display());
        Ok(())
    }
}

// ── File format ─────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DeclarationFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    entries: Vec<EntryRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    referenced: Vec<EntryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryRecord {
    kind: EntryKind,
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exported: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_attachment: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_attachment_root: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    access_rules: Vec<AccessRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

impl EntryRecord {
    fn into_entry(self) -> Entry {
        let mut entry = Entry::new(self.kind, self.path);
        // source folders default to exported, everything else does not
        entry.exported = self.exported.unwrap_or(self.kind == EntryKind::Source);
        entry.inclusion_patterns = self.include;
        entry.exclusion_patterns = self.exclude;
        entry.source_attachment = self.source_attachment;
        entry.source_attachment_root = self.source_attachment_root;
        entry.output_location = self.output;
        entry.access_rules = self.access_rules;
        entry.extra_attributes = self.attributes.into_iter().collect();
        entry
    }

    fn from_entry(entry: &Entry) -> Self {
        EntryRecord {
            kind: entry.kind,
            path: entry.path.clone(),
            exported: (entry.exported != (entry.kind == EntryKind::Source)).then_some(entry.exported),
            include: entry.inclusion_patterns.clone(),
            exclude: entry.exclusion_patterns.clone(),
            source_attachment: entry.source_attachment.clone(),
            source_attachment_root: entry.source_attachment_root.clone(),
            output: entry.output_location.clone(),
            access_rules: entry.access_rules.clone(),
            attributes: entry.extra_attributes.iter().cloned().collect(),
        }
    }
}

/// Parse a declaration. An OUTPUT entry sets the output location, the last
/// one winning over the top-level `output` key.
pub fn parse_declaration(text: &str) -> Result<Declaration, String> {
    let file: DeclarationFile = toml::from_str(text).map_err(|e| e.to_string())?;
    let mut declaration = Declaration {
        output_location: file.output,
        ..Declaration::default()
    };
    for record in file.entries {
        if record.kind == EntryKind::Output {
            declaration.output_location = Some(record.path);
            continue;
        }
        if record.path.as_os_str().is_empty() {
            return Err(format!("{:?} entry with an empty path", record.kind));
        }
        declaration.entries.push(record.into_entry());
    }
    declaration.referenced_entries = file.referenced.into_iter().map(EntryRecord::into_entry).collect();
    Ok(declaration)
}

pub fn render_declaration(declaration: &Declaration) -> Result<String, String> {
    let file = DeclarationFile {
        output: declaration.output_location.clone(),
        entries: declaration.entries.iter().map(EntryRecord::from_entry).collect(),
        referenced: declaration
            .referenced_entries
            .iter()
            .map(EntryRecord::from_entry)
            .collect(),
    };
    toml::to_string_pretty(&file).map_err(|e| e.to_string())
}
