//! Builds element infos from the workspace on disk and resolved classpaths

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grove_core::{Entry, EntryKind, GroveError, GroveResult, ProjectId, StructureSnapshot};
use grove_resolver::ClasspathManager;
use grove_resolver::manifest::workspace_location;

use crate::cache::InfoBuilder;
use crate::handle::Handle;
use crate::info::{BuiltInfos, ElementInfo, fingerprint};
use crate::working_copy::WorkingCopyRegistry;

/// File extensions of compilation units.
pub const UNIT_EXTENSIONS: &[&str] = &["java", "groovy"];

const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "zip"];

const TYPE_KEYWORDS: &[&str] = &["class", "interface", "enum", "record", "trait"];

pub fn is_unit_file(path: &Path) -> bool {
    has_extension(path, UNIT_EXTENSIONS)
}

pub fn is_archive(path: &Path) -> bool {
    has_extension(path, ARCHIVE_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}

/// Top-level type declarations of a unit with a fingerprint of each one's
/// text, in declaration order.
pub fn scan_members(source: &str) -> Vec<(String, u64)> {
    let mut members: Vec<(String, Vec<&str>)> = Vec::new();
    let mut depth: i64 = 0;
    for line in source.lines() {
        if depth == 0 {
            if let Some(name) = declared_type(line) {
                members.push((name, Vec::new()));
            }
        }
        if let Some((_, body)) = members.last_mut() {
            body.push(line);
        }
        depth += line.matches('{').count() as i64 - line.matches('}').count() as i64;
        depth = depth.max(0);
    }
    members
        .into_iter()
        .map(|(name, body)| (name, fingerprint(&body)))
        .collect()
}

fn declared_type(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
        return None;
    }
    let mut words = trimmed.split(|c: char| c.is_whitespace() || c == '{' || c == '<' || c == '(');
    while let Some(word) = words.next() {
        if TYPE_KEYWORDS.contains(&word) {
            return words
                .find(|w| !w.is_empty())
                .filter(|w| w.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$'))
                .map(str::to_string);
        }
    }
    None
}

/// Structure of a unit's source, as compared when a working copy is torn down.
pub fn unit_structure(source: &str) -> StructureSnapshot {
    scan_members(source).into_iter().collect()
}

/// Builds infos from the resolved classpaths of a [`ClasspathManager`] and
/// the files under the workspace root. Units with an open primary working
/// copy are built from the overlay instead of the file.
pub struct FsStructureBuilder {
    manager: Arc<ClasspathManager>,
    root: PathBuf,
    overlays: Option<Arc<WorkingCopyRegistry>>,
}

impl FsStructureBuilder {
    pub fn new(manager: Arc<ClasspathManager>, root: impl Into<PathBuf>) -> Self {
        FsStructureBuilder {
            manager,
            root: root.into(),
            overlays: None,
        }
    }

    pub fn with_overlays(mut self, registry: Arc<WorkingCopyRegistry>) -> Self {
        self.overlays = Some(registry);
        self
    }

    /// Location on disk of a workspace path.
    pub fn location(&self, path: &Path) -> PathBuf {
        workspace_location(&self.root, path)
    }

    /// Source file backing a unit handle.
    pub fn unit_location(&self, unit: &Handle) -> Option<PathBuf> {
        let Handle::Unit { package, name } = unit else {
            return None;
        };
        let root = self.location(unit.root_path()?);
        Some(root.join(package_dir(&package.name())).join(name))
    }

    fn root_entry(&self, root: &Handle) -> GroveResult<Option<Arc<Entry>>> {
        let (Some(project), Some(path)) = (root.owning_project(), root.root_path()) else {
            return Ok(None);
        };
        let resolved = self.manager.resolved_classpath(project)?;
        Ok(resolved.resolved_entry_for(path).map(|e| e.entry.clone()))
    }

    fn build_model(&self) -> BuiltInfos {
        let projects = self.manager.projects();
        let children: Vec<Handle> = projects.iter().cloned().map(Handle::project).collect();
        let info = ElementInfo::new(children, fingerprint(&projects));
        HashMap::from([(Handle::Model, Arc::new(info))])
    }

    fn build_project(&self, handle: &Handle, project: &ProjectId) -> GroveResult<BuiltInfos> {
        let resolved = self
            .manager
            .resolved_classpath(project)
            .map_err(|_| GroveError::DoesNotExist(handle.to_string()))?;
        let mut children = Vec::new();
        let mut seen = BTreeSet::new();
        for entry in &resolved.entries {
            let archive = match entry.kind() {
                EntryKind::Source => false,
                EntryKind::Library => is_archive(entry.path()),
                _ => continue,
            };
            if seen.insert(entry.path().to_path_buf()) {
                children.push(Handle::root(project.clone(), entry.path(), archive));
            }
        }
        let info = ElementInfo::new(children, fingerprint(&seen));
        Ok(HashMap::from([(handle.clone(), Arc::new(info))]))
    }

    fn build_root(&self, handle: &Handle) -> GroveResult<BuiltInfos> {
        let Some(path) = handle.root_path() else {
            return Err(GroveError::DoesNotExist(handle.to_string()));
        };
        let location = self.location(path);
        if handle.is_archive_root() {
            let metadata = std::fs::metadata(&location).map_err(|_| GroveError::DoesNotExist(handle.to_string()))?;
            // packed contents are not walked
            return Ok(HashMap::from([(handle.clone(), Arc::new(ElementInfo::leaf(metadata.len())))]));
        }
        if !location.is_dir() {
            return Err(GroveError::DoesNotExist(handle.to_string()));
        }

        let entry = self.root_entry(handle)?;
        let mut packages: BTreeMap<String, usize> = BTreeMap::new();
        let mut resources = Vec::new();
        let mut pending = vec![location.clone()];
        while let Some(dir) = pending.pop() {
            let listing = std::fs::read_dir(&dir).map_err(|_| GroveError::DoesNotExist(handle.to_string()))?;
            for item in listing {
                let item = item?;
                let file = item.path();
                let Ok(relative) = file.strip_prefix(&location) else {
                    continue;
                };
                let relative = relative.to_path_buf();
                let file_type = item.file_type()?;
                if file_type.is_dir() {
                    pending.push(file);
                    continue;
                }
                // linked directories are not followed, they may loop back
                if file_type.is_symlink() && file.is_dir() {
                    tracing::debug!("Skipping linked directory {}", file.display());
                    continue;
                }
                if entry.as_ref().is_some_and(|e| !e.is_included(&relative)) {
                    continue;
                }
                if is_unit_file(&file) {
                    let package = package_name(relative.parent().unwrap_or(Path::new("")));
                    *packages.entry(package).or_default() += 1;
                } else {
                    resources.push(relative);
                }
            }
        }
        resources.sort();

        let children = packages.keys().map(|name| handle.package(name.clone())).collect();
        let info = ElementInfo::new(children, fingerprint(&packages)).with_resources(resources);
        Ok(HashMap::from([(handle.clone(), Arc::new(info))]))
    }

    fn build_package(&self, handle: &Handle, name: &str) -> GroveResult<BuiltInfos> {
        let Some(root_path) = handle.root_path() else {
            return Err(GroveError::DoesNotExist(handle.to_string()));
        };
        let root = self.location(root_path);
        let dir = root.join(package_dir(name));
        let listing = std::fs::read_dir(&dir).map_err(|_| GroveError::DoesNotExist(handle.to_string()))?;

        let entry = match handle.owning_root() {
            Some(root_handle) => self.root_entry(root_handle)?,
            None => None,
        };
        let mut units = BTreeSet::new();
        for item in listing {
            let file = item?.path();
            if !file.is_file() || !is_unit_file(&file) {
                continue;
            }
            let included = file
                .strip_prefix(&root)
                .map(|relative| entry.as_ref().is_none_or(|e| e.is_included(relative)))
                .unwrap_or(false);
            if let (true, Some(name)) = (included, file.file_name().and_then(|n| n.to_str())) {
                units.insert(name.to_string());
            }
        }

        let children = units.iter().map(|unit| handle.unit(unit.clone())).collect();
        let info = ElementInfo::new(children, fingerprint(&units));
        Ok(HashMap::from([(handle.clone(), Arc::new(info))]))
    }

    /// A unit builds its members along with itself.
    fn build_unit(&self, handle: &Handle) -> GroveResult<BuiltInfos> {
        if let Some(contents) = self.overlays.as_ref().and_then(|r| r.primary_contents(handle)) {
            return Ok(unit_infos(handle, &contents));
        }
        let source = self
            .unit_location(handle)
            .and_then(|location| std::fs::read_to_string(location).ok())
            .ok_or_else(|| GroveError::DoesNotExist(handle.to_string()))?;
        Ok(unit_infos(handle, &source))
    }

    fn build_member(&self, handle: &Handle, unit: &Handle, name: &str) -> GroveResult<BuiltInfos> {
        let built = self.build_unit(unit)?;
        let member = unit.member(name);
        match built.get(&member) {
            Some(info) => Ok(HashMap::from([(handle.clone(), info.clone())])),
            None => Err(GroveError::DoesNotExist(handle.to_string())),
        }
    }
}

impl InfoBuilder for FsStructureBuilder {
    fn build(&self, handle: &Handle) -> GroveResult<BuiltInfos> {
        tracing::debug!("Building info for {}", handle);
        match handle {
            Handle::Model => Ok(self.build_model()),
            Handle::Project(project) => self.build_project(handle, project),
            Handle::Root { .. } => self.build_root(handle),
            Handle::Package { name, .. } => self.build_package(handle, name),
            Handle::Unit { .. } => self.build_unit(handle),
            Handle::Member { unit, name } => self.build_member(handle, unit, name),
        }
    }
}

/// Infos of a unit and its members from the unit's source text.
pub fn unit_infos(unit: &Handle, source: &str) -> BuiltInfos {
    let members = scan_members(source);
    let mut built: BuiltInfos = members
        .iter()
        .map(|(name, print)| (unit.member(name.clone()), Arc::new(ElementInfo::leaf(*print))))
        .collect();
    let children = members.iter().map(|(name, _)| unit.member(name.clone())).collect();
    built.insert(unit.clone(), Arc::new(ElementInfo::new(children, fingerprint(source))));
    built
}

fn package_name(relative_dir: &Path) -> String {
    relative_dir
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn package_dir(name: &str) -> PathBuf {
    name.split('.').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_members() {
        let source = r#"
package com.acme;

import java.util.List;

/** The entry point. */
public class Main {
    class Inner {}
    void run() {}
}

interface Greeter<T> {
}

enum Mode { ON, OFF }
"#;
        let names: Vec<String> = scan_members(source).into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Main", "Greeter", "Mode"]);
    }

    #[test]
    fn test_member_fingerprint_tracks_its_own_text() {
        let before = unit_structure("class A {\n}\nclass B {\n}\n");
        let after = unit_structure("class A {\n  int x;\n}\nclass B {\n}\n");
        assert_ne!(before["A"], after["A"]);
        assert_eq!(before["B"], after["B"]);
    }

    #[test]
    fn test_package_paths() {
        assert_eq!(package_name(Path::new("com/acme/util")), "com.acme.util");
        assert_eq!(package_name(Path::new("")), "");
        assert_eq!(package_dir("com.acme"), PathBuf::from("com/acme"));
        assert_eq!(package_dir(""), PathBuf::new());
    }
}
