//! CLI command implementations

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use grove_core::model::portable;
use grove_core::{GroveConfig, ProjectId, ResolvedEntry};
use grove_elements::{ElementInfoCache, FsStructureBuilder, Handle};
use grove_resolver::ClasspathManager;

/// Open the workspace and restore the last saved session, if any.
fn open(root: &Path) -> anyhow::Result<ClasspathManager> {
    let manager = ClasspathManager::open(root)
        .with_context(|| format!("Cannot open workspace {}", root.display()))?;
    if !manager.load_state()? {
        tracing::debug!("No saved state under {}", root.display());
    }
    Ok(manager)
}

fn project_of(manager: &ClasspathManager, name: &str) -> anyhow::Result<ProjectId> {
    let project = ProjectId::new(name);
    if !manager.project_exists(&project) {
        anyhow::bail!("Unknown project: {}", name);
    }
    Ok(project)
}

fn entry_line(entry: &ResolvedEntry) -> String {
    let mut line = format!(
        "{:<9} {}",
        format!("{:?}", entry.kind()).to_lowercase(),
        portable(entry.path())
    );
    if entry.is_exported() {
        line.push_str(" (exported)");
    }
    if let Some(via) = &entry.chained_from {
        line.push_str(&format!(" via {}", portable(via)));
    }
    line
}

pub fn resolve(root: &Path, name: &str, expand: bool, json: bool) -> anyhow::Result<()> {
    let manager = open(root)?;
    let project = project_of(&manager, name)?;
    let resolved = manager.resolved_classpath(&project)?;
    let entries = if expand {
        manager.expanded_classpath(&project)?
    } else {
        resolved.entries.clone()
    };

    if json {
        let out = serde_json::json!({
            "project": project,
            "status": resolved.status,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for entry in &entries {
        println!("{}", entry_line(entry));
    }
    if !resolved.status.is_ok() {
        tracing::warn!("{}: {}", project, resolved.status);
    }
    Ok(())
}

pub fn cycles(root: &Path) -> anyhow::Result<()> {
    let manager = open(root)?;
    for project in manager.projects() {
        // cycle detection runs on resolved classpaths
        manager.resolved_classpath(&project)?;
    }
    let report = manager.detect_cycles(None);
    if report.is_acyclic() {
        println!("No cycles");
        return Ok(());
    }
    for diagnostic in &report.diagnostics {
        println!("[{:?}] {}", diagnostic.severity, diagnostic.message());
    }
    Ok(())
}

pub fn tree(root: &Path, name: &str) -> anyhow::Result<()> {
    let manager = Arc::new(open(root)?);
    let project = project_of(&manager, name)?;
    let cache = ElementInfoCache::new(manager.config().element_cache_capacity);
    let builder = FsStructureBuilder::new(manager.clone(), root);

    let mut stack = vec![(Handle::project(project), 0usize)];
    while let Some((handle, indent)) = stack.pop() {
        let info = match cache.get_or_open(&handle, &builder) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Cannot open {}: {}", handle, e);
                continue;
            }
        };
        let label = match &handle {
            Handle::Root { path, archive: true, .. } => format!("{} (archive)", portable(path)),
            Handle::Root { path, .. } => portable(path),
            Handle::Package { name, .. } if name.is_empty() => "(default package)".to_string(),
            _ => handle.name(),
        };
        println!("{}{}", "  ".repeat(indent), label);
        stack.extend(info.children.iter().rev().map(|child| (child.clone(), indent + 1)));
    }
    Ok(())
}

pub fn save(root: &Path) -> anyhow::Result<()> {
    let manager = open(root)?;
    for project in manager.projects() {
        let resolved = manager.resolved_classpath(&project)?;
        if !resolved.status.is_ok() {
            tracing::warn!("{}: {}", project, resolved.status);
        }
    }
    let marker = manager.save_state()?;
    tracing::info!(
        "Saved {} containers and {} variables for {} projects",
        marker.containers,
        marker.variables,
        marker.projects
    );
    Ok(())
}

pub fn vars(root: &Path) -> anyhow::Result<()> {
    let manager = open(root)?;
    let mut names = manager.variable_names();
    names.extend(manager.config().variables.keys().cloned());
    names.sort();
    names.dedup();
    for name in names {
        match manager.variable_get(&name) {
            Some(value) => println!("{} = {}", name, portable(&value)),
            None => println!("{} (unbound)", name),
        }
    }
    Ok(())
}

pub fn clear(root: &Path) -> anyhow::Result<()> {
    let dir = GroveConfig::load(root)?.state_dir_in(root);
    tracing::info!("Clearing saved state in {}", dir.display());
    grove_core::clear_state(&dir)?;
    Ok(())
}
