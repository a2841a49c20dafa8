//! Integration tests for Grove
//!
//! These tests drive the resolver, the element cache and the CLI together
//! over workspaces laid out on disk.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use grove_core::{DeclarationStatus, EntryKind, Lookup, ProjectId};
use grove_elements::{ElementInfoCache, FsStructureBuilder, Handle, Owner, WorkingCopyRegistry};
use grove_resolver::ClasspathManager;
use tempfile::TempDir;

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

/// `core` exports a library folder, `app` depends on `core`.
fn workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "core/.classpath.toml",
        r#"
output = "/core/bin"

[[entries]]
kind = "source"
path = "/core/src"

[[entries]]
kind = "container"
path = "LIBDIR/lib"
exported = true
"#,
    );
    write(root, "core/lib/a.jar", "");
    write(root, "core/src/com/acme/Core.java", "package com.acme;\n\npublic class Core {\n}\n");
    write(
        root,
        "app/.classpath.toml",
        r#"
[[entries]]
kind = "source"
path = "/app/src"

[[entries]]
kind = "project"
path = "/core"
"#,
    );
    write(root, "app/src/App.java", "public class App {\n}\n");
    temp
}

fn paths(entries: &[grove_core::ResolvedEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.path().to_string_lossy().to_string())
        .collect()
}

fn grove(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("Failed to execute grove")
}

#[test]
fn test_cli_invocation() {
    let output = Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("--help")
        .output()
        .expect("Failed to execute grove");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("grove"));
    assert!(stdout.contains("resolve"));
}

#[test]
fn test_expanded_classpath_across_projects() {
    let temp = workspace();
    let manager = ClasspathManager::open(temp.path()).unwrap();
    let app = ProjectId::new("app");

    let resolved = manager.resolved_classpath(&app).unwrap();
    assert!(resolved.status.is_ok());
    assert_eq!(paths(&resolved.entries), vec!["/app/src", "/core"]);

    let expanded = manager.expanded_classpath(&app).unwrap();
    assert_eq!(
        paths(&expanded),
        vec!["/app/src", "/core", "/core/src", "/core/lib/a.jar"]
    );
    assert_eq!(expanded[3].kind(), EntryKind::Library);
    assert_eq!(manager.declaration_status(&app).unwrap(), DeclarationStatus::Verified);
}

#[test]
fn test_declared_cycle_is_reported() {
    let temp = workspace();
    write(
        temp.path(),
        "core/.classpath.toml",
        "[[entries]]\nkind = \"project\"\npath = \"/app\"\n",
    );
    let manager = ClasspathManager::open(temp.path()).unwrap();
    for project in manager.projects() {
        manager.resolved_classpath(&project).unwrap();
    }

    let report = manager.detect_cycles(None);
    let participants: Vec<&str> = report.participants.iter().map(ProjectId::name).collect();
    assert_eq!(participants, vec!["app", "core"]);
    assert_eq!(report.diagnostics.len(), 2);
    assert!(report.diagnostics[0].message().contains("{app, core}"));
}

#[test]
fn test_session_state_survives_restart() {
    let temp = workspace();
    let core = ProjectId::new("core");
    let container = Path::new("LIBDIR/lib");
    {
        let manager = ClasspathManager::open(temp.path()).unwrap();
        manager.resolved_classpath(&core).unwrap();
        let marker = manager.save_state().unwrap();
        assert_eq!(marker.containers, 1);
    }

    let manager = ClasspathManager::open(temp.path()).unwrap();
    assert!(manager.load_state().unwrap());
    // the loaded container is bound again after the batch pass
    assert!(matches!(manager.container_get(&core, container), Lookup::Resolved(_)));
}

#[test]
fn test_element_tree_and_working_copy() {
    let temp = workspace();
    let manager = Arc::new(ClasspathManager::open(temp.path()).unwrap());
    let cache = Arc::new(ElementInfoCache::new(manager.config().element_cache_capacity));
    let builder = FsStructureBuilder::new(manager.clone(), temp.path());
    let core = ProjectId::new("core");

    let src = Handle::root(core.clone(), "/core/src", false);
    let unit = src.package("com.acme").unit("Core.java");
    let info = cache.get_or_open(&unit, &builder).unwrap();
    assert_eq!(info.children, vec![unit.member("Core")]);

    let project = cache.get_info(&Handle::project(core.clone())).unwrap();
    assert!(project.children.contains(&Handle::root(core, "/core/lib/a.jar", true)));

    let registry = WorkingCopyRegistry::new(cache.clone());
    let mut events = registry.subscribe();
    let location = builder.unit_location(&unit).unwrap();
    let overlay = registry
        .acquire(&unit, &Owner::primary(), None, || Ok(fs::read_to_string(&location)?))
        .unwrap();
    assert!(!cache.contains(&unit));

    overlay
        .set_contents("package com.acme;\n\npublic class Core {\n}\n\nclass Helper {\n}\n")
        .unwrap();
    let reconciled = registry.reconcile(&overlay).unwrap();
    assert_eq!(reconciled.children.len(), 2);

    registry.release(&overlay).unwrap();
    let diff = events.try_recv().unwrap();
    assert_eq!(diff.removed, vec!["Helper".to_string()]);
    assert!(!cache.is_pinned(&unit));
}

#[test]
fn test_cli_resolve_json() {
    let temp = workspace();
    let output = grove(temp.path(), &["resolve", "app", "--expand", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["project"], "app");
    assert_eq!(json["status"], "Ok");
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[3]["entry"]["path"], "/core/lib/a.jar");
}

#[test]
fn test_cli_unknown_project_fails() {
    let temp = workspace();
    let output = grove(temp.path(), &["resolve", "missing"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown project"));
}

#[test]
fn test_cli_save_and_clear() {
    let temp = workspace();
    assert!(grove(temp.path(), &["save"]).status.success());
    assert!(temp.path().join(".grove").is_dir());

    assert!(grove(temp.path(), &["clear"]).status.success());
    assert!(!temp.path().join(".grove").exists());
}

#[test]
fn test_cli_tree() {
    let temp = workspace();
    let output = grove(temp.path(), &["tree", "core"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "core",
            "  /core/src",
            "    com.acme",
            "      Core.java",
            "        Core",
            "  /core/lib/a.jar (archive)",
        ]
    );
}
