//! Unit tests for grove-elements

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use grove_core::{GroveError, GroveResult, ProjectId};
use grove_resolver::ClasspathManager;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::builder::FsStructureBuilder;
use crate::cache::{ElementInfoCache, InfoBuilder};
use crate::handle::Handle;
use crate::info::{BuiltInfos, ElementInfo};
use crate::working_copy::{Owner, ProblemSink, WorkingCopyError, WorkingCopyRegistry};

// ── Fixtures ────────────────────────────────────────────────

fn root_of(project: &str) -> Handle {
    Handle::root(ProjectId::new(project), format!("/{}/src", project), false)
}

fn unit_of(project: &str) -> Handle {
    root_of(project).package("a").unit("A.java")
}

/// Builder over an in-memory tree. Records what it built and can be told to
/// fail on, or wait at a barrier before building, one handle.
#[derive(Default)]
struct TreeBuilder {
    children: HashMap<Handle, Vec<Handle>>,
    built: Mutex<Vec<Handle>>,
    fail_on: Option<Handle>,
    gate: Option<(Handle, Arc<Barrier>)>,
}

impl TreeBuilder {
    /// Model → projects → `/<p>/src` → package `a` → `A.java` → member `A`.
    fn with_projects(projects: &[&str]) -> Self {
        let mut children = HashMap::new();
        children.insert(
            Handle::Model,
            projects.iter().map(|p| Handle::project(ProjectId::new(*p))).collect(),
        );
        for project in projects {
            let root = root_of(project);
            let package = root.package("a");
            let unit = package.unit("A.java");
            children.insert(Handle::project(ProjectId::new(*project)), vec![root.clone()]);
            children.insert(root, vec![package.clone()]);
            children.insert(package, vec![unit.clone()]);
            children.insert(unit.clone(), vec![unit.member("A")]);
        }
        TreeBuilder {
            children,
            ..TreeBuilder::default()
        }
    }

    fn builds(&self) -> Vec<Handle> {
        self.built.lock().clone()
    }

    fn count(&self, handle: &Handle) -> usize {
        self.built.lock().iter().filter(|h| *h == handle).count()
    }
}

impl InfoBuilder for TreeBuilder {
    fn build(&self, handle: &Handle) -> GroveResult<BuiltInfos> {
        if let Some((gated, barrier)) = &self.gate {
            if gated == handle {
                barrier.wait();
            }
        }
        self.built.lock().push(handle.clone());
        if self.fail_on.as_ref() == Some(handle) {
            return Err(GroveError::DoesNotExist(handle.to_string()));
        }
        let children = self.children.get(handle).cloned().unwrap_or_default();
        let info = ElementInfo::new(children, handle.depth() as u64);
        Ok(HashMap::from([(handle.clone(), Arc::new(info))]))
    }
}

// ── Cache ───────────────────────────────────────────────────

#[test]
fn test_open_builds_ancestors_first() {
    let cache = ElementInfoCache::new(100);
    let builder = TreeBuilder::with_projects(&["p"]);
    let unit = unit_of("p");

    let info = cache.get_or_open(&unit, &builder).unwrap();
    assert_eq!(info.children, vec![unit.member("A")]);

    let kinds: Vec<usize> = builder.builds().iter().map(Handle::depth).collect();
    assert_eq!(kinds, vec![0, 1, 2, 3, 4]);
    assert_eq!(cache.len(), 5);
    assert!(cache.contains(&root_of("p").package("a")));
}

#[test]
fn test_cached_infos_are_not_rebuilt() {
    let cache = ElementInfoCache::new(100);
    let builder = TreeBuilder::with_projects(&["p"]);
    let unit = unit_of("p");

    let first = cache.get_or_open(&unit, &builder).unwrap();
    let second = cache.get_or_open(&unit, &builder).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builder.count(&unit), 1);
    assert!(Arc::ptr_eq(&cache.get_info(&unit).unwrap(), &first));
    assert!(cache.get_info(&unit_of("q")).is_none());
}

#[test]
fn test_failed_open_publishes_nothing() {
    let cache = ElementInfoCache::new(100);
    let builder = TreeBuilder {
        fail_on: Some(unit_of("p")),
        ..TreeBuilder::with_projects(&["p"])
    };

    let err = cache.get_or_open(&unit_of("p").member("A"), &builder).unwrap_err();
    assert!(matches!(err, GroveError::DoesNotExist(_)));
    // the ancestors staged along the way are discarded too
    assert!(cache.is_empty());
    assert!(cache.get_info(&Handle::Model).is_none());
}

#[test]
fn test_unknown_child_does_not_exist() {
    let cache = ElementInfoCache::new(100);
    let builder = TreeBuilder::with_projects(&["p"]);
    let missing = root_of("p").package("a").unit("Missing.java");

    let err = cache.get_or_open(&missing, &builder).unwrap_err();
    assert!(matches!(err, GroveError::DoesNotExist(_)));
    assert_eq!(builder.count(&missing), 0);
    assert!(cache.is_empty());
}

#[test]
fn test_concurrent_open_publishes_once() {
    let cache = ElementInfoCache::new(100);
    let project = Handle::project(ProjectId::new("p"));
    let builder = TreeBuilder {
        gate: Some((project.clone(), Arc::new(Barrier::new(2)))),
        ..TreeBuilder::with_projects(&["p"])
    };

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| cache.get_or_open(&project, &builder).unwrap());
        let b = s.spawn(|| cache.get_or_open(&project, &builder).unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });

    // both threads built an info, only one became visible
    assert_eq!(builder.count(&project), 2);
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&cache.get_info(&project).unwrap(), &a));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_publish_keeps_existing_unless_forced() {
    let cache = ElementInfoCache::new(100);
    let builder = TreeBuilder::with_projects(&["p"]);
    let root = root_of("p");
    cache.get_or_open(&root.package("a"), &builder).unwrap();

    let replacement = Arc::new(ElementInfo::new(Vec::new(), 99));
    let kept = cache
        .publish(&root, HashMap::from([(root.clone(), replacement.clone())]), false)
        .unwrap();
    assert_ne!(kept.fingerprint, 99);
    assert!(cache.contains(&root.package("a")));

    let forced = cache
        .publish(&root, HashMap::from([(root.clone(), replacement.clone())]), true)
        .unwrap();
    assert!(Arc::ptr_eq(&forced, &replacement));
    // the replaced info's children were closed
    assert!(!cache.contains(&root.package("a")));
}

#[test]
fn test_subtree_of_closed_parent_is_not_published() {
    /// Closes the source root while its package is being built.
    struct ClosingBuilder<'a> {
        tree: TreeBuilder,
        cache: &'a ElementInfoCache,
    }

    impl InfoBuilder for ClosingBuilder<'_> {
        fn build(&self, handle: &Handle) -> GroveResult<BuiltInfos> {
            if handle == &root_of("p").package("a") {
                self.cache.remove(&root_of("p"));
            }
            self.tree.build(handle)
        }
    }

    let cache = ElementInfoCache::new(100);
    let builder = ClosingBuilder {
        tree: TreeBuilder::with_projects(&["p"]),
        cache: &cache,
    };
    let package = root_of("p").package("a");
    cache.get_or_open(&root_of("p"), &builder).unwrap();

    let info = cache.get_or_open(&package, &builder).unwrap();
    assert_eq!(info.children, vec![unit_of("p")]);
    assert!(!cache.contains(&root_of("p")));
    assert!(!cache.contains(&package));
    assert!(cache.contains(&Handle::project(ProjectId::new("p"))));
}

#[test]
fn test_remove_closes_descendants() {
    let cache = ElementInfoCache::new(100);
    let builder = TreeBuilder::with_projects(&["p"]);
    cache.get_or_open(&unit_of("p").member("A"), &builder).unwrap();
    assert_eq!(cache.len(), 6);

    let removed = cache.remove(&root_of("p"));
    assert!(removed.is_some());
    assert_eq!(cache.len(), 2);
    assert!(cache.contains(&Handle::project(ProjectId::new("p"))));
    assert!(!cache.contains(&unit_of("p")));
    assert!(cache.remove(&root_of("p")).is_none());
}

#[test]
fn test_eviction_takes_least_recent_subtree() {
    let cache = ElementInfoCache::new(4);
    let builder = TreeBuilder::with_projects(&["p", "q"]);
    cache.get_or_open(&root_of("p"), &builder).unwrap();
    cache.get_or_open(&root_of("q"), &builder).unwrap();

    // the model still has q below it; p goes with its root
    assert_eq!(cache.len(), 3);
    assert!(cache.contains(&Handle::Model));
    assert!(!cache.contains(&Handle::project(ProjectId::new("p"))));
    assert!(!cache.contains(&root_of("p")));
    assert!(cache.contains(&root_of("q")));
}

#[test]
fn test_pinned_infos_overflow_capacity() {
    let cache = ElementInfoCache::new(3);
    let builder = TreeBuilder::with_projects(&["p", "q"]);
    cache.get_or_open(&root_of("p"), &builder).unwrap();
    cache.pin(&root_of("p"));

    cache.get_or_open(&root_of("q"), &builder).unwrap();
    assert_eq!(cache.len(), 5);
    assert!(cache.contains(&root_of("p")));

    cache.unpin(&root_of("p"));
    assert!(!cache.is_pinned(&root_of("p")));
    assert!(cache.len() <= 3);
}

// ── Working copies ──────────────────────────────────────────

fn registry() -> (Arc<ElementInfoCache>, WorkingCopyRegistry) {
    let cache = Arc::new(ElementInfoCache::new(100));
    let registry = WorkingCopyRegistry::new(cache.clone());
    (cache, registry)
}

#[test]
fn test_working_copy_use_counts() {
    let (_cache, registry) = registry();
    let unit = unit_of("p");
    let owner = Owner::primary();
    let created = AtomicUsize::new(0);
    let factory = || {
        created.fetch_add(1, Ordering::SeqCst);
        Ok::<_, anyhow::Error>("class A {\n}\n".to_string())
    };

    let first = registry.acquire(&unit, &owner, None, factory).unwrap();
    assert_eq!(registry.use_count(&unit, &owner), 1);
    let second = registry.acquire(&unit, &owner, None, factory).unwrap();
    assert_eq!(registry.use_count(&unit, &owner), 2);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(created.load(Ordering::SeqCst), 1);

    assert_eq!(registry.release(&first).unwrap(), 1);
    assert!(!first.is_closed());
    assert_eq!(registry.release(&second).unwrap(), 0);
    assert!(first.is_closed());
    assert!(matches!(registry.release(&first), Err(WorkingCopyError::NotAWorkingCopy(_))));
}

#[test]
fn test_owners_get_distinct_working_copies() {
    let (_cache, registry) = registry();
    let unit = unit_of("p");
    let primary = registry
        .acquire(&unit, &Owner::primary(), None, || Ok(String::new()))
        .unwrap();
    let scratch = registry
        .acquire(&unit, &Owner::new("refactoring"), None, || Ok(String::new()))
        .unwrap();

    assert!(!Arc::ptr_eq(&primary, &scratch));
    assert_eq!(registry.working_copies(&Owner::new("refactoring")).len(), 1);
}

#[test]
fn test_teardown_emits_diff_for_unsaved_primary() {
    let (_cache, registry) = registry();
    let mut events = registry.subscribe();
    let unit = unit_of("p");
    let overlay = registry
        .acquire(&unit, &Owner::primary(), None, || Ok("class A {\n}\n".to_string()))
        .unwrap();
    overlay.set_contents("class A {\n}\nclass B {\n}\n").unwrap();
    assert!(overlay.has_unsaved_changes());

    assert_eq!(registry.release(&overlay).unwrap(), 0);
    let diff = events.try_recv().unwrap();
    assert_eq!(diff.unit, unit.to_string());
    assert_eq!(diff.removed, vec!["B".to_string()]);
    assert!(diff.added.is_empty());
    assert!(events.try_recv().is_err());
}

#[test]
fn test_teardown_without_diff() {
    let (_cache, registry) = registry();
    let mut events = registry.subscribe();
    let unit = unit_of("p");

    // committed changes
    let overlay = registry
        .acquire(&unit, &Owner::primary(), None, || Ok("class A {}\n".to_string()))
        .unwrap();
    overlay.set_contents("class B {}\n").unwrap();
    overlay.commit().unwrap();
    registry.release(&overlay).unwrap();

    // unsaved changes of a non-primary owner
    let overlay = registry
        .acquire(&unit, &Owner::new("preview"), None, || Ok("class A {}\n".to_string()))
        .unwrap();
    overlay.set_contents("class C {}\n").unwrap();
    registry.release(&overlay).unwrap();

    assert!(events.try_recv().is_err());
}

#[test]
fn test_discard_ignores_use_count() {
    let (_cache, registry) = registry();
    let unit = unit_of("p");
    let owner = Owner::primary();
    let overlay = registry.acquire(&unit, &owner, None, || Ok(String::new())).unwrap();
    registry.acquire(&unit, &owner, None, || Ok(String::new())).unwrap();

    registry.discard(&overlay).unwrap();
    assert_eq!(registry.use_count(&unit, &owner), 0);
    assert!(overlay.is_closed());
    assert!(matches!(overlay.set_contents("x"), Err(WorkingCopyError::Closed(_))));
}

#[test]
fn test_working_copy_pins_and_evicts_unit() {
    let (cache, registry) = registry();
    let builder = TreeBuilder::with_projects(&["p"]);
    let unit = unit_of("p");
    cache.get_or_open(&unit.member("A"), &builder).unwrap();

    let overlay = registry
        .acquire(&unit, &Owner::primary(), None, || Ok("class A {}\n".to_string()))
        .unwrap();
    assert!(!cache.contains(&unit));
    assert!(!cache.contains(&unit.member("A")));
    assert!(cache.is_pinned(&unit));

    registry.release(&overlay).unwrap();
    assert!(!cache.is_pinned(&unit));
}

#[test]
fn test_non_primary_working_copy_leaves_cache_alone() {
    let (cache, registry) = registry();
    let builder = TreeBuilder::with_projects(&["p"]);
    let unit = unit_of("p");
    let opened = cache.get_or_open(&unit, &builder).unwrap();

    let overlay = registry
        .acquire(&unit, &Owner::new("refactoring"), None, || Ok("class A {}\n".to_string()))
        .unwrap();
    assert!(cache.contains(&unit));
    assert!(!cache.is_pinned(&unit));

    overlay.set_contents("class A {}\nclass Secret {}\n").unwrap();
    let info = registry.reconcile(&overlay).unwrap();
    assert_eq!(info.children, vec![unit.member("A"), unit.member("Secret")]);
    // the shared structure still shows the saved unit
    assert!(Arc::ptr_eq(&cache.get_info(&unit).unwrap(), &opened));
    assert!(!cache.contains(&unit.member("Secret")));

    registry.release(&overlay).unwrap();
    assert!(cache.contains(&unit));
}

#[test]
fn test_factory_failure() {
    let (_cache, registry) = registry();
    let unit = unit_of("p");
    let err = registry
        .acquire(&unit, &Owner::primary(), None, || Err(anyhow::anyhow!("unreadable")))
        .unwrap_err();
    assert!(matches!(err, WorkingCopyError::Factory { .. }));
    assert_eq!(registry.use_count(&unit, &Owner::primary()), 0);

    let err = registry
        .acquire(&root_of("p"), &Owner::primary(), None, || Ok(String::new()))
        .unwrap_err();
    assert!(matches!(err, WorkingCopyError::NotAUnit(_)));
}

#[test]
fn test_reconcile_replaces_cached_structure() {
    struct Collect(Mutex<Vec<String>>);

    impl ProblemSink for Collect {
        fn report(&self, _unit: &Handle, problem: &str) {
            self.0.lock().push(problem.to_string());
        }
    }

    let (cache, registry) = registry();
    let builder = TreeBuilder::with_projects(&["p"]);
    let unit = unit_of("p");
    cache.get_or_open(&unit, &builder).unwrap();

    let sink = Arc::new(Collect(Mutex::new(Vec::new())));
    let overlay = registry
        .acquire(&unit, &Owner::primary(), Some(sink.clone()), || Ok("class A {}\n".to_string()))
        .unwrap();
    overlay.set_contents("class A {}\nclass Extra {}\n").unwrap();

    let info = registry.reconcile(&overlay).unwrap();
    assert_eq!(info.children, vec![unit.member("A"), unit.member("Extra")]);
    assert!(Arc::ptr_eq(&cache.get_info(&unit).unwrap(), &info));
    assert!(cache.contains(&unit.member("Extra")));

    overlay.set_contents("// nothing left\n").unwrap();
    registry.reconcile(&overlay).unwrap();
    assert_eq!(sink.0.lock().len(), 1);
    assert!(!cache.contains(&unit.member("Extra")));
}

// ── Structure from disk ─────────────────────────────────────

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

#[test]
fn test_fs_structure_builder() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "core/.classpath.toml",
        r#"
[[entries]]
kind = "source"
path = "/core/src"
exclude = ["**/generated/**"]

[[entries]]
kind = "library"
path = "/core/lib/x.jar"
"#,
    );
    write(root, "core/src/com/acme/Main.java", "package com.acme;\n\npublic class Main {\n}\n");
    write(root, "core/src/com/acme/notes.txt", "notes");
    write(root, "core/src/com/acme/generated/Gen.java", "class Gen {}\n");
    write(root, "core/lib/x.jar", "PK");

    let manager = Arc::new(ClasspathManager::open(root).unwrap());
    let builder = FsStructureBuilder::new(manager, root);
    let cache = ElementInfoCache::new(100);
    let core = ProjectId::new("core");

    let project = cache.get_or_open(&Handle::project(core.clone()), &builder).unwrap();
    assert_eq!(
        project.children,
        vec![
            Handle::root(core.clone(), "/core/src", false),
            Handle::root(core.clone(), "/core/lib/x.jar", true),
        ]
    );

    let src = Handle::root(core.clone(), "/core/src", false);
    let src_info = cache.get_or_open(&src, &builder).unwrap();
    assert_eq!(src_info.children, vec![src.package("com.acme")]);
    assert_eq!(src_info.resources, Some(vec![PathBuf::from("com/acme/notes.txt")]));

    let main = src.package("com.acme").unit("Main.java").member("Main");
    assert!(cache.get_or_open(&main, &builder).is_ok());

    let jar = cache
        .get_or_open(&Handle::root(core.clone(), "/core/lib/x.jar", true), &builder)
        .unwrap();
    assert!(jar.children.is_empty());

    let gone = src.package("com.acme.generated");
    assert!(matches!(cache.get_or_open(&gone, &builder), Err(GroveError::DoesNotExist(_))));
}

#[test]
fn test_fs_structure_builder_reads_primary_overlay() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "core/.classpath.toml", "[[entries]]\nkind = \"source\"\npath = \"/core/src\"\n");
    write(root, "core/src/com/acme/Main.java", "public class Main {\n}\n");

    let manager = Arc::new(ClasspathManager::open(root).unwrap());
    let cache = Arc::new(ElementInfoCache::new(100));
    let registry = Arc::new(WorkingCopyRegistry::new(cache.clone()));
    let builder = FsStructureBuilder::new(manager, root).with_overlays(registry.clone());
    let unit = Handle::root(ProjectId::new("core"), "/core/src", false)
        .package("com.acme")
        .unit("Main.java");

    let saved = cache.get_or_open(&unit, &builder).unwrap();
    assert_eq!(saved.children, vec![unit.member("Main")]);

    let location = builder.unit_location(&unit).unwrap();
    let overlay = registry
        .acquire(&unit, &Owner::primary(), None, || Ok(fs::read_to_string(&location)?))
        .unwrap();
    overlay
        .set_contents("public class Main {\n}\nclass Extra {\n}\n")
        .unwrap();
    let edited = cache.get_or_open(&unit, &builder).unwrap();
    assert_eq!(edited.children, vec![unit.member("Main"), unit.member("Extra")]);
    assert!(cache.get_or_open(&unit.member("Extra"), &builder).is_ok());

    registry.release(&overlay).unwrap();
    let reverted = cache.get_or_open(&unit, &builder).unwrap();
    assert_eq!(reverted.children, vec![unit.member("Main")]);
}

#[cfg(unix)]
#[test]
fn test_fs_structure_builder_skips_linked_directories() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "core/.classpath.toml", "[[entries]]\nkind = \"source\"\npath = \"/core/src\"\n");
    write(root, "core/src/com/acme/Main.java", "public class Main {\n}\n");
    std::os::unix::fs::symlink(root.join("core/src"), root.join("core/src/com/loop")).unwrap();

    let manager = Arc::new(ClasspathManager::open(root).unwrap());
    let builder = FsStructureBuilder::new(manager, root);
    let cache = ElementInfoCache::new(100);
    let src = Handle::root(ProjectId::new("core"), "/core/src", false);

    let info = cache.get_or_open(&src, &builder).unwrap();
    assert_eq!(info.children, vec![src.package("com.acme")]);
    assert_eq!(info.resources, Some(Vec::new()));
}
