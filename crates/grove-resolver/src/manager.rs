//! The classpath manager: one context object per workspace owning project
//! states, variable and container tables, providers and session state.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use grove_core::model::portable;
use grove_core::{
    ClasspathChange, Container, ContainerTable, CycleReport, DeclarationStatus, Entry, EntryKind,
    GroveConfig, GroveError, GroveResult, Lookup, PersistedState, ProjectGraph, ProjectId,
    ProjectStateStore, ResolvedClasspath, ResolvedEntry, StateMarker, VariableTable,
};
use parking_lot::{Mutex, RwLock};

use crate::batch::{BatchInitialization, BatchRole};
use crate::declaration::{Declaration, DeclarationError, DeclarationReader, FsDeclarationReader, NoDeclarations};
use crate::inflight::{self, InFlightKey};
use crate::manifest::{FsManifestReader, ManifestReader, NoManifests};
use crate::providers::config::ConfigVariableProvider;
use crate::providers::env::EnvVariableProvider;
use crate::providers::library_dir::{LIBRARY_DIR_ID, LibraryDirProvider};
use crate::providers::{ContainerProvider, ProviderRegistry, VariableProvider};
use crate::resolver::{PathResolver, ResolveOptions};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

pub struct ClasspathManager {
    /// Distinguishes this manager's in-flight markers from other instances.
    context: u64,
    root: Option<PathBuf>,
    config: GroveConfig,
    states: ProjectStateStore,
    variables: VariableTable,
    containers: ContainerTable,
    providers: RwLock<ProviderRegistry>,
    declarations: Arc<dyn DeclarationReader>,
    manifests: Arc<dyn ManifestReader>,
    batch: BatchInitialization,
    cycles: Mutex<CycleReport>,
}

impl ClasspathManager {
    /// In-memory manager: classpaths are only ever set through
    /// [`set_raw_classpath`](Self::set_raw_classpath).
    pub fn new(config: GroveConfig) -> Self {
        ClasspathManager {
            context: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            root: None,
            config,
            states: ProjectStateStore::new(),
            variables: VariableTable::new(),
            containers: ContainerTable::new(),
            providers: RwLock::new(ProviderRegistry::new()),
            declarations: Arc::new(NoDeclarations),
            manifests: Arc::new(NoManifests),
            batch: BatchInitialization::new(),
            cycles: Mutex::new(CycleReport::default()),
        }
    }

    /// Manager for a workspace on disk, with `grove.toml`, declaration files,
    /// library manifests and the built-in providers.
    pub fn open(root: impl Into<PathBuf>) -> GroveResult<Self> {
        let root = root.into();
        let config = GroveConfig::load(&root)?;

        let mut registry = ProviderRegistry::new();
        let configured = ConfigVariableProvider::new(config.variables.clone());
        let names: Vec<String> = configured.names().cloned().collect();
        let configured: Arc<dyn VariableProvider> = Arc::new(configured);
        for name in names {
            registry.register_variable(name, configured.clone());
        }
        registry.register_variable_fallback(Arc::new(EnvVariableProvider::new()));
        registry.register_container(LIBRARY_DIR_ID, Arc::new(LibraryDirProvider::new(&root)));

        let mut manager = ClasspathManager::new(config)
            .with_declarations(Arc::new(FsDeclarationReader::new(&root)))
            .with_manifests(Arc::new(FsManifestReader::new(&root)));
        manager.providers = RwLock::new(registry);
        manager.root = Some(root);
        Ok(manager)
    }

    pub fn with_declarations(mut self, declarations: Arc<dyn DeclarationReader>) -> Self {
        self.declarations = declarations;
        self
    }

    pub fn with_manifests(mut self, manifests: Arc<dyn ManifestReader>) -> Self {
        self.manifests = manifests;
        self
    }

    pub fn register_variable_provider(&self, name: impl Into<String>, provider: Arc<dyn VariableProvider>) {
        self.providers.write().register_variable(name, provider);
    }

    pub fn register_container_provider(&self, id: impl Into<String>, provider: Arc<dyn ContainerProvider>) {
        self.providers.write().register_container(id, provider);
    }

    pub fn config(&self) -> &GroveConfig {
        &self.config
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn manifests(&self) -> &dyn ManifestReader {
        self.manifests.as_ref()
    }

    pub fn batch(&self) -> &BatchInitialization {
        &self.batch
    }

    // ── Projects ────────────────────────────────────────────

    pub fn project_exists(&self, project: &ProjectId) -> bool {
        self.states.contains(project) || self.declarations.exists(project)
    }

    /// Known projects: every project with state plus those found on disk.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut projects = self.states.projects();
        if let Some(root) = &self.root {
            match grove_core::detect_projects(root) {
                Ok(found) => projects.extend(found),
                Err(e) => tracing::warn!("Cannot list projects under {}: {}", root.display(), e),
            }
        }
        projects.sort();
        projects.dedup();
        projects
    }

    pub fn remove_project(&self, project: &ProjectId) -> bool {
        self.containers.remove_project(project);
        self.states.remove(project)
    }

    /// Read the project's declaration on first access. A malformed or
    /// missing declaration yields the default classpath.
    fn ensure_raw(&self, project: &ProjectId) -> GroveResult<Arc<Mutex<grove_core::ProjectClasspathState>>> {
        if !self.project_exists(project) {
            return Err(GroveError::UnknownProject(project.clone()));
        }
        let state = self.states.state(project);
        {
            let mut guard = state.lock();
            if guard.raw_snapshot().is_none() {
                let (declaration, status) = self.read_declaration(project);
                guard.set_raw(
                    declaration.entries.into_iter().map(Arc::new).collect(),
                    Some(declaration.referenced_entries.into_iter().map(Arc::new).collect()),
                    declaration.output_location,
                    status,
                );
            }
        }
        Ok(state)
    }

    fn read_declaration(&self, project: &ProjectId) -> (Declaration, DeclarationStatus) {
        match self.declarations.read(project) {
            Ok(declaration) => (declaration, DeclarationStatus::Verified),
            Err(DeclarationError::Missing(_)) => {
                tracing::debug!("No classpath declaration for {}; using default", project);
                (Declaration::default_for(project), DeclarationStatus::Verified)
            }
            Err(e) => {
                tracing::warn!("{}; using default classpath for {}", e, project);
                (Declaration::default_for(project), DeclarationStatus::Malformed(e.to_string()))
            }
        }
    }

    pub fn raw_classpath(&self, project: &ProjectId) -> GroveResult<Vec<Arc<Entry>>> {
        let state = self.ensure_raw(project)?;
        let snapshot = state.lock().raw_snapshot();
        Ok(snapshot.map(|s| s.entries).unwrap_or_default())
    }

    pub fn output_location(&self, project: &ProjectId) -> GroveResult<Option<PathBuf>> {
        let state = self.ensure_raw(project)?;
        let output = state.lock().output_location().map(Path::to_path_buf);
        Ok(output)
    }

    pub fn declaration_status(&self, project: &ProjectId) -> GroveResult<DeclarationStatus> {
        let state = self.ensure_raw(project)?;
        let status = state.lock().raw_status().clone();
        Ok(status)
    }

    /// Replace a project's raw classpath in memory. Runs cycle detection again
    /// when the set of project references changed.
    pub fn set_raw_classpath(
        &self,
        project: &ProjectId,
        entries: Vec<Entry>,
        output_location: Option<PathBuf>,
    ) -> ClasspathChange {
        let entries: Vec<Arc<Entry>> = entries.into_iter().map(Arc::new).collect();
        let new_references = project_entries(&entries);
        let change = self.states.state(project).lock().set_raw(
            entries,
            None,
            output_location,
            DeclarationStatus::Verified,
        );
        let old_references = change.old_raw.as_deref().map(project_entries).unwrap_or_default();
        if old_references != new_references {
            tracing::debug!("Project references of {} changed; checking cycles", project);
            self.detect_cycles(None);
        }
        change
    }

    /// Persist a new raw classpath through the declaration reader, then apply
    /// it in memory.
    pub fn save_raw_classpath(
        &self,
        project: &ProjectId,
        entries: Vec<Entry>,
        output_location: Option<PathBuf>,
    ) -> GroveResult<ClasspathChange> {
        let referenced = self
            .states
            .get(project)
            .and_then(|s| s.lock().raw_snapshot())
            .map(|s| s.referenced_entries.iter().map(|e| (**e).clone()).collect())
            .unwrap_or_default();
        let declaration = Declaration {
            entries: entries.clone(),
            output_location: output_location.clone(),
            referenced_entries: referenced,
        };
        self.declarations
            .write(project, &declaration)
            .map_err(|e| GroveError::InvalidPath {
                path: project.path(),
                reason: e.to_string(),
            })?;
        Ok(self.set_raw_classpath(project, entries, output_location))
    }

    // ── Resolution ──────────────────────────────────────────

    fn default_options(&self) -> ResolveOptions {
        ResolveOptions {
            use_previous_session: false,
            resolve_chained_libraries: self.config.resolve_chained_libraries,
            resolve_chained_libraries_for_containers: self.config.resolve_chained_libraries_for_containers,
        }
    }

    /// The project's resolved classpath, computed on demand.
    ///
    /// A re-entrant request for a project this thread is already resolving is
    /// answered from previous-session values and stored as provisional, so it
    /// is recomputed on the next regular request.
    pub fn resolved_classpath(&self, project: &ProjectId) -> GroveResult<Arc<ResolvedClasspath>> {
        let state = self.ensure_raw(project)?;
        let raw = {
            let guard = state.lock();
            if let Some(resolved) = guard.resolved() {
                return Ok(resolved);
            }
            guard.raw_snapshot()
        };
        let Some(raw) = raw else {
            return Err(GroveError::UnknownProject(project.clone()));
        };

        let key = InFlightKey::Project {
            context: self.context,
            project: project.clone(),
        };
        let (options, provisional, _guard) = match inflight::enter(key) {
            Some(guard) => (self.default_options(), false, Some(guard)),
            None => {
                tracing::debug!("Re-entered resolution of {}; using previous session", project);
                let options = ResolveOptions {
                    use_previous_session: true,
                    ..self.default_options()
                };
                (options, true, None)
            }
        };

        let resolved = PathResolver::new(self, project, options).resolve(&raw.entries, &raw.referenced_entries);
        let resolved = Arc::new(resolved);
        if !resolved.status.is_ok() {
            tracing::debug!("{} resolved with status: {}", project, resolved.status);
        }
        state.lock().set_resolved(resolved.clone(), raw.stamp, provisional);
        Ok(resolved)
    }

    /// Resolve arbitrary raw entries in the context of `project` without
    /// storing the result.
    pub fn resolve_entries(
        &self,
        project: &ProjectId,
        entries: &[Arc<Entry>],
        options: ResolveOptions,
    ) -> ResolvedClasspath {
        PathResolver::new(self, project, options).resolve(entries, &[])
    }

    /// Transitive closure over project references.
    pub fn expanded_classpath(&self, project: &ProjectId) -> GroveResult<Vec<ResolvedEntry>> {
        if !self.project_exists(project) {
            return Err(GroveError::UnknownProject(project.clone()));
        }
        Ok(grove_core::expand(project, |p| self.resolved_classpath(p).ok()))
    }

    /// Find the projects taking part in reference cycles. `preferred`
    /// classpaths stand in for the stored ones of their projects, letting a
    /// caller check a change before committing it. The report is remembered
    /// as the current cycle diagnostics.
    pub fn detect_cycles(&self, preferred: Option<&HashMap<ProjectId, Arc<ResolvedClasspath>>>) -> CycleReport {
        let mut projects = self.projects();
        if let Some(preferred) = preferred {
            projects.extend(preferred.keys().cloned());
            projects.sort();
            projects.dedup();
        }

        let references = projects.into_iter().map(|project| {
            let classpath = preferred
                .and_then(|p| p.get(&project).cloned())
                .or_else(|| self.resolved_classpath(&project).ok());
            let targets = classpath
                .map(|c| c.project_references().filter_map(ProjectId::from_path).collect())
                .unwrap_or_default();
            (project, targets)
        });
        let graph = ProjectGraph::from_references(references.collect::<Vec<_>>());
        let report = graph.cycle_report(self.config.cycle_severity);
        for diagnostic in &report.diagnostics {
            tracing::debug!("{}", diagnostic.message());
        }
        *self.cycles.lock() = report.clone();
        report
    }

    /// Diagnostics of the last cycle detection.
    pub fn cycle_report(&self) -> CycleReport {
        self.cycles.lock().clone()
    }

    // ── Variables ───────────────────────────────────────────

    pub fn variable_get(&self, name: &str) -> Option<PathBuf> {
        self.variable_lookup(name, false).resolved()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.names()
    }

    /// Bind or unbind a variable. Resolved classpaths referring to it are
    /// invalidated only when the value actually changed.
    pub fn variable_put(&self, name: &str, value: Option<PathBuf>) -> bool {
        if !self.variables.put(name, value) {
            return false;
        }
        let changes = self
            .states
            .reset_resolved_where(|state| state.refers_to(EntryKind::Variable, name));
        tracing::debug!("Variable {} changed; {} classpaths reset", name, changes.len());
        true
    }

    pub(crate) fn variable_lookup(&self, name: &str, use_previous_session: bool) -> Lookup<PathBuf> {
        if let Some(value) = self.variables.get(name) {
            return Lookup::Resolved(value);
        }
        if use_previous_session {
            return self
                .variables
                .get_previous(name)
                .map_or(Lookup::Unbound, Lookup::Resolved);
        }

        let key = InFlightKey::Variable {
            context: self.context,
            name: name.to_string(),
        };
        let Some(_guard) = inflight::enter(key) else {
            return Lookup::InProgress;
        };

        let providers = self.providers.read().variable_providers(name);
        for provider in providers {
            match provider.initialize(name, self) {
                Ok(Some(value)) => {
                    if self.variables.get_previous(name).as_ref() == Some(&value) {
                        // same as last session: nothing computed from it is stale
                        self.variables.put(name, Some(value.clone()));
                    } else {
                        self.variable_put(name, Some(value.clone()));
                    }
                    tracing::debug!("Initialized variable {} = {}", name, value.display());
                    return Lookup::Resolved(value);
                }
                Ok(None) => {
                    // a provider may also bind the variable itself
                    if let Some(value) = self.variables.get(name) {
                        return Lookup::Resolved(value);
                    }
                }
                Err(e) => {
                    tracing::warn!("Variable provider for {} failed: {:#}", name, e);
                }
            }
        }
        Lookup::Unbound
    }

    // ── Containers ──────────────────────────────────────────

    /// The container bound at `path` for `project`, initializing it through
    /// its provider on first use.
    pub fn container_get(&self, project: &ProjectId, path: &Path) -> Lookup<Arc<Container>> {
        self.container_lookup(project, path, false)
    }

    pub(crate) fn container_lookup(
        &self,
        project: &ProjectId,
        path: &Path,
        use_previous_session: bool,
    ) -> Lookup<Arc<Container>> {
        if let Some(container) = self.containers.get(project, path) {
            return Lookup::Resolved(container);
        }
        if use_previous_session {
            return self
                .containers
                .get_previous(project, path)
                .map_or(Lookup::Unbound, Lookup::Resolved);
        }
        if inflight::is_in_flight(&self.container_key(project, path)) {
            return Lookup::InProgress;
        }

        match self.batch.enter() {
            BatchRole::RunPass(pass) => {
                let result = self.initialize_all_containers(project, path);
                self.batch.finish();
                drop(pass);
                result
            }
            BatchRole::JoinPass => {
                self.batch.wait_for_pass();
                match self.containers.get(project, path) {
                    Some(container) => Lookup::Resolved(container),
                    None => self.initialize_container(project, path),
                }
            }
            BatchRole::Single => self.initialize_container(project, path),
        }
    }

    /// Bind (or unbind) one container path for several projects at once.
    /// Projects whose binding changed lose their resolved classpath.
    pub fn container_put(&self, projects: &[ProjectId], path: &Path, container: Option<Container>) {
        let container = container.map(Arc::new);
        for project in projects {
            let old = self.containers.put(project, path, container.clone());
            let changed = match (&old, &container) {
                (Some(old), Some(new)) => !Arc::ptr_eq(old, new) && old != new,
                (None, None) => false,
                _ => true,
            };
            if changed {
                if let Some(state) = self.states.get(project) {
                    state.lock().reset_resolved();
                }
                tracing::debug!("Container {} changed for {}", portable(path), project);
            }
        }
    }

    fn container_key(&self, project: &ProjectId, path: &Path) -> InFlightKey {
        InFlightKey::Container {
            context: self.context,
            project: project.clone(),
            path: path.to_path_buf(),
        }
    }

    fn initialize_container(&self, project: &ProjectId, path: &Path) -> Lookup<Arc<Container>> {
        let Some(_guard) = inflight::enter(self.container_key(project, path)) else {
            return Lookup::InProgress;
        };

        let provider = Container::provider_id(path).and_then(|id| self.providers.read().container_provider(&id));
        let Some(provider) = provider else {
            tracing::debug!("No container provider for {}", portable(path));
            return Lookup::Unbound;
        };

        tracing::debug!("Initializing container {} for {}", portable(path), project);
        match provider.initialize(path, project, self) {
            Ok(Some(container)) => {
                self.container_put(std::slice::from_ref(project), path, Some(container));
            }
            Ok(None) => {
                if self.containers.get(project, path).is_none() {
                    if let Some(failure) = provider.failure_container(path, project) {
                        tracing::debug!("Using failure container for {}", portable(path));
                        self.container_put(std::slice::from_ref(project), path, Some(failure));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Container provider for {} failed on {}: {:#}",
                    portable(path),
                    project,
                    e
                );
                return Lookup::Unbound;
            }
        }
        self.containers
            .get(project, path)
            .map_or(Lookup::Unbound, Lookup::Resolved)
    }

    /// One pass initializing every unbound container of every project, the
    /// requested one first.
    fn initialize_all_containers(&self, project: &ProjectId, path: &Path) -> Lookup<Arc<Container>> {
        let mut pending = vec![(project.clone(), path.to_path_buf())];
        for other in self.projects() {
            let Ok(raw) = self.raw_classpath(&other) else {
                continue;
            };
            for entry in raw.iter().filter(|e| e.kind == EntryKind::Container) {
                let key = (other.clone(), entry.path.clone());
                if !pending.contains(&key) && self.containers.get(&other, &entry.path).is_none() {
                    pending.push(key);
                }
            }
        }
        tracing::debug!("Batch initializing {} containers", pending.len());

        for (other, container_path) in &pending {
            if self.containers.get(other, container_path).is_none() {
                self.initialize_container(other, container_path);
            }
        }
        self.containers
            .get(project, path)
            .map_or(Lookup::Unbound, Lookup::Resolved)
    }

    /// Coalesce the next container initializations into one pass. With
    /// `init_after_load` the pass runs immediately.
    pub fn force_batch_initialization(&self, init_after_load: bool) {
        self.batch.force(init_after_load);
        if !init_after_load {
            return;
        }
        let first = self.projects().into_iter().find_map(|project| {
            let raw = self.raw_classpath(&project).ok()?;
            raw.iter()
                .find(|e| e.kind == EntryKind::Container)
                .map(|e| (project.clone(), e.path.clone()))
        });
        match first {
            Some((project, path)) => {
                self.container_get(&project, &path);
            }
            None => self.batch.finish(),
        }
    }

    // ── Session state ───────────────────────────────────────

    /// Variables and containers to persist. Containers never initialized in
    /// this session are carried over from the previous one.
    pub fn snapshot_state(&self) -> PersistedState {
        let mut state = PersistedState {
            variables: self.variables.snapshot(),
            ..PersistedState::default()
        };
        for project in self.containers.projects() {
            if !self.project_exists(&project) {
                continue;
            }
            let mut containers: BTreeMap<PathBuf, Vec<Arc<Entry>>> = self
                .containers
                .previous_of(&project)
                .into_iter()
                .map(|(path, c)| (path, c.entries.clone()))
                .collect();
            for (path, container) in self.containers.containers_of(&project) {
                containers.insert(path, container.entries.clone());
            }
            if !containers.is_empty() {
                state.containers.insert(project, containers);
            }
        }
        state
    }

    /// Install state from a previous session: variables go live (and into the
    /// shadow), containers only into the previous-session shadow.
    pub fn restore_state(&self, state: PersistedState) {
        for (name, value) in state.variables {
            self.variables.put(&name, Some(value.clone()));
            self.variables.put_previous(&name, value);
        }
        for (project, containers) in state.containers {
            if !self.project_exists(&project) {
                tracing::debug!("Dropping persisted containers of removed project {}", project);
                continue;
            }
            for (path, entries) in containers {
                let container = Container::persisted(&path, &project, entries);
                self.containers.put_previous(&project, &path, Arc::new(container));
            }
        }
    }

    fn state_dir(&self) -> GroveResult<PathBuf> {
        match &self.root {
            Some(root) => Ok(self.config.state_dir_in(root)),
            None if self.config.state_dir.is_absolute() => Ok(self.config.state_dir.clone()),
            None => Err(GroveError::InvalidPath {
                path: self.config.state_dir.clone(),
                reason: "relative state directory without a workspace root".to_string(),
            }),
        }
    }

    pub fn save_state(&self) -> GroveResult<StateMarker> {
        let dir = self.state_dir()?;
        grove_core::save_state(&self.snapshot_state(), &dir).inspect_err(|e| {
            tracing::warn!("Failed to save state to {}: {}", dir.display(), e);
        })
    }

    /// Load the previous session, if any, and schedule batch initialization.
    pub fn load_state(&self) -> GroveResult<bool> {
        let dir = self.state_dir()?;
        let loaded = match grove_core::load_state(&dir) {
            Ok(Some(state)) => {
                self.restore_state(state);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Failed to load state from {}: {}", dir.display(), e);
                false
            }
        };
        self.batch.force(false);
        Ok(loaded)
    }
}

fn project_entries(entries: &[Arc<Entry>]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Project)
        .map(|e| e.path.clone())
        .collect();
    paths.sort();
    paths
}
