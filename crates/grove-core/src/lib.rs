//! Grove Core: classpath entry model, project state, cycle graph and session persistence

pub mod model;
pub mod error;
pub mod workspace;
pub mod tables;
pub mod graph;
pub mod expand;
pub mod codec;
pub mod cache;
pub mod diff;
pub mod config;


#[cfg(test)]
pub mod test_utils;

pub use model::{
    AccessKind, AccessRule, Container, ContainerKind, Entry, EntryKind, Lookup, ProjectId,
    ResolutionStatus, ResolvedEntry, combine_access_rules,
};
pub use error::{CodecError, GroveError, GroveResult};
pub use workspace::{
    ClasspathChange, DECLARATION_FILE, DeclarationStatus, ProjectClasspathState, ProjectStateStore,
    RawSnapshot, ResolvedClasspath, detect_projects,
};
pub use tables::{ContainerTable, VariableTable};
pub use graph::{CycleDiagnostic, CycleReport, ProjectGraph, Severity};
pub use expand::expand;
pub use codec::{PersistedState, STATE_FORMAT_VERSION};
pub use cache::{STATE_DIR, StateMarker, clear_state, load_state, read_marker, save_state};
pub use diff::{DiffEngine, StructureDiff, StructureSnapshot};
pub use config::{CONFIG_FILE, GroveConfig};
