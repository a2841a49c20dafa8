//! Classpath resolution: variables, containers, chained libraries and the
//! manager owning a workspace's classpath state

pub mod manager;
pub mod resolver;
pub mod inflight;
pub mod batch;
pub mod providers;
pub mod manifest;
pub mod declaration;


pub use manager::ClasspathManager;
pub use resolver::{PathResolver, ResolveOptions, normalize};
pub use batch::{BatchInitialization, BatchRole, BatchState};
pub use providers::{ContainerProvider, ProviderRegistry, VariableProvider};
pub use providers::library_dir::{LIBRARY_DIR_ID, LibraryDirProvider};
pub use manifest::{FsManifestReader, ManifestReader, NoManifests};
pub use declaration::{Declaration, DeclarationError, DeclarationReader, FsDeclarationReader, NoDeclarations};
