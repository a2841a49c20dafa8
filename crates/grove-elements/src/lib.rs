//! Grove Elements: element handles, the structural info cache and working copies

pub mod handle;
pub mod info;
pub mod cache;
pub mod builder;
pub mod working_copy;

#[cfg(test)]
pub mod tests;

pub use handle::{ElementKind, Handle};
pub use info::{BuiltInfos, ElementInfo};
pub use cache::{ElementInfoCache, InfoBuilder};
pub use builder::FsStructureBuilder;
pub use working_copy::{Overlay, Owner, ProblemSink, WorkingCopyError, WorkingCopyRegistry};
