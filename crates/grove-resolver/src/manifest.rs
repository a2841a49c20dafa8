//! Chained libraries declared by a library's `META-INF/MANIFEST.MF`

use std::path::{Path, PathBuf};

use crate::resolver::normalize;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// Returns the libraries a library chains in, in declaration order.
pub trait ManifestReader: Send + Sync {
    fn chained_libraries(&self, library: &Path) -> Vec<PathBuf>;
}

/// Reader for workspaces without manifests.
pub struct NoManifests;

impl ManifestReader for NoManifests {
    fn chained_libraries(&self, _library: &Path) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Reads manifests of exploded (directory) libraries on disk. Workspace paths
/// (`/<project>/...`) are looked up under the workspace root, anything else is
/// taken as an external location.
pub struct FsManifestReader {
    root: PathBuf,
}

impl FsManifestReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsManifestReader { root: root.into() }
    }
}

impl ManifestReader for FsManifestReader {
    fn chained_libraries(&self, library: &Path) -> Vec<PathBuf> {
        let location = workspace_location(&self.root, library);
        let manifest = location.join(MANIFEST_PATH);
        let text = match std::fs::read_to_string(&manifest) {
            Ok(text) => text,
            Err(_) => {
                if location.is_file() {
                    tracing::debug!("Skipping manifest of packed library {}", location.display());
                }
                return Vec::new();
            }
        };

        let Some(parent) = library.parent() else {
            return Vec::new();
        };
        parse_class_path(&text)
            .into_iter()
            .filter_map(|name| normalize(&parent.join(name)))
            .filter(|chained| workspace_location(&self.root, chained).exists())
            .collect()
    }
}

/// Filesystem location of a workspace or external path.
pub fn workspace_location(root: &Path, path: &Path) -> PathBuf {
    if let Some(project) = grove_core::model::first_segment(path) {
        let project_dir = root.join(project);
        if path.has_root() && project_dir.is_dir() {
            return project_dir.join(grove_core::model::remaining_segments(path));
        }
    }
    path.to_path_buf()
}

/// Names listed in the `Class-Path` main attribute. Continuation lines start
/// with a single space; names are separated by whitespace.
pub fn parse_class_path(manifest: &str) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for line in manifest.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            // end of the main section
            break;
        }
        match (line.strip_prefix(' '), headers.last_mut()) {
            (Some(continuation), Some(last)) => last.push_str(continuation),
            _ => headers.push(line.to_string()),
        }
    }

    headers
        .iter()
        .filter_map(|header| {
            let (name, value) = header.split_once(':')?;
            name.trim().eq_ignore_ascii_case("Class-Path").then_some(value)
        })
        .flat_map(|value| value.split_whitespace())
        .filter(|name| !name.contains(':'))
        .map(str::to_string)
        .collect()
}
