//! On-disk session state: the binary tables file plus a JSON marker

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::{self, PersistedState, STATE_FORMAT_VERSION};
use crate::error::GroveResult;

/// Default state directory under the workspace root: .grove/
pub const STATE_DIR: &str = ".grove";

/// Binary variables-and-containers file
pub const STATE_FILE: &str = "state.bin";

/// Human-readable marker written next to the state file
pub const STATE_MARKER: &str = "state.json";

pub fn state_file_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

pub fn state_marker_path(dir: &Path) -> PathBuf {
    dir.join(STATE_MARKER)
}

pub fn ensure_state_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Summary of the last save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMarker {
    pub format_version: i32,
    pub grove_version: String,
    pub projects: usize,
    pub containers: usize,
    pub variables: usize,
    pub saved_at: String,
}

/// Write the state file. The bytes go to a temporary file first and are
/// renamed into place so a crash never leaves a half-written state behind.
pub fn save_state(state: &PersistedState, dir: &Path) -> GroveResult<StateMarker> {
    ensure_state_dir(dir)?;
    let path = state_file_path(dir);
    let tmp = path.with_extension("bin.tmp");

    std::fs::write(&tmp, codec::encode(state))?;
    std::fs::rename(&tmp, &path)?;

    let marker = StateMarker {
        format_version: STATE_FORMAT_VERSION,
        grove_version: env!("CARGO_PKG_VERSION").to_string(),
        projects: state.containers.len(),
        containers: state.container_count(),
        variables: state.variables.len(),
        saved_at: chrono::Utc::now().to_rfc3339(),
    };
    let json_str = serde_json::to_string_pretty(&marker)?;
    std::fs::write(state_marker_path(dir), json_str)?;

    tracing::info!(
        "State saved: {} ({} containers, {} variables)",
        path.display(),
        marker.containers,
        marker.variables
    );
    Ok(marker)
}

/// Read the state file. A missing file is `Ok(None)`; so is a corrupt one,
/// which is logged and otherwise ignored.
pub fn load_state(dir: &Path) -> GroveResult<Option<PersistedState>> {
    let path = state_file_path(dir);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(&path)?;
    match codec::decode(&bytes) {
        Ok(state) => {
            tracing::info!("State loaded from: {}", path.display());
            Ok(Some(state))
        }
        Err(e) => {
            tracing::warn!("Ignoring corrupt state file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

pub fn read_marker(dir: &Path) -> Option<StateMarker> {
    let json_str = std::fs::read_to_string(state_marker_path(dir)).ok()?;
    serde_json::from_str(&json_str).ok()
}

/// Remove the state directory.
pub fn clear_state(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}
