//! Error types for the workspace model

use std::path::PathBuf;

use thiserror::Error;

use crate::model::ProjectId;

pub type GroveResult<T> = Result<T, GroveError>;

#[derive(Error, Debug)]
pub enum GroveError {
    /// The element's underlying content could not be located or read.
    #[error("{0} does not exist")]
    DoesNotExist(String),

    #[error("Project {0} is not part of the workspace")]
    UnknownProject(ProjectId),

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Failed to read persisted state: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to write state marker: {0}")]
    Marker(#[from] serde_json::Error),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decode failures of the persisted variables-and-containers format.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported state format version {0}")]
    UnsupportedVersion(i32),

    #[error("Unexpected end of input at byte {0}")]
    Truncated(usize),

    #[error("Unexpected {table} id {id} (known: {known})")]
    UnexpectedId { table: &'static str, id: u32, known: usize },

    #[error("Unknown {what} code {code}")]
    UnknownCode { what: &'static str, code: u32 },

    #[error("String is not valid UTF-8 at byte {0}")]
    InvalidUtf8(usize),

    #[error("{0} trailing bytes after state")]
    TrailingBytes(usize),
}
