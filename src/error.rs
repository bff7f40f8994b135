use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the imposter repository and everything beneath it.
#[derive(Error, Debug)]
pub enum RepoError {
    /// Caller referred to a stub index (or other named resource) that does not exist.
    #[error("missing resource: {0}")]
    MissingResource(String),

    /// An advisory file lock could not be acquired within the retry budget.
    #[error("lock contention on {path}: exhausted {attempts} attempts")]
    LockContention { path: PathBuf, attempts: u32 },

    /// Underlying filesystem failure: permissions, disk, or similar.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Corrupt JSON on disk.
    #[error("parse error at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RepoError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RepoError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        RepoError::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn missing_resource(what: impl Into<String>) -> Self {
        RepoError::MissingResource(what.into())
    }
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, RepoError>;
